//! Memory Management subsystem
//!
//! Слои / Layers:
//!   pmm     — интерфейс физического аллокатора / physical page allocator interface
//!   vmm     — интерфейс бэкенда page tables / page-table backend interface
//!   region  — список регионов (split/merge) / region list (split/merge)
//!   handler — обработчик адресного пространства / per-process address-space handler

pub mod pmm;
pub mod vmm;
pub mod region;
pub mod handler;

pub use handler::MemoryHandler;
pub use region::{Region, RegionId, RegionList};

use core::ops::{Add, Sub};

/// Размер страницы / Page size
pub const PAGE_SIZE: usize = 4096;

/// Нижняя граница пользовательского окна / Bottom of the user address window
pub const USERSPACE_BOTTOM: VirtAddr = VirtAddr::new(0x0000_0000_0000_1000);

/// Верхняя граница (не включительно) / Top of the user window (exclusive)
pub const USERSPACE_TOP: VirtAddr = VirtAddr::new(0x0000_7FFF_FFFF_F000);

/// Физический адрес / Physical address
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct PhysAddr(pub u64);

/// Виртуальный адрес / Virtual address
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct VirtAddr(pub u64);

impl PhysAddr {
    pub const fn new(addr: u64) -> Self { Self(addr) }
    pub const fn as_u64(self) -> u64   { self.0 }
}

impl VirtAddr {
    pub const fn new(addr: u64) -> Self { Self(addr) }
    pub const fn as_u64(self) -> u64   { self.0 }

    /// Выровнен ли адрес по странице / Is the address page aligned
    pub const fn is_page_aligned(self) -> bool {
        self.0 % PAGE_SIZE as u64 == 0
    }
}

impl Add<usize> for VirtAddr {
    type Output = VirtAddr;

    fn add(self, bytes: usize) -> VirtAddr {
        VirtAddr(self.0 + bytes as u64)
    }
}

/// Расстояние в байтах / Distance in bytes (`self` must not be below `rhs`)
impl Sub<VirtAddr> for VirtAddr {
    type Output = usize;

    fn sub(self, rhs: VirtAddr) -> usize {
        (self.0 - rhs.0) as usize
    }
}

/// Виртуальный диапазон / Virtual range `[base, base + size)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRange {
    pub base: VirtAddr,
    pub size: usize,
}

impl MemoryRange {
    pub const fn new(base: VirtAddr, size: usize) -> Self {
        Self { base, size }
    }

    pub fn end(&self) -> VirtAddr {
        self.base + self.size
    }

    pub fn contains(&self, addr: VirtAddr) -> bool {
        self.base <= addr && addr < self.end()
    }
}

/// Физический диапазон / Physical range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhysRange {
    pub base: PhysAddr,
    pub size: usize,
}

/// Число страниц, покрывающих `size` байт.
/// Number of pages covering `size` bytes.
pub const fn page_count(size: usize) -> usize {
    (size + PAGE_SIZE - 1) / PAGE_SIZE
}

pub const fn is_page_aligned(size: usize) -> bool {
    size % PAGE_SIZE == 0
}

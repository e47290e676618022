//! Virtual Memory backend — интерфейс / interface
//!
//! Архитектурно-зависимые page tables реализуют `VmmBackend`.
//! Arch-specific page tables implement `VmmBackend`.
//!
//! Ядро-ядро только резервирует адреса; маппинг делает бэкенд.
//! The core only reserves addresses; the backend does the mapping.

use bitflags::bitflags;
use crate::error::KernelResult;
use super::{MemoryRange, PhysRange};

bitflags! {
    /// Флаги маппинга / Mapping flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MemoryFlags: u32 {
        const READABLE   = 1 << 0;
        const WRITABLE   = 1 << 1;
        const EXECUTABLE = 1 << 2;
    }
}

bitflags! {
    /// POSIX защита (`PROT_*`) / POSIX protection bitmask
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Prot: i32 {
        const READ  = 0x1;
        const WRITE = 0x2;
        const EXEC  = 0x4;
    }
}

impl From<Prot> for MemoryFlags {
    fn from(prot: Prot) -> Self {
        let mut flags = MemoryFlags::empty();
        if prot.contains(Prot::READ)  { flags |= MemoryFlags::READABLE; }
        if prot.contains(Prot::WRITE) { flags |= MemoryFlags::WRITABLE; }
        if prot.contains(Prot::EXEC)  { flags |= MemoryFlags::EXECUTABLE; }
        flags
    }
}

/// Непрозрачный дескриптор адресного пространства (CR3 / TTBR0 / SATP).
/// Opaque address-space handle (CR3 / TTBR0 / SATP).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpaceHandle(pub u64);

/// Трейт для архитектурно-зависимых page tables.
/// Trait for arch-specific page table implementations.
pub trait VmmBackend: Send + Sync {
    fn create_space(&self) -> SpaceHandle;

    /// Освободить пространство после последнего владельца.
    /// Release a space once its last owner is gone.
    fn destroy_space(&self, space: SpaceHandle);

    fn map(&self, space: SpaceHandle, virt: MemoryRange, phys: PhysRange, flags: MemoryFlags)
        -> KernelResult<()>;

    /// Выделить и замаппить свежие страницы; возвращает число байт.
    /// Map freshly allocated pages; returns the number of bytes mapped.
    fn map_allocate(&self, space: SpaceHandle, virt: MemoryRange, flags: MemoryFlags)
        -> KernelResult<usize>;

    fn unmap(&self, space: SpaceHandle, virt: MemoryRange) -> KernelResult<()>;

    fn update_flags(&self, space: SpaceHandle, virt: MemoryRange, flags: MemoryFlags)
        -> KernelResult<()>;
}

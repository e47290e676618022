//! Physical Memory Manager — интерфейс / interface
//!
//! Сам аллокатор физических страниц живёт вне ядра-ядра; здесь только
//! контракт, который использует `MemoryHandler::allocate_memory_contiguous`.
//! The physical page allocator lives outside the core; this is the
//! contract `MemoryHandler::allocate_memory_contiguous` consumes.

use spin::Mutex;
use super::{PhysAddr, PAGE_SIZE};

/// Аллокатор физических страниц / Physical page allocator
pub trait PhysicalAllocator: Send + Sync {
    /// Выделить `count` подряд идущих страниц; `None` при исчерпании.
    /// Allocate `count` contiguous pages; `None` on exhaustion.
    fn allocate_pages(&self, count: usize) -> Option<PhysAddr>;
}

/// Линейный аллокатор поверх одного окна — для раннего запуска и тестов.
/// Linear allocator over a single window, for early boot and tests.
pub struct LinearFrameAllocator {
    window: Mutex<(u64, u64)>,
}

impl LinearFrameAllocator {
    pub const fn new(base: PhysAddr, pages: usize) -> Self {
        Self { window: Mutex::new((base.0, base.0 + (pages * PAGE_SIZE) as u64)) }
    }
}

impl PhysicalAllocator for LinearFrameAllocator {
    fn allocate_pages(&self, count: usize) -> Option<PhysAddr> {
        let mut window = self.window.lock();
        let (next, end) = *window;
        let bytes = (count * PAGE_SIZE) as u64;
        if end - next < bytes {
            return None;
        }
        window.0 = next + bytes;
        Some(PhysAddr::new(next))
    }
}

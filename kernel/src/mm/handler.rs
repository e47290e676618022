//! Обработчик адресного пространства / Address-space handler
//!
//! Один `MemoryHandler` на процесс (и один для ядра). Он владеет списком
//! регионов и дескриптором пространства бэкенда.
//! One `MemoryHandler` per process (plus one for the kernel). It owns the
//! region list and the backend's space handle.
//!
//! `allocate_region` / `free_region` только ведут учёт адресов; страницы
//! маппит бэкенд через `allocate_memory_*` / `map_physical`.
//! `allocate_region` / `free_region` only do address bookkeeping; pages are
//! mapped by the backend through `allocate_memory_*` / `map_physical`.

use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::Mutex;

use crate::error::{KernelError, KernelResult};
use super::pmm::PhysicalAllocator;
use super::region::{Region, RegionId, RegionList};
use super::vmm::{MemoryFlags, Prot, SpaceHandle, VmmBackend};
use super::{is_page_aligned, page_count, MemoryRange, PhysAddr, PhysRange, VirtAddr};

/// Размещение региона / Region placement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Адрес задаёт вызывающий / Caller-chosen base
    Fixed(VirtAddr),
    /// Адрес выбирает аллокатор / Allocator-chosen base
    Floating,
}

pub struct MemoryHandler {
    range:   MemoryRange,
    space:   SpaceHandle,
    vmm:     Arc<dyn VmmBackend>,
    regions: Mutex<RegionList>,
}

impl MemoryHandler {
    /// Обработчик над `[base, base+size)` с уже созданным пространством.
    /// Handler over `[base, base+size)` taking ownership of `space`.
    pub fn new(vmm: Arc<dyn VmmBackend>, space: SpaceHandle, base: VirtAddr, size: usize) -> Self {
        assert!(base.is_page_aligned() && is_page_aligned(size),
            "[mm] unaligned handler range {:#x}+{:#x}", base.0, size);
        log::debug!("[mm] handler {:?} over {:#x}..{:#x}", space, base.0, (base + size).0);
        Self {
            range: MemoryRange::new(base, size),
            space,
            vmm,
            regions: Mutex::new(RegionList::new(base, size)),
        }
    }

    /// То же, но пространство создаётся бэкендом.
    /// Same, with a fresh space obtained from the backend.
    pub fn with_new_space(vmm: Arc<dyn VmmBackend>, base: VirtAddr, size: usize) -> Self {
        let space = vmm.create_space();
        Self::new(vmm, space, base, size)
    }

    /// Глубокая копия списка регионов под новым пространством (fork).
    /// Deep copy of the region list under a new space (fork).
    pub fn clone_with_space(&self, space: SpaceHandle) -> Self {
        let regions = self.regions.lock().clone();
        log::debug!("[mm] cloned handler {:?} -> {:?} ({} regions)", self.space, space, regions.len());
        Self {
            range: self.range,
            space,
            vmm: self.vmm.clone(),
            regions: Mutex::new(regions),
        }
    }

    pub fn base(&self) -> VirtAddr { self.range.base }
    pub fn size(&self) -> usize { self.range.size }
    pub fn range(&self) -> MemoryRange { self.range }
    pub fn space(&self) -> SpaceHandle { self.space }

    pub fn region_count(&self) -> usize {
        self.regions.lock().len()
    }

    /// Снимок региона, содержащего `addr` / Snapshot of the region holding `addr`
    pub fn get_region(&self, addr: VirtAddr) -> Option<Region> {
        let regions = self.regions.lock();
        regions.lookup(addr).map(|id| *regions.get(id))
    }

    /// Снимок всего списка по порядку / Ordered snapshot of the whole list
    pub fn regions(&self) -> Vec<Region> {
        self.regions.lock().iter().map(|(_, region)| *region).collect()
    }

    /// Зарезервировать `size` байт адресного пространства.
    /// Reserve `size` bytes of address space.
    ///
    /// Фиксированный диапазон целиком вне обработчика — не наша забота:
    /// возвращается `base` без изменений списка.
    /// A fixed range lying fully outside the handler is not ours to track:
    /// `base` is returned and the list is left untouched.
    pub fn allocate_region(&self, placement: Placement, size: usize) -> KernelResult<VirtAddr> {
        assert!(is_page_aligned(size), "[mm] unaligned size {:#x}", size);
        if let Placement::Fixed(base) = placement {
            assert!(base.is_page_aligned(), "[mm] unaligned base {:#x}", base.0);
        }
        if size == 0 {
            return Err(KernelError::InvalidArgument);
        }

        let mut regions = self.regions.lock();

        let (target, base) = match placement {
            Placement::Fixed(base) => {
                let range = MemoryRange::new(base, size);
                let covering = match regions.lookup(base) {
                    Some(id) => id,
                    None if self.is_outside(range) => return Ok(base),
                    None => return Err(KernelError::InvalidArgument),
                };
                if range.end() > self.range.end() {
                    return Err(KernelError::InvalidArgument);
                }
                (Self::isolate(&mut regions, covering, range)?, base)
            }
            Placement::Floating => {
                let found = match regions.find_free(size) {
                    Some(id) => id,
                    None => {
                        log::warn!("[mm] {:?}: no free region for {:#x} bytes", self.space, size);
                        return Err(KernelError::OutOfMemory);
                    }
                };
                regions.split(found, size);
                (found, regions.get(found).base)
            }
        };

        Self::claim(&mut regions, target);
        debug_assert_eq!(regions.validate(), Ok(()));

        log::debug!("[mm] {:?}: allocated {:#x}+{:#x}", self.space, base.0, size);
        Ok(base)
    }

    /// Зарезервировать ровно `[base, base+size)`, только если он целиком
    /// свободен и лежит внутри обработчика. Занятые байты не поглощаются.
    /// Reserve exactly `[base, base+size)` only when all of it is free and
    /// inside the handler. Busy bytes are never taken over.
    pub fn reserve_unused(&self, base: VirtAddr, size: usize) -> KernelResult<VirtAddr> {
        assert!(base.is_page_aligned(), "[mm] unaligned base {:#x}", base.0);
        assert!(is_page_aligned(size), "[mm] unaligned size {:#x}", size);
        let range = MemoryRange::new(base, size);
        if size == 0 || !self.encloses(range) {
            return Err(KernelError::InvalidArgument);
        }

        let mut regions = self.regions.lock();
        let covering = regions.lookup(base).ok_or(KernelError::InvalidArgument)?;
        // Свободные соседи всегда склеены: свободный диапазон лежит в одном регионе.
        let region = regions.get(covering);
        if !region.is_free || region.end() < range.end() {
            return Err(KernelError::Busy);
        }
        let target = Self::isolate(&mut regions, covering, range)?;
        Self::claim(&mut regions, target);
        debug_assert_eq!(regions.validate(), Ok(()));

        log::debug!("[mm] {:?}: reserved {:#x}+{:#x}", self.space, base.0, size);
        Ok(base)
    }

    /// Вернуть ровно `[base, base+size)` в свободные.
    /// Return exactly `[base, base+size)` to the free pool.
    pub fn free_region(&self, base: VirtAddr, size: usize) -> KernelResult<()> {
        assert!(base.is_page_aligned(), "[mm] unaligned base {:#x}", base.0);
        assert!(is_page_aligned(size), "[mm] unaligned size {:#x}", size);
        if size == 0 {
            return Err(KernelError::InvalidArgument);
        }

        let range = MemoryRange::new(base, size);
        let mut regions = self.regions.lock();

        if range.end() > self.range.end() {
            return Err(KernelError::InvalidArgument);
        }
        let covering = regions.lookup(base).ok_or(KernelError::InvalidArgument)?;
        let target = Self::isolate(&mut regions, covering, range)?;
        Self::release(&mut regions, target);
        debug_assert_eq!(regions.validate(), Ok(()));

        log::debug!("[mm] {:?}: freed {:#x}+{:#x}", self.space, base.0, size);
        Ok(())
    }

    /// `range` целиком внутри обработчика / `range` lies fully inside the handler
    pub fn encloses(&self, range: MemoryRange) -> bool {
        range.base >= self.range.base && range.end() <= self.range.end()
    }

    fn is_outside(&self, range: MemoryRange) -> bool {
        range.end() <= self.range.base || range.base >= self.range.end()
    }

    /// Выделить в списке ровно `range` одним регионом.
    /// Carve `range` out of the list as a single region.
    ///
    /// Соседи обрезаются до конца диапазона перед слиянием, поэтому байты за
    /// его пределами сохраняют свой флаг.
    /// Successors are trimmed to the end of the range before being merged, so
    /// bytes outside it keep their flag.
    fn isolate(regions: &mut RegionList, covering: RegionId, range: MemoryRange) -> KernelResult<RegionId> {
        let prefix = range.base - regions.get(covering).base;
        let need = prefix + range.size;

        while regions.get(covering).size < need {
            let next = match regions.next(covering) {
                Some(next) => next,
                None => return Err(KernelError::InvalidArgument),
            };
            let missing = need - regions.get(covering).size;
            if missing < regions.get(next).size {
                regions.split(next, missing);
            }
            regions.merge(covering);
        }

        let target = regions.split(covering, prefix);
        regions.split(target, range.size);
        Ok(target)
    }

    /// Пометить занятым и слить с занятыми соседями (компактность списка).
    /// Mark busy and fold busy neighbours in to keep the list compact.
    fn claim(regions: &mut RegionList, target: RegionId) {
        if let Some(next) = regions.next(target) {
            if !regions.get(next).is_free {
                Self::merge_or_die(regions, target);
            }
        }

        regions.get_mut(target).is_free = false;

        if let Some(prev) = regions.prev(target) {
            if !regions.get(prev).is_free {
                Self::merge_or_die(regions, prev);
            }
        }
    }

    /// Пометить свободным и склеить со свободными соседями.
    /// Mark free and coalesce with free neighbours.
    fn release(regions: &mut RegionList, target: RegionId) {
        if let Some(next) = regions.next(target) {
            if regions.get(next).is_free {
                Self::merge_or_die(regions, target);
            }
        }

        regions.get_mut(target).is_free = true;

        let mut merged = target;
        if let Some(prev) = regions.prev(target) {
            if regions.get(prev).is_free {
                Self::merge_or_die(regions, prev);
                merged = prev;
            }
        }
        regions.set_last_free_hint(merged);
    }

    fn merge_or_die(regions: &mut RegionList, id: RegionId) {
        if regions.merge(id).is_none() {
            panic!("[mm] corrupt region list: region {:?} lost its successor", id);
        }
    }

    // ── Маппинг через бэкенд / Mapping through the backend ───────────────────

    /// Замаппить свежие страницы; возвращает число замапленных байт.
    /// Map fresh pages; returns the number of bytes mapped.
    pub fn allocate_memory_block(&self, base: VirtAddr, size: usize, prot: Prot) -> KernelResult<usize> {
        self.vmm.map_allocate(self.space, MemoryRange::new(base, size), MemoryFlags::from(prot))
    }

    /// Физически непрерывный блок / Physically contiguous block
    pub fn allocate_memory_contiguous(
        &self,
        base: VirtAddr,
        size: usize,
        prot: Prot,
        pmm: &dyn PhysicalAllocator,
    ) -> KernelResult<usize> {
        let phys = match pmm.allocate_pages(page_count(size)) {
            Some(phys) => phys,
            None => {
                log::warn!("[mm] {:?}: no physical pages for {:#x} bytes", self.space, size);
                return Err(KernelError::OutOfMemory);
            }
        };
        self.map_physical(phys, base, size, prot)?;
        Ok(size)
    }

    pub fn map_physical(&self, phys: PhysAddr, base: VirtAddr, size: usize, prot: Prot) -> KernelResult<()> {
        self.vmm.map(
            self.space,
            MemoryRange::new(base, size),
            PhysRange { base: phys, size },
            MemoryFlags::from(prot),
        )
    }

    pub fn unmap(&self, base: VirtAddr, size: usize) -> KernelResult<()> {
        let range = MemoryRange::new(base, size);
        if !self.encloses(range) {
            return Err(KernelError::InvalidArgument);
        }
        self.vmm.unmap(self.space, range)
    }

    pub fn protect(&self, base: VirtAddr, size: usize, prot: Prot) -> KernelResult<()> {
        self.vmm.update_flags(self.space, MemoryRange::new(base, size), MemoryFlags::from(prot))
    }
}

impl Drop for MemoryHandler {
    fn drop(&mut self) {
        log::debug!("[mm] releasing handler {:?}", self.space);
        self.vmm.destroy_space(self.space);
    }
}

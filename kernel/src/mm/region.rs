//! Список регионов / Region list
//!
//! Упорядоченный по адресу двусвязный список регионов, которые без
//! пересечений покрывают ровно диапазон одного обработчика.
//! Address-ordered doubly linked list of regions that partition exactly one
//! handler's range without overlaps.
//!
//! Узлы живут в арене слотов и ссылаются друг на друга индексами.
//! Nodes live in a slot arena and link to each other by index.
//!
//! Инварианты / Invariants:
//!   - регионы смежны и отсортированы / regions are contiguous and sorted
//!   - два свободных региона никогда не соседствуют (после allocate/free)
//!     no two free regions are adjacent (at allocate/free boundaries)
//!   - `len()` == длина списка / `len()` equals the list length

use alloc::vec::Vec;
use super::{page_count, MemoryRange, VirtAddr};

/// Стабильный индекс региона в арене / Stable index of a region in the arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RegionId(usize);

/// Регион виртуальной памяти / Virtual memory region
///
/// Снаружи `mm` только для чтения: менять границы и флаг может лишь список.
/// Read-only outside `mm`: only the list may change bounds or the flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub(super) base:        VirtAddr,
    pub(super) size:        usize,
    /// Кэш `ceil(size / PAGE_SIZE)` / Cached page count
    pub(super) block_count: usize,
    pub(super) is_free:     bool,
    prev: Option<RegionId>,
    next: Option<RegionId>,
}

impl Region {
    fn new(base: VirtAddr, size: usize, is_free: bool) -> Self {
        Self { base, size, block_count: page_count(size), is_free, prev: None, next: None }
    }

    pub fn base(&self) -> VirtAddr { self.base }
    pub fn size(&self) -> usize { self.size }
    pub fn block_count(&self) -> usize { self.block_count }
    pub fn is_free(&self) -> bool { self.is_free }

    pub fn end(&self) -> VirtAddr {
        self.base + self.size
    }

    pub fn range(&self) -> MemoryRange {
        MemoryRange::new(self.base, self.size)
    }

    pub fn contains(&self, addr: VirtAddr) -> bool {
        self.range().contains(addr)
    }

    pub fn prev(&self) -> Option<RegionId> { self.prev }
    pub fn next(&self) -> Option<RegionId> { self.next }

    fn set_size(&mut self, size: usize) {
        self.size = size;
        self.block_count = page_count(size);
    }
}

#[derive(Debug, Clone)]
enum Slot {
    Occupied(Region),
    /// Освобождённый слот — отравлен до повторного использования.
    /// Released slot, poisoned until it is reused.
    Vacant { next_vacant: Option<usize> },
}

/// Нарушение инварианта разбиения / Partition invariant violation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvariantViolation {
    Gap,
    Coverage,
    AdjacentFree,
    BrokenLink,
    CountMismatch,
}

/// Список регионов одного обработчика / Region list of one handler
///
/// `Clone` даёт полностью независимую глубокую копию: индексы остаются
/// валидными, потому что арена копируется целиком.
/// `Clone` is an independent deep copy; indices stay valid because the arena
/// is copied as a whole.
#[derive(Debug, Clone)]
pub struct RegionList {
    range:       MemoryRange,
    slots:       Vec<Slot>,
    first_vacant: Option<usize>,
    first:       Option<RegionId>,
    last_free:   Option<RegionId>,
    count:       usize,
}

impl RegionList {
    /// Один свободный регион на весь диапазон.
    /// A single free region spanning the whole range.
    pub fn new(base: VirtAddr, size: usize) -> Self {
        let mut list = Self {
            range: MemoryRange::new(base, size),
            slots: Vec::new(),
            first_vacant: None,
            first: None,
            last_free: None,
            count: 0,
        };
        let id = list.insert(Region::new(base, size, true));
        list.first = Some(id);
        list.last_free = Some(id);
        list.count = 1;
        list
    }

    pub fn range(&self) -> MemoryRange { self.range }
    pub fn len(&self) -> usize { self.count }
    pub fn is_empty(&self) -> bool { self.count == 0 }
    pub fn first(&self) -> Option<RegionId> { self.first }

    /// Подсказка для начала поиска, не авторитетна.
    /// Scan-start hint, never authoritative.
    pub fn last_free_hint(&self) -> Option<RegionId> { self.last_free }

    pub fn set_last_free_hint(&mut self, id: RegionId) {
        self.last_free = Some(id);
    }

    pub fn get(&self, id: RegionId) -> &Region {
        match self.slots.get(id.0) {
            Some(Slot::Occupied(region)) => region,
            _ => panic!("region slot {} used after release", id.0),
        }
    }

    pub(crate) fn get_mut(&mut self, id: RegionId) -> &mut Region {
        match self.slots.get_mut(id.0) {
            Some(Slot::Occupied(region)) => region,
            _ => panic!("region slot {} used after release", id.0),
        }
    }

    pub fn next(&self, id: RegionId) -> Option<RegionId> { self.get(id).next }
    pub fn prev(&self, id: RegionId) -> Option<RegionId> { self.get(id).prev }

    pub fn iter(&self) -> Regions<'_> {
        Regions { list: self, cursor: self.first }
    }

    fn insert(&mut self, region: Region) -> RegionId {
        match self.first_vacant {
            Some(index) => {
                if let Slot::Vacant { next_vacant } = self.slots[index] {
                    self.first_vacant = next_vacant;
                }
                self.slots[index] = Slot::Occupied(region);
                RegionId(index)
            }
            None => {
                self.slots.push(Slot::Occupied(region));
                RegionId(self.slots.len() - 1)
            }
        }
    }

    /// Разрезать регион на `[base, base+size)` и остаток.
    /// Split a region into `[base, base+size)` and the remainder.
    ///
    /// Возвращает вторую половину; при `size == 0` или `size >= region.size`
    /// ничего не делает и возвращает сам регион.
    /// Returns the new second half; when `size == 0` or `size >= region.size`
    /// nothing changes and `id` itself is returned.
    pub fn split(&mut self, id: RegionId, size: usize) -> RegionId {
        let region = *self.get(id);
        if size == 0 || size == region.size {
            return id;
        }
        if size > region.size {
            log::warn!("[mm] split of {:#x}+{:#x} at {:#x} ignored", region.base.0, region.size, size);
            return id;
        }

        let mut tail = Region::new(region.base + size, region.size - size, region.is_free);
        tail.prev = Some(id);
        tail.next = region.next;
        let tail_id = self.insert(tail);

        if let Some(next) = region.next {
            self.get_mut(next).prev = Some(tail_id);
        }
        let head = self.get_mut(id);
        head.next = Some(tail_id);
        head.set_size(size);

        self.count += 1;
        tail_id
    }

    /// Присоединить следующий регион к `id`. `None` — соседа нет.
    /// Absorb the successor into `id`. `None` when there is no successor.
    ///
    /// Флаг `is_free` остаётся флагом `id`.
    /// The merged region keeps the free flag of `id`.
    pub fn merge(&mut self, id: RegionId) -> Option<RegionId> {
        let from = self.get(id).next?;
        let absorbed = self.get(from).size;
        let region = self.get_mut(id);
        let size = region.size + absorbed;
        region.set_size(size);
        self.remove(from);
        Some(id)
    }

    /// Вынуть регион из списка и отравить слот.
    /// Unlink a region and poison its slot.
    pub fn remove(&mut self, id: RegionId) {
        let region = *self.get(id);

        match region.prev {
            Some(prev) => self.get_mut(prev).next = region.next,
            None => self.first = region.next,
        }
        if let Some(next) = region.next {
            self.get_mut(next).prev = region.prev;
        }
        if self.last_free == Some(id) {
            self.last_free = region.prev.or(region.next);
        }

        self.slots[id.0] = Slot::Vacant { next_vacant: self.first_vacant };
        self.first_vacant = Some(id.0);
        self.count -= 1;
    }

    /// Регион, содержащий `addr`, либо `None` вне диапазона.
    /// Region containing `addr`, or `None` outside the handled range.
    pub fn lookup(&self, addr: VirtAddr) -> Option<RegionId> {
        if !self.range.contains(addr) {
            return None;
        }
        self.iter().find(|(_, region)| region.contains(addr)).map(|(id, _)| id)
    }

    /// Первый свободный регион не меньше `size`, начиная с подсказки и
    /// обходя весь цикл.
    /// First free region of at least `size`, scanning from the hint around
    /// the whole cycle.
    pub fn find_free(&self, size: usize) -> Option<RegionId> {
        let start = self.last_free.or(self.first)?;
        let mut cursor = start;
        for _ in 0..self.count {
            let region = self.get(cursor);
            if region.is_free && region.size >= size {
                return Some(cursor);
            }
            cursor = match region.next.or(self.first) {
                Some(next) => next,
                None => break,
            };
        }
        None
    }

    /// Проверить инвариант разбиения / Check the partition invariant
    pub fn validate(&self) -> Result<(), InvariantViolation> {
        let mut expected = self.range.base;
        let mut prev: Option<RegionId> = None;
        let mut prev_free = false;
        let mut seen = 0;

        let mut cursor = self.first;
        while let Some(id) = cursor {
            let region = self.get(id);
            if region.prev != prev {
                return Err(InvariantViolation::BrokenLink);
            }
            if region.base != expected || region.size == 0 {
                return Err(InvariantViolation::Gap);
            }
            if prev_free && region.is_free {
                return Err(InvariantViolation::AdjacentFree);
            }
            seen += 1;
            if seen > self.count {
                return Err(InvariantViolation::CountMismatch);
            }
            expected = region.end();
            prev_free = region.is_free;
            prev = Some(id);
            cursor = region.next;
        }

        if seen != self.count {
            return Err(InvariantViolation::CountMismatch);
        }
        if expected != self.range.end() {
            return Err(InvariantViolation::Coverage);
        }
        Ok(())
    }
}

/// Итератор по регионам в порядке адресов / Iterator in address order
pub struct Regions<'a> {
    list:   &'a RegionList,
    cursor: Option<RegionId>,
}

impl<'a> Iterator for Regions<'a> {
    type Item = (RegionId, &'a Region);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.cursor?;
        let region = self.list.get(id);
        self.cursor = region.next;
        Some((id, region))
    }
}

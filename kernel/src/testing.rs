//! Бэкенды в памяти для unit-тестов / In-memory backends for unit tests

use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use spin::Mutex;

use crate::error::{KernelError, KernelResult};
use crate::mm::vmm::{MemoryFlags, SpaceHandle, VmmBackend};
use crate::mm::{MemoryRange, PhysRange, VirtAddr, PAGE_SIZE};
use crate::sched::context::{Arguments, ContextBackend, ContextFlags, ContextHandle};

#[derive(Default)]
struct VmmState {
    next_space: u64,
    destroyed:  Vec<SpaceHandle>,
    pages:      BTreeMap<(u64, u64), MemoryFlags>,
    fail_maps:  bool,
}

/// Page tables как таблица `(space, page) -> flags`.
#[derive(Default)]
pub struct MockVmm {
    state: Mutex<VmmState>,
}

impl MockVmm {
    pub fn destroyed(&self) -> Vec<SpaceHandle> {
        self.state.lock().destroyed.clone()
    }

    /// Маппинг успевает положить первую страницу и падает с `OutOfMemory`.
    /// Mapping lays down the first page, then fails with `OutOfMemory`.
    pub fn fail_maps(&self, fail: bool) {
        self.state.lock().fail_maps = fail;
    }

    pub fn flags_at(&self, space: SpaceHandle, addr: VirtAddr) -> Option<MemoryFlags> {
        let page = addr.0 & !(PAGE_SIZE as u64 - 1);
        self.state.lock().pages.get(&(space.0, page)).copied()
    }

    fn pages(range: MemoryRange) -> impl Iterator<Item = u64> {
        (range.base.0..range.end().0).step_by(PAGE_SIZE)
    }
}

impl VmmBackend for MockVmm {
    fn create_space(&self) -> SpaceHandle {
        let mut state = self.state.lock();
        state.next_space += 1;
        SpaceHandle(state.next_space)
    }

    fn destroy_space(&self, space: SpaceHandle) {
        let mut state = self.state.lock();
        state.pages.retain(|(owner, _), _| *owner != space.0);
        state.destroyed.push(space);
    }

    fn map(&self, space: SpaceHandle, virt: MemoryRange, _phys: PhysRange, flags: MemoryFlags)
        -> KernelResult<()>
    {
        self.map_allocate(space, virt, flags).map(|_| ())
    }

    fn map_allocate(&self, space: SpaceHandle, virt: MemoryRange, flags: MemoryFlags)
        -> KernelResult<usize>
    {
        let mut state = self.state.lock();
        for page in Self::pages(virt) {
            state.pages.insert((space.0, page), flags);
            if state.fail_maps {
                return Err(KernelError::OutOfMemory);
            }
        }
        Ok(virt.size)
    }

    fn unmap(&self, space: SpaceHandle, virt: MemoryRange) -> KernelResult<()> {
        let mut state = self.state.lock();
        for page in Self::pages(virt) {
            state.pages.remove(&(space.0, page));
        }
        Ok(())
    }

    fn update_flags(&self, space: SpaceHandle, virt: MemoryRange, flags: MemoryFlags)
        -> KernelResult<()>
    {
        let mut state = self.state.lock();
        for page in Self::pages(virt) {
            match state.pages.get_mut(&(space.0, page)) {
                Some(entry) => *entry = flags,
                None => return Err(KernelError::InvalidArgument),
            }
        }
        Ok(())
    }
}

/// «Аппаратный» кадр: просто номер потока, чьи регистры в нём лежат.
/// A fake hardware frame: the tag of whoever's registers it holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Frame {
    pub tag: u64,
}

#[derive(Default)]
struct ContextState {
    next:      u64,
    saved:     BTreeMap<u64, u64>,
    started:   BTreeMap<u64, (SpaceHandle, ContextFlags)>,
    destroyed: Vec<ContextHandle>,
}

/// Контекст хранит тег кадра; `start` записывает адрес входа как тег.
/// A context stores a frame tag; `start` uses the entry point as the tag.
#[derive(Default)]
pub struct MockContexts {
    state: Mutex<ContextState>,
}

impl MockContexts {
    pub fn destroyed(&self) -> Vec<ContextHandle> {
        self.state.lock().destroyed.clone()
    }

    pub fn started(&self, ctx: ContextHandle) -> Option<(SpaceHandle, ContextFlags)> {
        self.state.lock().started.get(&ctx.0).copied()
    }
}

impl ContextBackend for MockContexts {
    type Frame = Frame;

    fn create(&self) -> ContextHandle {
        let mut state = self.state.lock();
        state.next += 1;
        ContextHandle(state.next)
    }

    fn destroy(&self, ctx: ContextHandle) {
        let mut state = self.state.lock();
        state.saved.remove(&ctx.0);
        state.destroyed.push(ctx);
    }

    fn start(
        &self,
        ctx: ContextHandle,
        space: SpaceHandle,
        entry: VirtAddr,
        _stack: VirtAddr,
        _args: &Arguments,
        flags: ContextFlags,
    ) {
        let mut state = self.state.lock();
        state.saved.insert(ctx.0, entry.0);
        state.started.insert(ctx.0, (space, flags));
    }

    fn save(&self, ctx: ContextHandle, frame: &Frame) {
        self.state.lock().saved.insert(ctx.0, frame.tag);
    }

    fn restore(&self, ctx: ContextHandle, frame: &mut Frame) {
        if let Some(tag) = self.state.lock().saved.get(&ctx.0) {
            frame.tag = *tag;
        }
    }
}

//! Жизненный цикл через публичный API / Lifecycle through the public API

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use cupruxos_core::mm::handler::Placement;
use cupruxos_core::mm::vmm::{MemoryFlags, SpaceHandle, VmmBackend};
use cupruxos_core::mm::{MemoryHandler, MemoryRange, PhysRange, VirtAddr, PAGE_SIZE};
use cupruxos_core::sched::context::{Arguments, ContextBackend, ContextFlags, ContextHandle};
use cupruxos_core::sched::process::ProcessKind;
use cupruxos_core::sched::thread::ThreadId;
use cupruxos_core::sched::{CpuSlot, Scheduler, Switch};
use cupruxos_core::{KernelError, KernelResult};

#[derive(Default)]
struct Spaces {
    next:      AtomicU64,
    destroyed: Mutex<BTreeSet<u64>>,
    /// Страницы кончились / Out of pages
    exhausted: AtomicBool,
}

impl VmmBackend for Spaces {
    fn create_space(&self) -> SpaceHandle {
        SpaceHandle(self.next.fetch_add(1, Ordering::Relaxed) + 1)
    }
    fn destroy_space(&self, space: SpaceHandle) {
        self.destroyed.lock().unwrap().insert(space.0);
    }
    fn map(&self, _: SpaceHandle, _: MemoryRange, _: PhysRange, _: MemoryFlags) -> KernelResult<()> {
        Ok(())
    }
    fn map_allocate(&self, _: SpaceHandle, virt: MemoryRange, _: MemoryFlags) -> KernelResult<usize> {
        if self.exhausted.load(Ordering::Relaxed) {
            return Err(KernelError::OutOfMemory);
        }
        Ok(virt.size)
    }
    fn unmap(&self, _: SpaceHandle, _: MemoryRange) -> KernelResult<()> {
        Ok(())
    }
    fn update_flags(&self, _: SpaceHandle, _: MemoryRange, _: MemoryFlags) -> KernelResult<()> {
        Ok(())
    }
}

/// Кадр хранит только «регистр» с адресом входа / The frame is one register
#[derive(Default)]
struct Frame(u64);

#[derive(Default)]
struct Contexts {
    next:  AtomicU64,
    saved: Mutex<Vec<(u64, u64)>>,
}

impl Contexts {
    fn slot(&self, ctx: ContextHandle) -> u64 {
        self.saved.lock().unwrap().iter().find(|(c, _)| *c == ctx.0).map_or(0, |(_, v)| *v)
    }
    fn set(&self, ctx: ContextHandle, value: u64) {
        let mut saved = self.saved.lock().unwrap();
        saved.retain(|(c, _)| *c != ctx.0);
        saved.push((ctx.0, value));
    }
}

impl ContextBackend for Contexts {
    type Frame = Frame;

    fn create(&self) -> ContextHandle {
        ContextHandle(self.next.fetch_add(1, Ordering::Relaxed))
    }
    fn destroy(&self, _: ContextHandle) {}
    fn start(&self, ctx: ContextHandle, _: SpaceHandle, entry: VirtAddr, _: VirtAddr,
             _: &Arguments, _: ContextFlags) {
        self.set(ctx, entry.as_u64());
    }
    fn save(&self, ctx: ContextHandle, frame: &Frame) {
        self.set(ctx, frame.0);
    }
    fn restore(&self, ctx: ContextHandle, frame: &mut Frame) {
        frame.0 = self.slot(ctx);
    }
}

fn layout(handler: &MemoryHandler) -> Vec<(u64, usize, bool)> {
    handler.regions().iter().map(|r| (r.base().as_u64(), r.size(), r.is_free())).collect()
}

fn scheduler(cpus: usize) -> (Arc<Spaces>, Scheduler<Contexts>) {
    let spaces = Arc::new(Spaces::default());
    let sched = Scheduler::new(Contexts::default(), spaces.clone(), cpus);
    (spaces, sched)
}

#[test]
fn four_page_window() {
    let spaces = Arc::new(Spaces::default());
    let handler = MemoryHandler::with_new_space(spaces, VirtAddr::new(0x1000), 4 * PAGE_SIZE);

    let a = handler.allocate_region(Placement::Floating, PAGE_SIZE).unwrap();
    let b = handler.allocate_region(Placement::Floating, 2 * PAGE_SIZE).unwrap();
    assert_eq!((a, b), (VirtAddr::new(0x1000), VirtAddr::new(0x2000)));
    assert_eq!(handler.region_count(), 2);

    assert_eq!(
        handler.allocate_region(Placement::Floating, 2 * PAGE_SIZE),
        Err(KernelError::OutOfMemory),
    );

    handler.free_region(a, PAGE_SIZE).unwrap();
    handler.free_region(b, 2 * PAGE_SIZE).unwrap();
    assert_eq!(handler.region_count(), 1);
    assert_eq!(
        handler.allocate_region(Placement::Floating, 4 * PAGE_SIZE),
        Ok(VirtAddr::new(0x1000)),
    );
}

#[test]
fn round_robin_is_fair() {
    let (_spaces, sched) = scheduler(1);
    let process = sched.create_process(ProcessKind::Exec);
    let tids: Vec<ThreadId> = [0x10_0000u64, 0x20_0000, 0x30_0000]
        .iter()
        .map(|&entry| {
            let tid = sched.create_thread_with_stack(&process, VirtAddr::new(entry)).unwrap();
            sched.launch_thread(tid, &Arguments::new(&[entry])).unwrap();
            tid
        })
        .collect();

    let mut frame = Frame::default();
    let mut order = Vec::new();
    for _ in 0..6 {
        match sched.handle_interrupt(0, &mut frame) {
            Switch::Resumed(tid) => order.push((tid, frame.0)),
            other => panic!("unexpected {:?}", other),
        }
    }
    let picked: Vec<ThreadId> = order.iter().map(|(tid, _)| *tid).collect();
    assert_eq!(&picked[..3], &tids[..]);
    assert_eq!(&picked[3..], &tids[..]);
    assert_eq!(order[0].1, 0x10_0000);
}

#[test]
fn saved_frame_survives_a_round() {
    let (_spaces, sched) = scheduler(1);
    let process = sched.create_process(ProcessKind::Exec);
    let first = sched.create_thread_with_stack(&process, VirtAddr::new(0x1_0000)).unwrap();
    let second = sched.create_thread_with_stack(&process, VirtAddr::new(0x2_0000)).unwrap();
    sched.launch_thread(first, &Arguments::default()).unwrap();
    sched.launch_thread(second, &Arguments::default()).unwrap();

    let mut frame = Frame::default();
    assert_eq!(sched.handle_interrupt(0, &mut frame), Switch::Resumed(first));
    frame.0 = 0xdead;
    assert_eq!(sched.handle_interrupt(0, &mut frame), Switch::Resumed(second));
    assert_eq!(frame.0, 0x2_0000);
    assert_eq!(sched.handle_interrupt(0, &mut frame), Switch::Resumed(first));
    assert_eq!(frame.0, 0xdead);
}

#[test]
fn process_teardown_releases_space() {
    let (spaces, sched) = scheduler(2);
    let process = sched.create_process(ProcessKind::Exec);
    let space = process.memory().space();
    let tid = sched.create_thread_with_stack(&process, VirtAddr::new(0x40_0000)).unwrap();
    sched.launch_thread(tid, &Arguments::default()).unwrap();

    let mut frame = Frame::default();
    assert_eq!(sched.handle_interrupt(1, &mut frame), Switch::Resumed(tid));
    assert_eq!(sched.free_process(process.clone()), Err(KernelError::Busy));

    // Исполняемый поток снимается на следующем тике своего CPU.
    sched.free_thread(tid).unwrap();
    assert_eq!(sched.current(1), CpuSlot::Running(tid));
    assert_eq!(sched.handle_interrupt(1, &mut frame), Switch::Idle);
    assert_eq!(sched.current(1), CpuSlot::Idle);
    assert_eq!(sched.thread_state(tid), None);

    sched.free_process(process.clone()).unwrap();
    assert!(!spaces.destroyed.lock().unwrap().contains(&space.0));
    drop(process);
    assert!(spaces.destroyed.lock().unwrap().contains(&space.0));
}

#[test]
fn stack_allocation_failure_leaves_no_trace() {
    let (spaces, sched) = scheduler(1);
    let process = sched.create_process(ProcessKind::Exec);
    let before = layout(process.memory());

    spaces.exhausted.store(true, Ordering::Relaxed);
    assert_eq!(
        sched.create_thread_with_stack(&process, VirtAddr::new(0x40_0000)),
        Err(KernelError::OutOfMemory),
    );
    assert_eq!(layout(process.memory()), before);
    assert_eq!(process.thread_count(), 0);

    spaces.exhausted.store(false, Ordering::Relaxed);
    let tid = sched.create_thread_with_stack(&process, VirtAddr::new(0x40_0000)).unwrap();
    assert_eq!(process.entry_thread(), Some(tid));
}

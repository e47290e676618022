//! Scheduler — round-robin над одной кольцевой очередью
//! Scheduler — round-robin over a single circular run queue
//!
//! Вытеснение только по прерыванию: поток отдаёт CPU лишь в
//! `handle_interrupt`. Очередь одна на все ядра.
//! Preemption is interrupt driven: a thread only leaves the CPU inside
//! `handle_interrupt`. One queue is shared by every core.
//!
//! Блокировка очереди в прерывании берётся через `try_lock`: если она
//! занята (вложенное прерывание, `launch_thread` на другом ядре), кадр
//! остаётся нетронутым, а переключение ждёт следующего тика.
//! The interrupt path takes the queue lock with `try_lock`: when it is held
//! (nested interrupt, `launch_thread` on another core) the frame is left
//! untouched and the switch waits for the next tick.

pub mod context;
pub mod process;
pub mod run_queue;
pub mod thread;

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};
use spin::Mutex;

use crate::error::{KernelError, KernelResult};
use crate::mm::handler::Placement;
use crate::mm::vmm::{Prot, VmmBackend};
use crate::mm::{MemoryHandler, VirtAddr, USERSPACE_BOTTOM, USERSPACE_TOP};
use crate::{MAX_CPUS, PROCESS_STACK_SIZE};

use context::{Arguments, ContextBackend};
use process::{Process, ProcessId, ProcessKind, KERNEL_VFS_CTX};
use run_queue::RunQueue;
use thread::{Thread, ThreadId, ThreadState};

/// Номер логического CPU / Logical CPU index
pub type CpuId = usize;

/// Что исполняет CPU / What a CPU is executing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuSlot {
    /// Нечего исполнять: кадр прерывания оставлен как есть.
    /// Nothing runnable: the interrupted frame is left as is.
    Idle,
    Running(ThreadId),
}

/// Итог одного прерывания планировщика / Outcome of one scheduling interrupt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Switch {
    /// Очередь занята — ничего не сделано / Queue lock busy, nothing done
    Contended,
    /// Очередь пуста / Run queue empty
    Idle,
    /// В кадр загружен контекст потока / Frame now holds this thread's context
    Resumed(ThreadId),
}

struct SchedState {
    queue:   RunQueue,
    threads: BTreeMap<ThreadId, Thread>,
    cpus:    Vec<CpuSlot>,
}

impl SchedState {
    fn on_cpu(&self, tid: ThreadId) -> bool {
        self.cpus.contains(&CpuSlot::Running(tid))
    }

    fn thread_mut(&mut self, tid: ThreadId) -> KernelResult<&mut Thread> {
        self.threads.get_mut(&tid).ok_or(KernelError::NotFound)
    }
}

pub struct Scheduler<C: ContextBackend> {
    contexts: C,
    vmm:      Arc<dyn VmmBackend>,
    state:    Mutex<SchedState>,
    next_tid: AtomicU64,
    next_pid: AtomicU64,
    kernel:   Arc<Process>,
}

impl<C: ContextBackend> Scheduler<C> {
    /// Создать планировщик и процесс ядра (хост модулей).
    /// Build the scheduler together with the kernel (module host) process.
    pub fn new(contexts: C, vmm: Arc<dyn VmmBackend>, cpu_count: usize) -> Self {
        assert!(cpu_count > 0 && cpu_count <= MAX_CPUS, "[sched] bad cpu count {}", cpu_count);

        let kernel = Arc::new(Self::build_process(&vmm, ProcessId(0), ProcessKind::ModuleHost));
        log::info!("[sched] ready: {} cpu(s), kernel process {:?}", cpu_count, kernel.id());

        Self {
            contexts,
            vmm,
            state: Mutex::new(SchedState {
                queue: RunQueue::new(),
                threads: BTreeMap::new(),
                cpus: vec![CpuSlot::Idle; cpu_count],
            }),
            next_tid: AtomicU64::new(1),
            next_pid: AtomicU64::new(1),
            kernel,
        }
    }

    fn build_process(vmm: &Arc<dyn VmmBackend>, id: ProcessId, kind: ProcessKind) -> Process {
        let memory = MemoryHandler::with_new_space(
            vmm.clone(),
            USERSPACE_BOTTOM,
            USERSPACE_TOP - USERSPACE_BOTTOM,
        );
        Process::new(id, kind, KERNEL_VFS_CTX, memory)
    }

    pub fn contexts(&self) -> &C { &self.contexts }
    pub fn kernel_process(&self) -> &Arc<Process> { &self.kernel }

    // ── Прерывание / Interrupt ───────────────────────────────────────────────

    /// Точка входа прерывания планировщика для `cpu`.
    /// Scheduling interrupt entry point for `cpu`.
    pub fn handle_interrupt(&self, cpu: CpuId, frame: &mut C::Frame) -> Switch {
        let mut guard = match self.state.try_lock() {
            Some(guard) => guard,
            None => {
                log::trace!("[sched] cpu {}: queue busy, switch deferred", cpu);
                return Switch::Contended;
            }
        };
        let state = &mut *guard;

        let mut reaped = None;
        let previous = state.cpus[cpu];
        if let CpuSlot::Running(tid) = previous {
            state.cpus[cpu] = CpuSlot::Idle;
            let mut exited = false;
            if let Some(thread) = state.threads.get_mut(&tid) {
                match thread.state {
                    ThreadState::Running => {
                        self.contexts.save(thread.context, frame);
                        thread.state = ThreadState::Ready;
                        state.queue.enqueue(tid);
                    }
                    ThreadState::Blocked => self.contexts.save(thread.context, frame),
                    ThreadState::Exited => exited = true,
                    ThreadState::Created | ThreadState::Ready => {
                        panic!("[sched] cpu {} was running {:?} in state {:?}", cpu, tid, thread.state)
                    }
                }
            }
            if exited {
                reaped = state.threads.remove(&tid);
            }
        }

        let switch = match state.queue.select_next() {
            Some(next) => {
                let thread = match state.threads.get_mut(&next) {
                    Some(thread) => thread,
                    None => panic!("[sched] queued thread {:?} has no record", next),
                };
                self.contexts.restore(thread.context, frame);
                thread.state = ThreadState::Running;
                state.cpus[cpu] = CpuSlot::Running(next);
                log::trace!("[sched] cpu {} -> {:?}", cpu, next);
                Switch::Resumed(next)
            }
            None => Switch::Idle,
        };

        drop(guard);
        if let Some(thread) = reaped {
            self.reap(thread);
        }
        switch
    }

    // ── Процессы / Processes ─────────────────────────────────────────────────

    /// Процесс с обработчиком на всё пользовательское окно.
    /// Process whose handler spans the whole user window.
    pub fn create_process(&self, kind: ProcessKind) -> Arc<Process> {
        let id = ProcessId(self.next_pid.fetch_add(1, Ordering::Relaxed));
        let process = Self::build_process(&self.vmm, id, kind);
        log::debug!("[sched] created process {:?} ({:?})", id, kind);
        Arc::new(process)
    }

    /// Копия процесса с независимым списком регионов (fork).
    /// Duplicate a process with an independent region list (fork).
    pub fn clone_process(&self, parent: &Process) -> Arc<Process> {
        let id = ProcessId(self.next_pid.fetch_add(1, Ordering::Relaxed));
        let memory = parent.memory().clone_with_space(self.vmm.create_space());
        log::debug!("[sched] cloned process {:?} -> {:?}", parent.id(), id);
        Arc::new(Process::new(id, parent.kind(), parent.vfs_ctx(), memory))
    }

    /// Уничтожить процесс без потоков. Адресное пространство уходит вместе
    /// с последней ссылкой на процесс.
    /// Destroy a thread-less process. Its address space goes away with the
    /// last reference to the process.
    pub fn free_process(&self, process: Arc<Process>) -> KernelResult<()> {
        if Arc::ptr_eq(&process, &self.kernel) {
            return Err(KernelError::InvalidArgument);
        }
        if !process.try_kill() {
            log::warn!("[sched] process {:?} still has {} thread(s)", process.id(), process.thread_count());
            return Err(KernelError::Busy);
        }
        log::debug!("[sched] freed process {:?}", process.id());
        Ok(())
    }

    // ── Потоки / Threads ─────────────────────────────────────────────────────

    /// Создать поток; в очередь он попадает только в `launch_thread`.
    /// Create a thread; it is queued only by `launch_thread`.
    pub fn create_thread(&self, process: &Arc<Process>, entry: VirtAddr, stack: VirtAddr)
        -> KernelResult<ThreadId>
    {
        let tid = ThreadId(self.next_tid.fetch_add(1, Ordering::Relaxed));
        if !process.attach_thread(tid) {
            return Err(KernelError::InvalidArgument);
        }
        let context = self.contexts.create();
        let thread = Thread::new(tid, context, process.clone(), entry, stack);

        self.state.lock().threads.insert(tid, thread);
        log::debug!("[sched] created thread {:?} in {:?} at {:#x}", tid, process.id(), entry.0);
        Ok(tid)
    }

    /// Поток со своим стеком `PROCESS_STACK_SIZE` в пространстве процесса.
    /// Thread with its own `PROCESS_STACK_SIZE` stack inside the process space.
    pub fn create_thread_with_stack(&self, process: &Arc<Process>, entry: VirtAddr)
        -> KernelResult<ThreadId>
    {
        let memory = process.memory();
        let base = memory.allocate_region(Placement::Floating, PROCESS_STACK_SIZE)?;
        let created = memory
            .allocate_memory_block(base, PROCESS_STACK_SIZE, Prot::READ | Prot::WRITE)
            .and_then(|_| self.create_thread(process, entry, base + PROCESS_STACK_SIZE));
        if created.is_err() {
            memory.unmap(base, PROCESS_STACK_SIZE).ok();
            memory.free_region(base, PROCESS_STACK_SIZE)?;
        }
        created
    }

    /// Первая инициализация контекста и постановка в очередь.
    /// First context initialisation, then enqueue.
    pub fn launch_thread(&self, tid: ThreadId, args: &Arguments) -> KernelResult<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let thread = state.thread_mut(tid)?;
        if thread.state != ThreadState::Created {
            return Err(KernelError::InvalidArgument);
        }

        self.contexts.start(
            thread.context,
            thread.process.memory().space(),
            thread.entry,
            thread.stack,
            args,
            thread.process.ctx_flags(),
        );
        thread.state = ThreadState::Ready;
        state.queue.enqueue(tid);
        log::debug!("[sched] launched {:?}", tid);
        Ok(())
    }

    /// Завершить поток. Исполняемый поток снимается при следующем
    /// прерывании на его CPU.
    /// Terminate a thread. A thread that is executing is reaped on the next
    /// interrupt of its CPU.
    pub fn free_thread(&self, tid: ThreadId) -> KernelResult<()> {
        let mut guard = self.state.lock();
        let on_cpu = guard.on_cpu(tid);
        let thread = guard.thread_mut(tid)?;

        match thread.state {
            ThreadState::Exited => return Ok(()),
            _ if on_cpu => {
                thread.state = ThreadState::Exited;
                return Ok(());
            }
            ThreadState::Ready => {
                guard.queue.dequeue(tid);
            }
            _ => {}
        }

        let thread = guard.threads.remove(&tid);
        drop(guard);
        if let Some(thread) = thread {
            self.reap(thread);
        }
        Ok(())
    }

    fn reap(&self, thread: Thread) {
        self.contexts.destroy(thread.context);
        thread.process.detach_thread(thread.id);
        log::debug!("[sched] reaped {:?}", thread.id);
    }

    /// Снять поток с очереди до `unblock` / Park a thread until `unblock`
    pub fn block(&self, tid: ThreadId) -> KernelResult<()> {
        let mut guard = self.state.lock();
        let thread = guard.thread_mut(tid)?;
        match thread.state {
            ThreadState::Ready => {
                thread.state = ThreadState::Blocked;
                guard.queue.dequeue(tid);
            }
            ThreadState::Running => thread.state = ThreadState::Blocked,
            ThreadState::Blocked => {}
            ThreadState::Created | ThreadState::Exited => return Err(KernelError::InvalidArgument),
        }
        Ok(())
    }

    /// Вернуть припаркованный поток в очередь. Если он ещё не снят с CPU,
    /// он просто продолжает исполняться.
    /// Return a parked thread to the queue. If it has not left its CPU yet it
    /// simply keeps running.
    pub fn unblock(&self, tid: ThreadId) -> KernelResult<()> {
        let mut guard = self.state.lock();
        let on_cpu = guard.on_cpu(tid);
        let thread = guard.thread_mut(tid)?;
        if thread.state != ThreadState::Blocked {
            return Ok(());
        }
        if on_cpu {
            thread.state = ThreadState::Running;
        } else {
            thread.state = ThreadState::Ready;
            guard.queue.enqueue(tid);
        }
        Ok(())
    }

    // ── Наблюдение / Inspection ──────────────────────────────────────────────

    pub fn thread_state(&self, tid: ThreadId) -> Option<ThreadState> {
        self.state.lock().threads.get(&tid).map(|thread| thread.state)
    }

    pub fn current(&self, cpu: CpuId) -> CpuSlot {
        self.state.lock().cpus[cpu]
    }

    /// Очередь от головы к хвосту / Queue from head to tail
    pub fn runnable(&self) -> Vec<ThreadId> {
        self.state.lock().queue.iter().collect()
    }

    pub fn process_of(&self, tid: ThreadId) -> Option<Arc<Process>> {
        self.state.lock().threads.get(&tid).map(|thread| thread.process.clone())
    }
}

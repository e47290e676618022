//! Поток — единица планирования / Thread, the unit of scheduling

use alloc::sync::Arc;

use crate::mm::VirtAddr;
use super::context::ContextHandle;
use super::process::Process;

/// Идентификатор потока / Thread identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(pub u64);

/// Состояние потока / Thread state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Создан, но не запущен / Created, not launched yet
    Created,
    /// В очереди готовых / In the run queue
    Ready,
    /// Исполняется на CPU / Executing on a CPU
    Running,
    /// Ждёт события вне очереди / Parked outside the run queue
    Blocked,
    /// Завершён; ждёт снятия с CPU / Terminated, waiting to be switched out
    Exited,
}

pub struct Thread {
    pub id:      ThreadId,
    pub context: ContextHandle,
    /// Процесс переживает свои потоки / The process outlives its threads
    pub process: Arc<Process>,
    pub entry:   VirtAddr,
    pub stack:   VirtAddr,
    pub state:   ThreadState,
}

impl Thread {
    pub fn new(
        id: ThreadId,
        context: ContextHandle,
        process: Arc<Process>,
        entry: VirtAddr,
        stack: VirtAddr,
    ) -> Self {
        Self { id, context, process, entry, stack, state: ThreadState::Created }
    }
}

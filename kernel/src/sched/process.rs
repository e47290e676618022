//! Процесс — домен защиты / Process, the protection domain
//!
//! Процесс владеет своим `MemoryHandler`. Потоки держат `Arc<Process>`,
//! поэтому адресное пространство освобождается только после последнего
//! потока и последней внешней ссылки.
//! A process owns its `MemoryHandler`. Threads hold an `Arc<Process>`, so
//! the address space is released only after the last thread and the last
//! outside reference are gone.

use spin::Mutex;

use crate::mm::MemoryHandler;
use super::context::ContextFlags;
use super::thread::ThreadId;

/// Идентификатор процесса / Process identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(pub u64);

/// Тип процесса / Process kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessKind {
    /// Пользовательская программа / User executable
    Exec,
    /// Хост модулей ядра / Kernel module host
    ModuleHost,
}

/// Непрозрачный контекст VFS (текущий каталог, точки монтирования).
/// Opaque VFS context (cwd, mount view).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VfsContext(pub u64);

pub const KERNEL_VFS_CTX: VfsContext = VfsContext(0);

#[derive(Debug)]
struct ProcessData {
    entry_thread: Option<ThreadId>,
    threads:      usize,
    dead:         bool,
}

pub struct Process {
    id:        ProcessId,
    kind:      ProcessKind,
    ctx_flags: ContextFlags,
    vfs_ctx:   VfsContext,
    memory:    MemoryHandler,
    data:      Mutex<ProcessData>,
}

impl Process {
    pub fn new(id: ProcessId, kind: ProcessKind, vfs_ctx: VfsContext, memory: MemoryHandler) -> Self {
        let ctx_flags = match kind {
            ProcessKind::Exec       => ContextFlags::USER,
            ProcessKind::ModuleHost => ContextFlags::empty(),
        };
        Self {
            id,
            kind,
            ctx_flags,
            vfs_ctx,
            memory,
            data: Mutex::new(ProcessData { entry_thread: None, threads: 0, dead: false }),
        }
    }

    pub fn id(&self) -> ProcessId { self.id }
    pub fn kind(&self) -> ProcessKind { self.kind }
    pub fn ctx_flags(&self) -> ContextFlags { self.ctx_flags }
    pub fn vfs_ctx(&self) -> VfsContext { self.vfs_ctx }
    pub fn memory(&self) -> &MemoryHandler { &self.memory }

    pub fn entry_thread(&self) -> Option<ThreadId> {
        self.data.lock().entry_thread
    }

    pub fn thread_count(&self) -> usize {
        self.data.lock().threads
    }

    pub fn is_dead(&self) -> bool {
        self.data.lock().dead
    }

    /// Первый присоединённый поток становится входным.
    /// The first attached thread becomes the entry thread.
    pub(super) fn attach_thread(&self, tid: ThreadId) -> bool {
        let mut data = self.data.lock();
        if data.dead {
            return false;
        }
        data.entry_thread.get_or_insert(tid);
        data.threads += 1;
        true
    }

    pub(super) fn detach_thread(&self, tid: ThreadId) {
        let mut data = self.data.lock();
        data.threads -= 1;
        if data.entry_thread == Some(tid) {
            data.entry_thread = None;
        }
    }

    /// Пометить мёртвым, если потоков не осталось.
    /// Mark dead when no threads remain.
    pub(super) fn try_kill(&self) -> bool {
        let mut data = self.data.lock();
        if data.threads > 0 {
            return false;
        }
        data.dead = true;
        true
    }
}

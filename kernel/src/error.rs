//! Ошибки ядра / Kernel errors
//!
//! Восстановимые ошибки возвращаются вызывающему как `Err`.
//! Recoverable failures are returned to the caller as `Err`.
//!
//! Нарушение предусловий и порча инвариантов — `panic!`, не `Err`.
//! Precondition violations and invariant corruption panic, they never
//! become an `Err`.

use core::fmt;

/// POSIX коды / POSIX status codes
pub mod errno {
    pub const ENOENT: isize = 2;
    pub const ENOMEM: isize = 12;
    pub const EBUSY:  isize = 16;
    pub const EINVAL: isize = 22;
    pub const ENOSYS: isize = 38;
}

/// Ошибка ядра / Kernel error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// Нет подходящего свободного региона или физических страниц.
    /// No free region large enough, or physical pages exhausted.
    OutOfMemory,
    /// Диапазон выходит за границы обработчика.
    /// Range falls outside the handler, or cannot be satisfied within it.
    InvalidArgument,
    /// Ресурс ещё используется (например, у процесса есть потоки).
    /// Resource still in use (e.g. a process that still owns threads).
    Busy,
    /// Неизвестный поток / процесс / модуль.
    /// Unknown thread, process or module.
    NotFound,
}

pub type KernelResult<T> = Result<T, KernelError>;

impl KernelError {
    /// Положительный errno для syscall слоя.
    /// Positive errno reported by the syscall layer.
    pub fn errno(self) -> isize {
        match self {
            Self::OutOfMemory     => errno::ENOMEM,
            Self::InvalidArgument => errno::EINVAL,
            Self::Busy            => errno::EBUSY,
            Self::NotFound        => errno::ENOENT,
        }
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory     => f.write_str("out of memory"),
            Self::InvalidArgument => f.write_str("invalid argument"),
            Self::Busy            => f.write_str("resource busy"),
            Self::NotFound        => f.write_str("not found"),
        }
    }
}

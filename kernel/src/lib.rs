//! CupruxOS core — регионы адресного пространства и планировщик
//! CupruxOS core — address-space regions and the scheduler
//!
//! Порядок инициализации / Init order:
//!   1. `init()`              — UART + логгер
//!   2. `Scheduler::new(..)`  — процесс ядра, очередь готовых
//!   3. `ModuleRegistry::load_from_config(..)` — модули из `modules.cfg`
//!
//! Аппаратная часть (таблицы страниц, переключение контекста) приходит
//! снаружи через `VmmBackend` и `ContextBackend`.
//! Hardware pieces (page tables, context switching) come from outside through
//! `VmmBackend` and `ContextBackend`.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]

extern crate alloc;

pub mod drivers;
pub mod error;
pub mod mm;
pub mod modules;
pub mod sched;
pub mod syscall;

#[cfg(test)]
mod testing;

pub use error::{KernelError, KernelResult};

/// Предел числа CPU / CPU count limit
pub const MAX_CPUS: usize = 64;

/// Размер стека потока по умолчанию / Default thread stack size
pub const PROCESS_STACK_SIZE: usize = 0x40_0000;

/// Ранняя инициализация: отладочный вывод и логгер.
/// Early init: debug output and the logger.
pub fn init() {
    drivers::uart::init();
    drivers::init_logger(drivers::LOG_LEVEL);
    kprintln!("CupruxOS core {} starting", env!("CARGO_PKG_VERSION"));
}

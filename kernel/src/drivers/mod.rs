//! Kernel-space drivers
//!
//! Только отладочный вывод / Debug output only:
//!   - UART/Serial — терминал QEMU (`-serial stdio`)
//!   - `UartLogger` — бэкенд фасада `log` / backend for the `log` facade

pub mod uart;

use log::{LevelFilter, Log, Metadata, Record};

/// Уровень по умолчанию / Default level
#[cfg(debug_assertions)]
pub const LOG_LEVEL: LevelFilter = LevelFilter::Debug;
#[cfg(not(debug_assertions))]
pub const LOG_LEVEL: LevelFilter = LevelFilter::Info;

/// Логгер поверх COM1 / Logger on top of COM1
pub struct UartLogger;

impl Log for UartLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        // Планировщик логирует из прерывания; не ждём UART.
        uart::try_print(format_args!("[{:<5}] {}\n", record.level(), record.args()));
    }

    fn flush(&self) {}
}

static LOGGER: UartLogger = UartLogger;

/// Подключить `UartLogger`; повторный вызов ничего не делает.
/// Install `UartLogger`; a second call is a no-op.
pub fn init_logger(level: LevelFilter) {
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(level);
    }
}

#[macro_export]
macro_rules! kprint {
    ($($arg:tt)*) => {
        $crate::drivers::uart::_print(format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! kprintln {
    ()           => ($crate::kprint!("\n"));
    ($($arg:tt)*) => ($crate::kprint!("{}\n", format_args!($($arg)*)));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logger_installs_once() {
        init_logger(LevelFilter::Trace);
        init_logger(LevelFilter::Off);
        assert_eq!(log::max_level(), LevelFilter::Trace);
        log::info!("logger smoke test");
        kprintln!("kprint smoke test {}", 1);
    }
}

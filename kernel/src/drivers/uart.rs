//! UART COM1 (0x3F8) — отладочный вывод / debug output
//!
//! Порты трогаем только с фичей `x86_64` на голом железе. На хосте
//! (юнит-тесты) вывод молча отбрасывается.
//! Ports are touched only with the `x86_64` feature on bare metal. On the
//! host (unit tests) output is silently dropped.

use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};
use spin::Mutex;

#[cfg(all(feature = "x86_64", target_arch = "x86_64", target_os = "none"))]
mod port {
    pub const COM1: u16 = 0x3F8;

    pub unsafe fn outb(port: u16, val: u8) {
        unsafe { core::arch::asm!("out dx, al", in("dx") port, in("al") val) };
    }

    pub unsafe fn inb(port: u16) -> u8 {
        let val: u8;
        unsafe { core::arch::asm!("in al, dx", out("al") val, in("dx") port) };
        val
    }
}

static READY: AtomicBool = AtomicBool::new(false);

pub fn is_ready() -> bool {
    READY.load(Ordering::Acquire)
}

/// Инициализировать COM1 на 115200 baud.
/// Initialize COM1 at 115200 baud.
pub fn init() {
    #[cfg(all(feature = "x86_64", target_arch = "x86_64", target_os = "none"))]
    unsafe {
        use port::*;
        outb(COM1 + 1, 0x00); // прерывания выкл. / interrupts off
        outb(COM1 + 3, 0x80); // DLAB
        outb(COM1,     0x01); // делитель 1 → 115200
        outb(COM1 + 1, 0x00);
        outb(COM1 + 3, 0x03); // 8N1
        outb(COM1 + 2, 0xC7); // FIFO, 14 байт
        outb(COM1 + 4, 0x0B);
    }
    READY.store(true, Ordering::Release);
}

#[cfg(all(feature = "x86_64", target_arch = "x86_64", target_os = "none"))]
fn send_byte(byte: u8) {
    unsafe {
        // THR пуст (LSR бит 5) / THR empty (LSR bit 5)
        while port::inb(port::COM1 + 5) & 0x20 == 0 {}
        port::outb(port::COM1, byte);
    }
}

#[cfg(not(all(feature = "x86_64", target_arch = "x86_64", target_os = "none")))]
fn send_byte(_byte: u8) {}

fn write_bytes(s: &str) {
    if !is_ready() {
        return;
    }
    for byte in s.bytes() {
        if byte == b'\n' {
            send_byte(b'\r');
        }
        send_byte(byte);
    }
}

struct UartWriter;

impl fmt::Write for UartWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        write_bytes(s);
        Ok(())
    }
}

static UART: Mutex<UartWriter> = Mutex::new(UartWriter);

/// Для `kprint!` / Backs `kprint!`
pub fn _print(args: fmt::Arguments) {
    use fmt::Write;
    UART.lock().write_fmt(args).ok();
}

/// Печать без блокировки: в обработчике прерывания UART может быть занят.
/// Lock-free attempt: the UART may be held when we are inside an interrupt.
pub fn try_print(args: fmt::Arguments) -> bool {
    use fmt::Write;
    match UART.try_lock() {
        Some(mut uart) => {
            uart.write_fmt(args).ok();
            true
        }
        None => false,
    }
}

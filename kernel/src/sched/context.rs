//! CPU context — интерфейс / interface
//!
//! Сохранение/восстановление регистров делает архитектурный код; ядро
//! видит только непрозрачные дескрипторы контекста.
//! Register save/restore is done by arch code; the core only sees opaque
//! context handles.

use alloc::vec::Vec;
use bitflags::bitflags;

use crate::mm::vmm::SpaceHandle;
use crate::mm::VirtAddr;

bitflags! {
    /// Флаги запуска контекста / Context start flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ContextFlags: u32 {
        /// Кольцо 3 / Ring 3 (user mode)
        const USER = 1 << 0;
    }
}

/// Непрозрачный дескриптор сохранённого контекста.
/// Opaque handle to a saved register snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContextHandle(pub u64);

/// Аргументы точки входа (argv-слова) / Entry point argument words
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Arguments {
    pub words: Vec<u64>,
}

impl Arguments {
    pub fn new(words: &[u64]) -> Self {
        Self { words: words.to_vec() }
    }
}

/// Трейт для архитектурно-зависимых контекстов.
/// Trait for arch-specific context primitives.
pub trait ContextBackend: Send + Sync {
    /// Кадр прерывания архитектуры / The arch's interrupt frame
    type Frame;

    fn create(&self) -> ContextHandle;

    fn destroy(&self, ctx: ContextHandle);

    /// Первая инициализация: адресное пространство, вход, стек, аргументы.
    /// First-time init: address space, entry, stack, arguments.
    fn start(
        &self,
        ctx: ContextHandle,
        space: SpaceHandle,
        entry: VirtAddr,
        stack: VirtAddr,
        args: &Arguments,
        flags: ContextFlags,
    );

    /// Кадр → контекст / Frame into context
    fn save(&self, ctx: ContextHandle, frame: &Self::Frame);

    /// Контекст → кадр / Context into frame
    fn restore(&self, ctx: ContextHandle, frame: &mut Self::Frame);
}

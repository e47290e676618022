//! Модули ядра и зависимости между ними / Kernel modules and dependencies
//!
//! Конфиг `modules.cfg` построчный: каждая строка `MODULE_PATH=<путь>`
//! загружает модуль, а результат загрузки включает/выключает флаг
//! «загружен» для его типа.
//! `modules.cfg` is line oriented: every `MODULE_PATH=<path>` line loads a
//! module, and the load result toggles the "loaded" flag of its type.
//!
//! Поток, запросивший незагруженный тип, паркуется вне очереди до загрузки.
//! Таймаута и отмены нет.
//! A thread requesting a type that is not loaded yet is parked off the run
//! queue until the load happens. There is no timeout and no cancellation.

use alloc::string::String;
use alloc::vec::Vec;
use bitflags::bitflags;
use spin::Mutex;

use crate::error::{KernelError, KernelResult};
use crate::sched::context::ContextBackend;
use crate::sched::thread::ThreadId;
use crate::sched::Scheduler;

/// Путь к конфигу в initrd / Config path inside the initrd
pub const MODULES_CFG_PATH: &str = "/initrd/system/starter/modules.cfg";

const MODULE_PATH_KEY: &str = "MODULE_PATH=";

/// Тип модуля / Module type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum ModuleType {
    Vfs = 0,
    Pci,
    Time,
    Storage,
}

impl ModuleType {
    pub const COUNT: usize = 4;
}

impl TryFrom<usize> for ModuleType {
    type Error = KernelError;

    fn try_from(raw: usize) -> KernelResult<Self> {
        match raw {
            0 => Ok(Self::Vfs),
            1 => Ok(Self::Pci),
            2 => Ok(Self::Time),
            3 => Ok(Self::Storage),
            _ => Err(KernelError::InvalidArgument),
        }
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ModuleFlags: u8 {
        const LOADED = 1 << 0;
    }
}

/// Результат запроса зависимости / Dependency request outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dependency {
    /// Уже загружен / Already loaded
    Ready,
    /// Поток припаркован до загрузки / Thread parked until the load
    Parked,
}

/// Неудачная загрузка; тип известен, если удалось прочитать метаданные.
/// Failed load; the type is known when the metadata could be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadError {
    pub module_type: Option<ModuleType>,
    pub error:       KernelError,
}

/// Загрузчик ELF-модулей / ELF module loader
pub trait ModuleLoader {
    /// Текстовый ресурс из initrd / Text resource from the initrd
    fn read_config(&mut self, path: &str) -> KernelResult<String>;

    fn load(&mut self, path: &str) -> Result<ModuleType, LoadError>;
}

/// Пути модулей из текста конфига / Module paths from config text
pub fn parse_config(text: &str) -> impl Iterator<Item = &str> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.starts_with('#'))
        .filter_map(|line| line.strip_prefix(MODULE_PATH_KEY))
        .map(str::trim)
        .filter(|path| !path.is_empty())
}

struct RegistryState {
    flags:   [ModuleFlags; ModuleType::COUNT],
    waiters: [Vec<ThreadId>; ModuleType::COUNT],
}

pub struct ModuleRegistry {
    state: Mutex<RegistryState>,
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleRegistry {
    pub const fn new() -> Self {
        const NO_WAITERS: Vec<ThreadId> = Vec::new();
        Self {
            state: Mutex::new(RegistryState {
                flags:   [ModuleFlags::empty(); ModuleType::COUNT],
                waiters: [NO_WAITERS; ModuleType::COUNT],
            }),
        }
    }

    pub fn is_loaded(&self, module_type: ModuleType) -> bool {
        self.state.lock().flags[module_type as usize].contains(ModuleFlags::LOADED)
    }

    /// Переключить флаг «загружен»; при загрузке будит всех ожидающих.
    /// Toggle the loaded flag; loading wakes every waiter.
    pub fn set_load_state<C: ContextBackend>(
        &self,
        module_type: ModuleType,
        loaded: bool,
        sched: &Scheduler<C>,
    ) {
        let woken = {
            let mut state = self.state.lock();
            state.flags[module_type as usize].set(ModuleFlags::LOADED, loaded);
            if loaded {
                core::mem::take(&mut state.waiters[module_type as usize])
            } else {
                Vec::new()
            }
        };

        log::debug!("[modules] {:?} loaded={} ({} waiter(s))", module_type, loaded, woken.len());
        for tid in woken {
            // Поток мог завершиться, пока ждал.
            if sched.unblock(tid).is_err() {
                log::warn!("[modules] waiter {:?} vanished", tid);
            }
        }
    }

    /// Убедиться, что тип загружен, иначе припарковать `caller`.
    /// Make sure the type is loaded, otherwise park `caller`.
    pub fn request_dependency<C: ContextBackend>(
        &self,
        module_type: ModuleType,
        caller: ThreadId,
        sched: &Scheduler<C>,
    ) -> KernelResult<Dependency> {
        let mut state = self.state.lock();
        if state.flags[module_type as usize].contains(ModuleFlags::LOADED) {
            return Ok(Dependency::Ready);
        }
        sched.block(caller)?;
        state.waiters[module_type as usize].push(caller);
        log::debug!("[modules] {:?} parked on {:?}", caller, module_type);
        Ok(Dependency::Parked)
    }

    /// Загрузочные модули из `MODULES_CFG_PATH`.
    /// Boot modules listed in `MODULES_CFG_PATH`.
    pub fn load_boot_modules<C: ContextBackend>(
        &self,
        loader: &mut dyn ModuleLoader,
        sched: &Scheduler<C>,
    ) -> KernelResult<usize> {
        let text = loader.read_config(MODULES_CFG_PATH).map_err(|error| {
            log::error!("[modules] cannot read {}: {}", MODULES_CFG_PATH, error);
            error
        })?;
        Ok(self.load_from_config(&text, loader, sched))
    }

    /// Загрузить всё из конфига; возвращает число успешных загрузок.
    /// Load everything listed in the config; returns the number of successes.
    pub fn load_from_config<C: ContextBackend>(
        &self,
        text: &str,
        loader: &mut dyn ModuleLoader,
        sched: &Scheduler<C>,
    ) -> usize {
        let mut loaded = 0;
        for path in parse_config(text) {
            match loader.load(path) {
                Ok(module_type) => {
                    log::info!("[modules] loaded {} as {:?}", path, module_type);
                    self.set_load_state(module_type, true, sched);
                    loaded += 1;
                }
                Err(LoadError { module_type, error }) => {
                    log::warn!("[modules] failed to load {}: {}", path, error);
                    if let Some(module_type) = module_type {
                        self.set_load_state(module_type, false, sched);
                    }
                }
            }
        }
        loaded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::sync::Arc;
    use crate::mm::VirtAddr;
    use crate::sched::context::Arguments;
    use crate::sched::thread::ThreadState;
    use crate::sched::Switch;
    use crate::testing::{Frame, MockContexts, MockVmm};

    const CONFIG: &str = "\
# boot modules
MODULE_PATH=/initrd/modules/vfs.elf
MODULE_PATH=/initrd/modules/broken.elf

OTHER_KEY=ignored
  MODULE_PATH=  /initrd/modules/time.elf
MODULE_PATH=
";

    struct FakeLoader {
        seen: Vec<String>,
    }

    impl ModuleLoader for FakeLoader {
        fn read_config(&mut self, path: &str) -> KernelResult<String> {
            match path {
                MODULES_CFG_PATH => Ok(CONFIG.into()),
                _ => Err(KernelError::NotFound),
            }
        }

        fn load(&mut self, path: &str) -> Result<ModuleType, LoadError> {
            self.seen.push(path.into());
            match path {
                "/initrd/modules/vfs.elf"  => Ok(ModuleType::Vfs),
                "/initrd/modules/time.elf" => Ok(ModuleType::Time),
                _ => Err(LoadError { module_type: Some(ModuleType::Pci), error: KernelError::NotFound }),
            }
        }
    }

    fn scheduler() -> Scheduler<MockContexts> {
        Scheduler::new(MockContexts::default(), Arc::new(MockVmm::default()), 1)
    }

    #[test]
    fn config_lines() {
        let paths: Vec<&str> = parse_config(CONFIG).collect();
        assert_eq!(paths, vec!["/initrd/modules/vfs.elf", "/initrd/modules/broken.elf", "/initrd/modules/time.elf"]);
    }

    #[test]
    fn raw_type_is_validated() {
        assert_eq!(ModuleType::try_from(2), Ok(ModuleType::Time));
        assert_eq!(ModuleType::try_from(ModuleType::COUNT), Err(KernelError::InvalidArgument));
    }

    #[test]
    fn load_from_config_toggles_flags() {
        let sched = scheduler();
        let registry = ModuleRegistry::new();
        let mut loader = FakeLoader { seen: Vec::new() };

        assert_eq!(registry.load_from_config(CONFIG, &mut loader, &sched), 2);
        assert_eq!(loader.seen.len(), 3);
        assert!(registry.is_loaded(ModuleType::Vfs));
        assert!(registry.is_loaded(ModuleType::Time));
        assert!(!registry.is_loaded(ModuleType::Pci));
        assert!(!registry.is_loaded(ModuleType::Storage));
    }

    #[test]
    fn boot_modules_come_from_the_initrd_config() {
        let sched = scheduler();
        let registry = ModuleRegistry::new();
        let mut loader = FakeLoader { seen: Vec::new() };

        assert_eq!(registry.load_boot_modules(&mut loader, &sched), Ok(2));
        assert_eq!(loader.seen.first().map(String::as_str), Some("/initrd/modules/vfs.elf"));
        assert!(registry.is_loaded(ModuleType::Vfs));
    }

    #[test]
    fn waiter_is_parked_until_load() {
        let sched = scheduler();
        let registry = ModuleRegistry::new();
        let kernel = sched.kernel_process().clone();
        let tid = sched.create_thread(&kernel, VirtAddr::new(0xa000), VirtAddr::new(0x8000)).unwrap();
        sched.launch_thread(tid, &Arguments::default()).unwrap();

        let mut frame = Frame::default();
        assert_eq!(sched.handle_interrupt(0, &mut frame), Switch::Resumed(tid));

        assert_eq!(registry.request_dependency(ModuleType::Storage, tid, &sched), Ok(Dependency::Parked));
        assert_eq!(sched.handle_interrupt(0, &mut frame), Switch::Idle);
        assert_eq!(sched.thread_state(tid), Some(ThreadState::Blocked));

        registry.set_load_state(ModuleType::Storage, true, &sched);
        assert_eq!(sched.thread_state(tid), Some(ThreadState::Ready));
        assert_eq!(sched.handle_interrupt(0, &mut frame), Switch::Resumed(tid));

        assert_eq!(registry.request_dependency(ModuleType::Storage, tid, &sched), Ok(Dependency::Ready));
    }
}

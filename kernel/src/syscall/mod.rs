//! Syscall handler — память процесса / process memory calls
//!
//! Номера / Numbers:
//!   8  mem_unmap(addr, len)               — размаппить и освободить
//!   9  mem_alloc(addr, len, prot, flags)  — анонимная память (mmap)
//!   15 mem_protect(addr, len, prot)       — сменить права
//!
//! Остальные номера принадлежат другим подсистемам → ENOSYS.
//! Other numbers belong to other subsystems → ENOSYS.
//!
//! Аргументы от пользователя проверяются здесь: ядро считает
//! невыровненный адрес фатальной ошибкой, а адреса вне окна процесса
//! пользователю недоступны.
//! User arguments are validated here: the core treats a misaligned address
//! as fatal, and addresses outside the process window are off limits.

use crate::error::{errno, KernelError, KernelResult};
use crate::mm::handler::Placement;
use crate::mm::vmm::Prot;
use crate::mm::{MemoryRange, VirtAddr, PAGE_SIZE};
use crate::sched::context::ContextBackend;
use crate::sched::process::Process;
use crate::sched::{CpuId, CpuSlot, Scheduler};

pub const SYS_MEM_UNMAP:   usize = 8;
pub const SYS_MEM_ALLOC:   usize = 9;
pub const SYS_MEM_PROTECT: usize = 15;

/// `mem_alloc` флаг: адрес обязателен / address is mandatory
pub const MAP_FIXED: usize = 0x10;

/// Вход из ловушки: вызов от имени потока, исполняемого на `cpu`.
/// Trap entry: the call is made by the thread running on `cpu`.
pub fn dispatch_from_cpu<C: ContextBackend>(
    sched: &Scheduler<C>,
    cpu: CpuId,
    number: usize,
    args: [usize; 4],
) -> isize {
    let process = match sched.current(cpu) {
        CpuSlot::Running(tid) => sched.process_of(tid),
        CpuSlot::Idle => None,
    };
    match process {
        Some(process) => dispatch(&process, number, args),
        None => {
            log::warn!("[syscall] cpu {}: no running thread for call {}", cpu, number);
            -errno::ENOENT
        }
    }
}

/// Разобрать вызов; успех ≥ 0, ошибка — `-errno`.
/// Dispatch a call; success is ≥ 0, failure is `-errno`.
pub fn dispatch(process: &Process, number: usize, args: [usize; 4]) -> isize {
    let result = match number {
        SYS_MEM_UNMAP   => sys_mem_unmap(process, args[0], args[1]).map(|_| 0),
        SYS_MEM_ALLOC   => sys_mem_alloc(process, args[0], args[1], args[2], args[3])
                               .map(|base| base.as_u64() as isize),
        SYS_MEM_PROTECT => sys_mem_protect(process, args[0], args[1], args[2]).map(|_| 0),
        _ => return -errno::ENOSYS,
    };
    match result {
        Ok(value) => value,
        Err(error) => {
            log::debug!("[syscall] {} failed: {}", number, error);
            -error.errno()
        }
    }
}

fn page_round(len: usize) -> KernelResult<usize> {
    if len == 0 {
        return Err(KernelError::InvalidArgument);
    }
    len.checked_add(PAGE_SIZE - 1)
        .map(|len| len & !(PAGE_SIZE - 1))
        .ok_or(KernelError::InvalidArgument)
}

/// Выровненный диапазон целиком внутри окна процесса.
/// Aligned range lying fully inside the process window.
fn user_range(process: &Process, addr: usize, size: usize) -> KernelResult<VirtAddr> {
    let base = VirtAddr::new(addr as u64);
    if !base.is_page_aligned() || base.as_u64().checked_add(size as u64).is_none() {
        return Err(KernelError::InvalidArgument);
    }
    if !process.memory().encloses(MemoryRange::new(base, size)) {
        return Err(KernelError::InvalidArgument);
    }
    Ok(base)
}

fn prot(bits: usize) -> KernelResult<Prot> {
    let bits = i32::try_from(bits).map_err(|_| KernelError::InvalidArgument)?;
    Prot::from_bits(bits).ok_or(KernelError::InvalidArgument)
}

/// Зарезервировать адреса и сразу замаппить страницы.
/// Reserve addresses, then map pages right away.
///
/// `MAP_FIXED` берёт только свободный диапазон (`EBUSY` иначе), поэтому
/// откат при ошибке маппинга трогает лишь то, что зарезервировал сам вызов.
/// `MAP_FIXED` only takes a free range (`EBUSY` otherwise), so the rollback
/// after a failed mapping touches nothing but this call's own reservation.
pub fn sys_mem_alloc(process: &Process, addr: usize, len: usize, prot_bits: usize, flags: usize)
    -> KernelResult<VirtAddr>
{
    let size = page_round(len)?;
    let prot = prot(prot_bits)?;
    let memory = process.memory();

    let base = if flags & MAP_FIXED != 0 {
        memory.reserve_unused(user_range(process, addr, size)?, size)?
    } else {
        memory.allocate_region(Placement::Floating, size)?
    };

    if let Err(error) = memory.allocate_memory_block(base, size, prot) {
        // Бэкенд мог успеть замаппить часть страниц.
        memory.unmap(base, size).ok();
        memory.free_region(base, size)?;
        return Err(error);
    }
    Ok(base)
}

pub fn sys_mem_unmap(process: &Process, addr: usize, len: usize) -> KernelResult<()> {
    let size = page_round(len)?;
    let base = user_range(process, addr, size)?;
    let memory = process.memory();
    memory.unmap(base, size)?;
    memory.free_region(base, size)
}

pub fn sys_mem_protect(process: &Process, addr: usize, len: usize, prot_bits: usize) -> KernelResult<()> {
    let size = page_round(len)?;
    let base = user_range(process, addr, size)?;
    process.memory().protect(base, size, prot(prot_bits)?)
}

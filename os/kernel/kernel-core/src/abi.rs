//! Sentinel-valued forms of the kernel core operations.
//!
//! These mirror the numeric conventions the syscall layer hands back to user
//! space: `0` or a null pointer for "no result", `-1` for failure. Errors are
//! logged here and otherwise dropped; callers that need the cause use the
//! `Result` methods on [`Kernel`] directly.

use crate::cpu::Cpu;
use crate::kernel::Kernel;
use crate::lifecycle::WaitOutcome;
use crate::loader::ExecutableLoader;
use crate::security::PermissionCheck;
use core::ptr::{self, NonNull};
use kernel_memory_addresses::{PhysicalAddress, PhysicalFrame, VirtualAddress};
use kernel_proc::{Pid, Priority, ProcessType, Signal};
use kernel_vmem::{PageEntryBits, PhysMapper};
use log::{debug, warn};

/// Returns the new pid, or `0`. Priorities beyond the lowest level are
/// clamped; an unknown `kind` fails.
pub fn process_create<M, C, L, P>(
    k: &mut Kernel<'_, M, C, L, P>,
    path: &str,
    priority: u32,
    kind: u32,
) -> u32
where
    M: PhysMapper,
    C: Cpu,
    L: ExecutableLoader,
    P: PermissionCheck,
{
    let Some(kind) = ProcessType::from_raw(kind) else {
        warn!("process_create({path}): unknown process type {kind}");
        return 0;
    };
    match k.process_create(path, Priority::clamped(priority), kind) {
        Ok(pid) => pid.as_u32(),
        Err(e) => {
            warn!("process_create({path}): {e}");
            0
        }
    }
}

/// Returns the child's pid to the parent; the child sees `0` in `rax`.
/// Failure also reads as `0`.
pub fn process_fork<M, C, L, P>(k: &mut Kernel<'_, M, C, L, P>) -> u32
where
    M: PhysMapper,
    C: Cpu,
    L: ExecutableLoader,
    P: PermissionCheck,
{
    k.process_fork().map_or_else(
        |e| {
            warn!("process_fork: {e}");
            0
        },
        Pid::as_u32,
    )
}

pub fn process_exec<M, C, L, P>(
    k: &mut Kernel<'_, M, C, L, P>,
    path: &str,
    argv: &[&str],
    envp: &[&str],
) -> i32
where
    M: PhysMapper,
    C: Cpu,
    L: ExecutableLoader,
    P: PermissionCheck,
{
    match k.process_exec(path, argv, envp) {
        Ok(()) => 0,
        Err(e) => {
            warn!("process_exec({path}): {e}");
            -1
        }
    }
}

pub fn process_exit<M, C, L, P>(k: &mut Kernel<'_, M, C, L, P>, code: i32)
where
    M: PhysMapper,
    C: Cpu,
    L: ExecutableLoader,
    P: PermissionCheck,
{
    if let Err(e) = k.process_exit(code) {
        warn!("process_exit({code}): {e}");
    }
}

/// `pid == 0` waits for any child. Returns the collected pid and stores its
/// status, or returns `0` when the caller blocked or the wait failed.
pub fn process_wait<M, C, L, P>(k: &mut Kernel<'_, M, C, L, P>, pid: u32, status: &mut i32) -> u32
where
    M: PhysMapper,
    C: Cpu,
    L: ExecutableLoader,
    P: PermissionCheck,
{
    let target = (pid != 0).then(|| Pid::new(pid));
    match k.process_wait(target) {
        Ok(WaitOutcome::Reaped { pid, status: s }) => {
            *status = s;
            pid.as_u32()
        }
        Ok(WaitOutcome::Blocked) => 0,
        Err(e) => {
            debug!("process_wait({pid}): {e}");
            0
        }
    }
}

/// Returns `0`, or `-1` for an unknown signal number or a refused request.
pub fn process_kill<M, C, L, P>(k: &mut Kernel<'_, M, C, L, P>, pid: u32, signo: i32) -> i32
where
    M: PhysMapper,
    C: Cpu,
    L: ExecutableLoader,
    P: PermissionCheck,
{
    let result = Signal::try_from(signo)
        .map_err(Into::into)
        .and_then(|signal| k.process_kill(Pid::new(pid), signal));
    match result {
        Ok(()) => 0,
        Err(e) => {
            warn!("process_kill({pid}, {signo}): {e}");
            -1
        }
    }
}

pub fn scheduler_start<M, C, L, P>(k: &mut Kernel<'_, M, C, L, P>) -> !
where
    M: PhysMapper,
    C: Cpu,
    L: ExecutableLoader,
    P: PermissionCheck,
{
    k.scheduler_start()
}

/// Null on failure, including `size == 0`.
pub fn kmalloc<M, C, L, P>(k: &mut Kernel<'_, M, C, L, P>, size: usize) -> *mut u8
where
    M: PhysMapper,
    C: Cpu,
    L: ExecutableLoader,
    P: PermissionCheck,
{
    k.kmalloc(size).map_or(ptr::null_mut(), NonNull::as_ptr)
}

/// Freeing null is a no-op. Foreign pointers and double frees are logged
/// and ignored.
pub fn kfree<M, C, L, P>(k: &mut Kernel<'_, M, C, L, P>, p: *mut u8)
where
    M: PhysMapper,
    C: Cpu,
    L: ExecutableLoader,
    P: PermissionCheck,
{
    let Some(p) = NonNull::new(p) else {
        return;
    };
    if let Err(e) = k.kfree(p) {
        warn!("kfree({p:p}): {e}");
    }
}

pub fn kcalloc<M, C, L, P>(k: &mut Kernel<'_, M, C, L, P>, n: usize, size: usize) -> *mut u8
where
    M: PhysMapper,
    C: Cpu,
    L: ExecutableLoader,
    P: PermissionCheck,
{
    k.kcalloc(n, size).map_or(ptr::null_mut(), NonNull::as_ptr)
}

/// `realloc` semantics: a null `p` allocates, `size == 0` frees and returns
/// null, and on failure null is returned with `p` still valid.
pub fn krealloc<M, C, L, P>(k: &mut Kernel<'_, M, C, L, P>, p: *mut u8, size: usize) -> *mut u8
where
    M: PhysMapper,
    C: Cpu,
    L: ExecutableLoader,
    P: PermissionCheck,
{
    match k.krealloc(NonNull::new(p), size) {
        Ok(Some(p)) => p.as_ptr(),
        Ok(None) => ptr::null_mut(),
        Err(e) => {
            warn!("krealloc({p:p}, {size}): {e}");
            ptr::null_mut()
        }
    }
}

/// Physical address of a new PML4, or `0`.
pub fn create_page_table<M, C, L, P>(k: &mut Kernel<'_, M, C, L, P>) -> u64
where
    M: PhysMapper,
    C: Cpu,
    L: ExecutableLoader,
    P: PermissionCheck,
{
    k.create_page_table()
        .map_or(0, |root| root.base().as_u64())
}

pub fn destroy_page_table<M, C, L, P>(k: &mut Kernel<'_, M, C, L, P>, root: u64)
where
    M: PhysMapper,
    C: Cpu,
    L: ExecutableLoader,
    P: PermissionCheck,
{
    let Some(frame) = PhysicalFrame::from_aligned(PhysicalAddress::new(root)) else {
        warn!("destroy_page_table({root:#x}): not a frame address");
        return;
    };
    if let Err(e) = k.destroy_page_table(frame) {
        warn!("destroy_page_table({root:#x}): {e}");
    }
}

/// `flags` holds raw page-table entry bits; the address bits are ignored.
/// Returns `0` or `-1`.
pub fn map_page<M, C, L, P>(k: &mut Kernel<'_, M, C, L, P>, root: u64, va: u64, pa: u64, flags: u64) -> i32
where
    M: PhysMapper,
    C: Cpu,
    L: ExecutableLoader,
    P: PermissionCheck,
{
    let Some(frame) = PhysicalFrame::from_aligned(PhysicalAddress::new(root)) else {
        warn!("map_page: root {root:#x} is not a frame address");
        return -1;
    };
    let flags = PageEntryBits::from_bits(flags).flags_only();
    match k.map_page(
        frame,
        VirtualAddress::new(va),
        PhysicalAddress::new(pa),
        flags,
    ) {
        Ok(()) => 0,
        Err(e) => {
            warn!("map_page({va:#x} -> {pa:#x}): {e}");
            -1
        }
    }
}

//! Trap-side entry points.
//!
//! The kernel lives in one [`IrqSpinLock`]. Every path into it (timer,
//! syscalls, the boot thread) goes through [`with_kernel`], so interrupts are
//! masked for the whole operation and no handler ever observes a half-done
//! update.

use crate::cpu::Cpu;
use crate::kernel::Kernel;
use crate::loader::ExecutableLoader;
use crate::security::PermissionCheck;
use kernel_sync::{InterruptControl, IrqSpinLock};
use kernel_vmem::PhysMapper;
use log::error;

/// Run `f` on the kernel with interrupts masked.
#[inline]
pub fn with_kernel<T, I, R>(lock: &IrqSpinLock<T>, irq: &I, f: impl FnOnce(&mut T) -> R) -> R
where
    I: InterruptControl + ?Sized,
{
    lock.with_lock_irq(irq, f)
}

/// Body of the timer interrupt handler.
pub fn timer_interrupt<M, C, L, P, I>(lock: &IrqSpinLock<Kernel<'_, M, C, L, P>>, irq: &I)
where
    M: PhysMapper,
    C: Cpu,
    L: ExecutableLoader,
    P: PermissionCheck,
    I: InterruptControl + ?Sized,
{
    if let Err(e) = with_kernel(lock, irq, |k| k.timer_tick()) {
        error!("timer tick: {e}");
    }
}

/// Start scheduling, then idle with the lock released so interrupt handlers
/// can get in.
///
/// # Panics
/// If the ready queues are corrupted at start.
pub fn scheduler_start<M, C, L, P, I>(lock: &IrqSpinLock<Kernel<'_, M, C, L, P>>, irq: &I) -> !
where
    M: PhysMapper,
    C: Cpu,
    L: ExecutableLoader,
    P: PermissionCheck,
    I: InterruptControl + ?Sized,
{
    if let Err(e) = with_kernel(lock, irq, |k| k.start()) {
        panic!("scheduler start failed: {e}");
    }
    loop {
        irq.wait_for_interrupt();
    }
}

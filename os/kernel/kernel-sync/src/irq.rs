use crate::SpinLock;
use core::ops::{Deref, DerefMut};

/// Access to the CPU's interrupt flag.
///
/// The kernel core is single-CPU; the only concurrency it sees comes from
/// interrupts. Everything that mutates kernel state therefore runs with
/// interrupts masked through an implementation of this trait.
///
/// The bare-metal implementation is [`X86Interrupts`]; tests supply a fake
/// that records the calls.
pub trait InterruptControl {
    /// Whether interrupts are currently enabled (`RFLAGS.IF`).
    fn interrupts_enabled(&self) -> bool;

    /// Mask interrupts (`cli`).
    fn disable_interrupts(&self);

    /// Unmask interrupts (`sti`).
    fn enable_interrupts(&self);

    /// Unmask interrupts and idle until the next one has been handled.
    #[inline]
    fn wait_for_interrupt(&self) {
        self.enable_interrupts();
        core::hint::spin_loop();
    }
}

/// RAII guard that disables interrupts on creation and restores them on drop.
///
/// The guard snapshots the interrupt state. If interrupts were enabled it
/// masks them; on drop it unmasks them **only** if they were previously
/// enabled, so guards nest.
pub struct IrqGuard<'a, I: InterruptControl + ?Sized> {
    ctl: &'a I,
    /// Whether interrupts were enabled when the guard was created.
    were_enabled: bool,
}

impl<'a, I: InterruptControl + ?Sized> IrqGuard<'a, I> {
    #[inline]
    #[must_use]
    pub fn new(ctl: &'a I) -> Self {
        let enabled = ctl.interrupts_enabled();
        if enabled {
            ctl.disable_interrupts();
        }
        Self {
            ctl,
            were_enabled: enabled,
        }
    }
}

impl<I: InterruptControl + ?Sized> Drop for IrqGuard<'_, I> {
    fn drop(&mut self) {
        if self.were_enabled {
            self.ctl.enable_interrupts();
        }
    }
}

/// A spin lock that also masks interrupts while held.
///
/// Used as the big kernel lock: the trap and timer entry points take it
/// before touching scheduler or allocator state, which both excludes
/// re-entrant interrupt handlers and serializes access.
pub struct IrqSpinLock<T> {
    lock: SpinLock<T>,
}

impl<T> IrqSpinLock<T> {
    pub const fn new(inner: T) -> Self {
        Self {
            lock: SpinLock::new(inner),
        }
    }

    /// Mask interrupts through `ctl`, then acquire the lock.
    ///
    /// Dropping the guard releases the lock first and restores the interrupt
    /// state second.
    #[inline]
    pub fn lock_irq<'a, I: InterruptControl + ?Sized>(
        &'a self,
        ctl: &'a I,
    ) -> IrqSpinLockGuard<'a, T, I> {
        let irq = IrqGuard::new(ctl);
        self.lock.acquire();
        IrqSpinLockGuard {
            lock: &self.lock,
            _irq: irq,
        }
    }

    #[inline]
    pub fn with_lock_irq<I: InterruptControl + ?Sized, R>(
        &self,
        ctl: &I,
        f: impl FnOnce(&mut T) -> R,
    ) -> R {
        let mut g = self.lock_irq(ctl);
        f(&mut g)
    }

    #[inline]
    pub fn is_locked(&self) -> bool {
        self.lock.is_locked()
    }

    #[inline]
    pub const fn get_mut(&mut self) -> &mut T {
        self.lock.get_mut()
    }

    pub fn into_inner(self) -> T {
        self.lock.into_inner()
    }
}

/// Guard returned by [`IrqSpinLock::lock_irq`].
pub struct IrqSpinLockGuard<'a, T, I: InterruptControl + ?Sized> {
    lock: &'a SpinLock<T>,
    // Dropped after `Drop::drop` released the lock.
    _irq: IrqGuard<'a, I>,
}

impl<T, I: InterruptControl + ?Sized> Deref for IrqSpinLockGuard<'_, T, I> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { self.lock.data_mut() }
    }
}

impl<T, I: InterruptControl + ?Sized> DerefMut for IrqSpinLockGuard<'_, T, I> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { self.lock.data_mut() }
    }
}

impl<T, I: InterruptControl + ?Sized> Drop for IrqSpinLockGuard<'_, T, I> {
    fn drop(&mut self) {
        self.lock.release();
    }
}

/// Interrupt control through `cli`/`sti` and `pushfq`.
///
/// # Safety & Privilege
///
/// Must only be used at CPL0; `cli`/`sti` fault in user mode.
#[derive(Copy, Clone, Default)]
pub struct X86Interrupts;

#[cfg(target_arch = "x86_64")]
impl InterruptControl for X86Interrupts {
    #[inline]
    fn interrupts_enabled(&self) -> bool {
        let r: u64;
        unsafe { core::arch::asm!("pushfq; pop {}", out(reg) r, options(nostack, preserves_flags)) }
        (r & (1 << 9)) != 0
    }

    #[inline]
    fn disable_interrupts(&self) {
        unsafe { core::arch::asm!("cli", options(nomem, nostack, preserves_flags)) }
    }

    #[inline]
    fn enable_interrupts(&self) {
        unsafe { core::arch::asm!("sti", options(nomem, nostack, preserves_flags)) }
    }

    #[inline]
    fn wait_for_interrupt(&self) {
        unsafe { core::arch::asm!("sti", "hlt", options(nomem, nostack, preserves_flags)) }
    }
}

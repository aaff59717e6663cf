//! # Kernel synchronization primitives
//!
//! A TATAS [`SpinLock`] and the interrupt-masking [`IrqSpinLock`] built on it.
//! The interrupt flag is reached through [`InterruptControl`] so the locking
//! discipline can be exercised on the host.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod irq;
mod spin_lock;

pub use irq::{InterruptControl, IrqGuard, IrqSpinLock, IrqSpinLockGuard, X86Interrupts};
pub use spin_lock::{SpinLock, SpinLockGuard};

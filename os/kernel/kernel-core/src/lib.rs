//! # Kernel Core
//!
//! Process lifecycle, scheduling and memory management tied together into one
//! [`Kernel`] value.
//!
//! ```text
//!   timer IRQ ──► entry::timer_interrupt ─┐
//!   syscalls  ──► abi::* ─────────────────┤  IrqSpinLock<Kernel>
//!   boot      ──► Kernel::boot / start ───┘
//!                         │
//!        ┌────────────────┼──────────────────────┐
//!        ▼                ▼                      ▼
//!   ProcessTable      Scheduler            KernelMemory
//!   (kernel-proc)     (kernel-sched)       (kernel-alloc, kernel-vmem)
//!        │                │
//!        └──── Cpu, ExecutableLoader, PermissionCheck (supplied by the platform)
//! ```
//!
//! ## Boot
//! [`Kernel::boot`] builds the frame bitmap, buddy pool and slab caches from
//! the firmware memory map, creates the kernel root page table and turns the
//! boot thread into the idle process (pid 0). [`Kernel::start`] arms the timer
//! and dispatches the first ready process.
//!
//! ## Collaborators
//! The core never touches hardware directly. Register save/restore, CR3,
//! `TSS.rsp0` and the timer go through [`Cpu`]; executable parsing through
//! [`ExecutableLoader`]; policy through [`PermissionCheck`]. Physical memory is
//! reached through a [`PhysMapper`](kernel_vmem::PhysMapper).
//!
//! ## Failure
//! Operations return [`KernelError`] and leave no partial state behind. The
//! [`abi`] module folds those into the numeric sentinels of the syscall
//! interface. Only boot-time failures that leave nothing to run on panic.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

extern crate alloc;

pub mod abi;
mod config;
mod cpu;
pub mod entry;
mod error;
mod kernel;
mod lifecycle;
mod loader;
mod memory;
mod sched;
mod security;

pub use crate::config::KernelConfig;
pub use crate::cpu::Cpu;
pub use crate::error::{ErrorKind, KernelError, LoaderError};
pub use crate::kernel::{BootInfo, Kernel};
pub use crate::lifecycle::WaitOutcome;
pub use crate::loader::{ExecutableLoader, ImageBuilder, LoadedImage, SegmentFlags};
pub use crate::security::{AllowAll, Operation, PermissionCheck};

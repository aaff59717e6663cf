//! # Process Control Blocks
//!
//! Everything the kernel knows about a process, and the fixed-capacity table
//! that holds them.
//!
//! ## Pieces
//! - [`Process`]: the PCB. Identity, state, accounting, the resources the
//!   process owns (address-space root, kernel stack, register context) and
//!   its [`FdTable`].
//! - [`ProcessTable`]: a slot arena of `MAX_PROCESSES` entries. Slots are
//!   addressed by [`SlotId`]; processes by [`Pid`].
//! - [`ProcessQueue`]: an index-linked FIFO threaded through the table. Each
//!   PCB has exactly one [`QueueLink`], so a process can sit in at most one
//!   queue, and the link remembers which one.
//!
//! ## States
//!
//! ```text
//!            ┌─────── preempt / yield ───────┐
//!            ▼                               │
//!  create ─► Ready ─────── dispatch ─────► Running ─── exit / kill ──► Zombie ─► reaped
//!            ▲                               │
//!            └── wake / continue ── Blocked ◄┘ wait / stop
//! ```
//!
//! The crate only models these structures; transitions are driven by the
//! scheduler and the lifecycle code in the kernel core.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

extern crate alloc;

mod fd;
mod ids;
mod process;
mod queue;
mod registers;
mod signal;
mod state;
mod table;

pub use crate::fd::{FdError, FdTable, FileDescriptor, OpenFile};
pub use crate::ids::{Pid, Priority, ProcessType, SlotId};
pub use crate::process::{KernelStack, Process, ProcessInfo, UserStack};
pub use crate::queue::{ProcessQueue, QueueError, QueueLink, QueueLinks, QueueTag};
pub use crate::registers::{KERNEL_CS, KERNEL_DS, RegisterSnapshot, USER_CS, USER_DS};
pub use crate::signal::{Signal, SignalError};
pub use crate::state::{BlockReason, ProcessState};
pub use crate::table::{ProcessTable, TableError};

//! # Priority Round-Robin Scheduler
//!
//! Eight ready queues (priority `0` is served first), one blocked queue and
//! one zombie queue, all threaded through the [`ProcessTable`](kernel_proc::ProcessTable).
//!
//! ```text
//!  ready[0] ─► A ─► B          highest priority, served first
//!  ready[1]
//!  ready[2] ─► C
//!   ...
//!  ready[7] ─► D               lowest priority
//!  blocked  ─► E (stopped) ─► F (waiting for child)
//!  zombies  ─► G
//!  current  = H (Running, in no queue)
//!  idle     = pid 0 (never queued)
//! ```
//!
//! Within a level dispatch is FIFO; a preempted or yielding process goes to
//! the tail of its level. There is no aging and no priority inheritance.
//!
//! The scheduler decides *who* runs. It hands back a [`Switch`] and leaves
//! saving registers and activating address spaces to the caller.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

mod audit;
mod scheduler;

pub use crate::audit::StateViolation;
pub use crate::scheduler::{Scheduler, Switch};

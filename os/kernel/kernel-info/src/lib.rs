//! # Kernel Configuration and Boot Interface
//!
//! This crate defines the memory layout constants, process limits and the
//! boot memory map contract shared by every kernel-core crate. It is the single
//! source of truth for values that several subsystems must agree on (e.g. the
//! number of priority levels used by both the process table and the scheduler).
//!
//! ## Architecture
//!
//! ### Boot Information ([`boot`])
//! The physical memory map handed over by the bootloader:
//! * **Regions**: `{base, length, kind}` triples, `#[repr(C)]` for the handoff
//! * **Usability**: only [`Available`](boot::MemoryRegionKind::Available) regions feed the frame allocator
//!
//! ### Memory Layout ([`memory`])
//! The kernel's virtual memory architecture:
//! * **Address Space Split**: PML4 entries `0..256` are per-process, `256..512` are shared kernel
//! * **Higher Half Design**: Kernel execution at high virtual addresses
//! * **Stacks**: user and kernel stack placement and sizes
//!
//! ### Process Limits ([`process`])
//! Scheduler and process-table constants:
//! * **Priorities**: 8 levels, 0 is the most urgent
//! * **Time Slices**: ticks per quantum and tick length
//! * **Tables**: process slots and descriptors per process
//!
//! ## Virtual Memory Architecture
//!
//! ```text
//! 0x0000_0000_0000_0000 ┌─────────────────────────────────┐
//!                       │         User Space              │
//!  USER_IMAGE_BASE      │   image, heap (grows up)        │
//!                       │            ...                  │
//!  USER_STACK_TOP       │   stack (grows down)            │
//! USERSPACE_END         ├─────────────────────────────────┤ 0x0000_8000_0000_0000
//!                       │     Non-canonical hole          │
//! HHDM_BASE             ├─────────────────────────────────┤ 0xffff_8880_0000_0000
//!                       │   Higher Half Direct Mapping    │
//! KERNEL_BASE           ├─────────────────────────────────┤ 0xffff_ffff_8000_0000
//!                       │       Kernel Text & Data        │
//! 0xFFFF_FFFF_FFFF_FFFF └─────────────────────────────────┘
//! ```
//!
//! ## Physical Memory Layout
//!
//! ```text
//! 0x0000_0000 ┌─────────────────────────────────┐
//!             │     Low Memory (< 1MiB)         │
//! PHYS_LOAD   ├─────────────────────────────────┤ 0x0010_0000 (1 MiB)
//!             │   Kernel Image + Boot Data      │
//! LOW_RESERVED├─────────────────────────────────┤ 0x0030_0000 (3 MiB)
//!             │    Available RAM                │
//!             │  (frame bitmap, buddy pool)     │
//!             └─────────────────────────────────┘
//! ```
//!
//! All constants are checked for consistency at compile time.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod boot;
pub mod memory;
pub mod process;

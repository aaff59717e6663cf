//! # Virtual and Physical Memory Address Types
//!
//! Strongly typed wrappers for raw memory addresses and physical frames used
//! by the allocators, the page-table builder and the process manager.
//!
//! ## Overview
//!
//! | Type | Description |
//! |------|-------------|
//! | [`MemoryAddress`] | A raw 64-bit address, either physical or virtual. |
//! | [`PhysicalAddress`] | Refers to physical memory (RAM or MMIO). |
//! | [`VirtualAddress`] | Refers to page-table translated memory. |
//! | [`PhysicalFrame`] | A 4 KiB-aligned physical frame, the unit of the frame bitmap. |
//!
//! The kernel core only ever hands out memory in multiples of
//! [`FRAME_SIZE`]; larger blocks (buddy orders, slabs) are expressed as a
//! base frame plus a frame count.
//!
//! ## Typical Usage
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let pa = PhysicalAddress::new(0x0000_0010_2000_0042);
//! let frame = pa.frame();
//! assert_eq!(frame.base().as_u64(), 0x0000_0010_2000_0000);
//! assert_eq!(pa.frame_offset(), 0x42);
//! assert_eq!(frame.base() + pa.frame_offset(), pa);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod memory_address;
mod physical_address;
mod physical_frame;
mod virtual_address;

pub use crate::memory_address::MemoryAddress;
pub use crate::physical_address::PhysicalAddress;
pub use crate::physical_frame::PhysicalFrame;
pub use crate::virtual_address::VirtualAddress;

/// log2 of [`FRAME_SIZE`].
pub const FRAME_SHIFT: u32 = 12;

/// Size of a physical frame (and of a base page) in bytes.
pub const FRAME_SIZE: u64 = 1 << FRAME_SHIFT;

/// Align `x` down to the nearest multiple of `a`.
///
/// `a` must be a non-zero power of two.
///
/// ```rust
/// # use kernel_memory_addresses::align_down;
/// assert_eq!(align_down(4095, 4096), 0);
/// assert_eq!(align_down(8191, 4096), 4096);
/// assert_eq!(align_down(0x12345, 16), 0x12340);
/// ```
#[inline]
#[must_use]
pub const fn align_down(x: u64, a: u64) -> u64 {
    debug_assert!(a.is_power_of_two());
    x & !(a - 1)
}

/// Align `x` up to the nearest multiple of `a`.
///
/// `a` must be a non-zero power of two and `x + (a - 1)` must not overflow.
///
/// ```rust
/// # use kernel_memory_addresses::align_up;
/// assert_eq!(align_up(0, 4096), 0);
/// assert_eq!(align_up(1, 4096), 4096);
/// assert_eq!(align_up(4097, 4096), 8192);
/// ```
#[inline]
#[must_use]
pub const fn align_up(x: u64, a: u64) -> u64 {
    debug_assert!(a.is_power_of_two());
    (x + a - 1) & !(a - 1)
}

/// Number of frames needed to hold `bytes`.
#[inline]
#[must_use]
pub const fn frames_for(bytes: u64) -> u64 {
    align_up(bytes, FRAME_SIZE) >> FRAME_SHIFT
}

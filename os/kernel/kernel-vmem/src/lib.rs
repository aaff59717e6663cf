//! # Virtual Memory Support
//!
//! x86-64 4-level page-table construction for the kernel core.
//!
//! ## What you get
//! - An [`AddressSpace`] handle for one PML4-rooted tree: create, map, unmap,
//!   translate, fork-copy, clear and destroy.
//! - The [`PageEntryBits`] bitfield shared by all four levels.
//! - A 4 KiB-aligned [`PageTable`] and index helpers.
//! - The two seams everything else plugs into: [`FrameAlloc`] (where table and
//!   data frames come from) and [`PhysMapper`] (how the kernel reaches a
//!   physical frame).
//!
//! ## x86-64 Virtual Address → Physical Address Walk
//!
//! ```text
//!  PML4  →  PDPT  →  PD  →  PT  →  Physical Page
//!   │        │        │        │
//!   │        │        │        └───► PTE   (Page Table Entry)  → maps 4 KiB page
//!   │        │        └────────────► PDE   (Page Directory Entry)
//!   │        └─────────────────────► PDPTE (Page Directory Pointer Table Entry)
//!   └──────────────────────────────► PML4E (Page Map Level 4 Entry)
//! ```
//!
//! Each level holds 512 entries of 8 bytes. Intermediate tables are allocated
//! lazily from the frame allocator and zeroed before they are linked.
//!
//! ## Address space split
//!
//! PML4 slots `0..256` (the lower half) belong to the process. Slots
//! `256..512` are copied from the kernel's root when an address space is
//! created, so every process shares the same kernel tables. Those shared
//! tables are never copied, cleared or freed through a process address space.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

extern crate alloc;

pub mod address_space;
mod page_entry_bits;
pub mod page_table;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use crate::address_space::{AddressSpace, MapError, UnmapError};
pub use crate::page_entry_bits::PageEntryBits;
pub use crate::page_table::PageTable;

/// Re-export constants as info module.
pub use kernel_info::memory as info;

use kernel_memory_addresses::{FRAME_SIZE, PhysicalAddress, PhysicalFrame, VirtualAddress};

/// Source of **physical** 4 KiB frames for page tables and anonymous memory.
///
/// The implementation decides where frames come from (boot pool, bitmap,
/// test buffer). Returned frames **must** be 4 KiB aligned; their contents
/// are unspecified.
pub trait FrameAlloc {
    /// Allocate one 4 KiB frame. Returns `None` on out-of-memory.
    fn alloc_4k(&mut self) -> Option<PhysicalFrame>;

    /// Return a frame obtained from [`alloc_4k`](Self::alloc_4k).
    fn free_4k(&mut self, frame: PhysicalFrame);
}

/// Converts physical addresses to usable pointers in the current virtual
/// address space (e.g., via a higher-half direct map, HHDM) and back.
///
/// Typical patterns:
/// - **Kernel**: adds the constant HHDM offset.
/// - **Tests**: offsets into a heap buffer that simulates RAM.
pub trait PhysMapper {
    /// Kernel-virtual address at which `pa` is reachable.
    fn phys_to_virt(&self, pa: PhysicalAddress) -> VirtualAddress;

    /// Inverse of [`phys_to_virt`](Self::phys_to_virt) for addresses inside
    /// the mapped window.
    fn virt_to_phys(&self, va: VirtualAddress) -> PhysicalAddress;

    /// View the bytes at `pa` as a `T`.
    ///
    /// # Safety
    /// - `pa` must be mapped writable through this mapper for `'a`.
    /// - `T` must match the bytes at `pa` and be suitably aligned.
    /// - No other live reference may alias the same bytes mutably.
    #[inline]
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        unsafe { &mut *self.phys_to_virt(pa).as_mut_ptr::<T>() }
    }

    /// Fill a whole frame with zeros.
    ///
    /// # Safety
    /// The frame must be mapped and not referenced elsewhere.
    #[inline]
    unsafe fn zero_frame(&self, frame: PhysicalFrame) {
        let p = self.phys_to_virt(frame.base()).as_mut_ptr::<u8>();
        unsafe { core::ptr::write_bytes(p, 0, FRAME_SIZE as usize) };
    }

    /// Copy the contents of `src` into `dst`.
    ///
    /// # Safety
    /// Both frames must be mapped, distinct and not referenced elsewhere.
    #[inline]
    unsafe fn copy_frame(&self, src: PhysicalFrame, dst: PhysicalFrame) {
        let s = self.phys_to_virt(src.base()).as_mut_ptr::<u8>();
        let d = self.phys_to_virt(dst.base()).as_mut_ptr::<u8>();
        unsafe { core::ptr::copy_nonoverlapping(s, d, FRAME_SIZE as usize) };
    }
}

impl<M: PhysMapper + ?Sized> PhysMapper for &M {
    #[inline]
    fn phys_to_virt(&self, pa: PhysicalAddress) -> VirtualAddress {
        (**self).phys_to_virt(pa)
    }

    #[inline]
    fn virt_to_phys(&self, va: VirtualAddress) -> PhysicalAddress {
        (**self).virt_to_phys(va)
    }
}

/// Map a physical page table frame into the current virtual address space and
/// return a mutable reference to it.
///
/// # Safety
/// - `frame` must hold a page table (or be about to be initialized as one).
/// - The mapping must be writable for mut access.
#[inline]
pub(crate) unsafe fn get_table<'a, M: PhysMapper + ?Sized>(
    m: &M,
    frame: PhysicalFrame,
) -> &'a mut PageTable {
    unsafe { m.phys_to_mut::<PageTable>(frame.base()) }
}

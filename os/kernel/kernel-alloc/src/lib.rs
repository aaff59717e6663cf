//! # Kernel Memory Allocation
//!
//! Physical memory management for the kernel core, from raw frames up to a
//! `kmalloc` style heap.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 Kernel Heap (kmalloc)               │
//! │    • size classes 32..2048 bytes on slab caches     │
//! │    • larger requests straight from the buddy pool   │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │                  Slab Allocator                     │
//! │    • fixed-size object caches                       │
//! │    • in-band slab headers with occupancy bitmaps    │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │                 Buddy Allocator                     │
//! │    • power-of-two blocks, orders 0..20              │
//! │    • split on alloc, coalesce on free               │
//! └─────────────────┬───────────────────────────────────┘
//!                   │ pool carved out at boot
//! ┌─────────────────▼───────────────────────────────────┐
//! │           Physical Frame Allocator                  │
//! │    • one bit per 4 KiB frame                        │
//! │    • page tables, user pages, the buddy pool        │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! Every layer reaches memory through a [`PhysMapper`]: the
//! [`HhdmPhysMapper`](phys_mapper::HhdmPhysMapper) in the kernel, a heap buffer
//! in tests. Nothing here allocates from a Rust global allocator.
//!
//! ## Ownership
//!
//! A physical frame is owned by exactly one of: the buddy pool, a page-table
//! level, or a user leaf mapping. Double frees are detected at every layer and
//! rejected with an error instead of corrupting the free structures.
//!
//! ## Usage
//! ```rust
//! use kernel_alloc::KernelMemory;
//! use kernel_info::boot::MemoryRegion;
//! use kernel_vmem::testing::TestPhys;
//!
//! let phys = TestPhys::with_frames(512);
//! let map = [MemoryRegion::available(0, 512 * 4096)];
//! let mut mem = KernelMemory::init(&phys, &map, 0x1000, 128).unwrap();
//!
//! let p = mem.heap_mut().kmalloc(100).unwrap();
//! mem.heap_mut().kfree(p).unwrap();
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod buddy;
pub mod frame_alloc;
pub mod heap;
pub mod phys_mapper;
pub mod slab;

use crate::buddy::{BuddyAllocator, BuddyError, MAX_BUDDY_ORDER};
use crate::frame_alloc::{BitmapFrameAlloc, MemoryStats};
use crate::heap::KernelHeap;
use crate::slab::{SlabAllocator, SlabError};
use kernel_info::boot::MemoryRegion;
use kernel_memory_addresses::{PhysicalAddress, PhysicalFrame};
use kernel_vmem::{FrameAlloc, PhysMapper};
use log::info;

#[derive(Debug, thiserror::Error)]
pub enum MemoryInitError {
    #[error("no room for a buddy pool of {0} frames")]
    BuddyPool(usize),
    #[error(transparent)]
    Buddy(#[from] BuddyError),
    #[error(transparent)]
    Slab(#[from] SlabError),
}

/// Frame bitmap plus the heap built on a pool reserved from it.
pub struct KernelMemory<'m, M: PhysMapper> {
    mapper: &'m M,
    frames: BitmapFrameAlloc,
    heap: KernelHeap<'m, M>,
    pool: (PhysicalAddress, usize),
}

impl<'m, M: PhysMapper> KernelMemory<'m, M> {
    /// Bring up all allocator layers.
    ///
    /// The frame bitmap is built from `map` with the first `reserved_low`
    /// bytes kept back, then `buddy_frames` contiguous frames are moved into
    /// the buddy pool.
    ///
    /// # Errors
    /// Fails if the pool cannot be reserved or the size classes cannot be
    /// created.
    pub fn init(
        mapper: &'m M,
        map: &[MemoryRegion],
        reserved_low: u64,
        buddy_frames: usize,
    ) -> Result<Self, MemoryInitError> {
        let mut frames = BitmapFrameAlloc::new();
        frames.init(map, reserved_low);

        // Natural alignment keeps the pool in as few blocks as possible.
        let align = buddy_frames
            .next_power_of_two()
            .min(1 << (MAX_BUDDY_ORDER - 1));
        let base = frames
            .allocate_contiguous(buddy_frames, align)
            .or_else(|| frames.allocate_contiguous(buddy_frames, 1))
            .ok_or(MemoryInitError::BuddyPool(buddy_frames))?;

        let mut buddy = BuddyAllocator::new(mapper);
        buddy.add_region(base, buddy_frames)?;
        let heap = KernelHeap::new(buddy, SlabAllocator::new(mapper))?;

        info!(
            "memory: {} frames tracked, {} free, buddy pool {base} ({buddy_frames} frames)",
            frames.total_frames(),
            frames.free_frames()
        );

        Ok(Self {
            mapper,
            frames,
            heap,
            pool: (base, buddy_frames),
        })
    }

    #[must_use]
    pub const fn mapper(&self) -> &'m M {
        self.mapper
    }

    #[must_use]
    pub const fn frames(&self) -> &BitmapFrameAlloc {
        &self.frames
    }

    pub const fn frames_mut(&mut self) -> &mut BitmapFrameAlloc {
        &mut self.frames
    }

    #[must_use]
    pub const fn heap(&self) -> &KernelHeap<'m, M> {
        &self.heap
    }

    pub const fn heap_mut(&mut self) -> &mut KernelHeap<'m, M> {
        &mut self.heap
    }

    /// Both halves at once, for code that maps pages while holding heap objects.
    pub const fn split_mut(&mut self) -> (&mut BitmapFrameAlloc, &mut KernelHeap<'m, M>) {
        (&mut self.frames, &mut self.heap)
    }

    /// Base and size (in frames) of the buddy pool.
    #[must_use]
    pub const fn buddy_pool(&self) -> (PhysicalAddress, usize) {
        self.pool
    }

    /// Frame-level statistics; the buddy pool counts as used.
    #[must_use]
    pub const fn stats(&self) -> MemoryStats {
        self.frames.stats()
    }
}

impl<M: PhysMapper> FrameAlloc for KernelMemory<'_, M> {
    fn alloc_4k(&mut self) -> Option<PhysicalFrame> {
        self.frames.alloc_4k()
    }

    fn free_4k(&mut self, frame: PhysicalFrame) {
        self.frames.free_4k(frame);
    }
}

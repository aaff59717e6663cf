//! In-memory stand-ins for physical RAM and a frame source.
//!
//! Physical addresses are byte offsets into a heap buffer of 4 KiB-aligned
//! frames, so `PhysicalAddress(0)` is the first frame of the buffer. Only
//! available in tests or with the `testing` feature.

use crate::{FrameAlloc, PhysMapper};
use alloc::boxed::Box;
use alloc::vec::Vec;
use kernel_memory_addresses::{FRAME_SIZE, PhysicalAddress, PhysicalFrame, VirtualAddress};

/// A 4 KiB-aligned raw frame.
#[repr(C, align(4096))]
struct Aligned4K([u8; 4096]);

/// Simulated physical memory with a direct-map style [`PhysMapper`].
pub struct TestPhys {
    base: *mut Aligned4K,
    frames: usize,
}

impl TestPhys {
    /// Zeroed "RAM" of `n` frames.
    #[must_use]
    pub fn with_frames(n: usize) -> Self {
        let mut v = Vec::with_capacity(n);
        v.resize_with(n, || Aligned4K([0u8; 4096]));
        let base = Box::into_raw(v.into_boxed_slice()).cast::<Aligned4K>();
        Self { base, frames: n }
    }

    #[must_use]
    pub const fn frame_count(&self) -> usize {
        self.frames
    }

    /// Size of the simulated memory in bytes.
    #[must_use]
    pub const fn len_bytes(&self) -> u64 {
        self.frames as u64 * FRAME_SIZE
    }
}

impl Drop for TestPhys {
    fn drop(&mut self) {
        let slice = core::ptr::slice_from_raw_parts_mut(self.base, self.frames);
        drop(unsafe { Box::from_raw(slice) });
    }
}

impl PhysMapper for TestPhys {
    fn phys_to_virt(&self, pa: PhysicalAddress) -> VirtualAddress {
        debug_assert!(pa.as_u64() < self.len_bytes(), "{pa} outside test memory");
        VirtualAddress::from_ptr(self.base) + pa.as_u64()
    }

    fn virt_to_phys(&self, va: VirtualAddress) -> PhysicalAddress {
        let base = VirtualAddress::from_ptr(self.base);
        debug_assert!(va >= base && va.as_u64() - base.as_u64() < self.len_bytes());
        PhysicalAddress::new(va.as_u64() - base.as_u64())
    }
}

/// A [`FrameAlloc`] handing out frames from a fixed range, lowest first.
///
/// Panics on a double free or a foreign frame so tests catch accounting bugs.
pub struct TestFrames {
    free: Vec<PhysicalFrame>,
    first: u64,
    end: u64,
}

impl TestFrames {
    /// Frames `[first, end)` (frame indices).
    #[must_use]
    pub fn range(first: u64, end: u64) -> Self {
        let free = (first..end).rev().map(PhysicalFrame::from_index).collect();
        Self { free, first, end }
    }

    /// Every frame of `phys`.
    #[must_use]
    pub fn all_of(phys: &TestPhys) -> Self {
        Self::range(0, phys.frame_count() as u64)
    }

    #[must_use]
    pub fn free_count(&self) -> usize {
        self.free.len()
    }
}

impl FrameAlloc for TestFrames {
    fn alloc_4k(&mut self) -> Option<PhysicalFrame> {
        self.free.pop()
    }

    fn free_4k(&mut self, frame: PhysicalFrame) {
        assert!(
            (self.first..self.end).contains(&frame.index()),
            "{frame} was never handed out"
        );
        assert!(!self.free.contains(&frame), "double free of {frame}");
        self.free.push(frame);
    }
}

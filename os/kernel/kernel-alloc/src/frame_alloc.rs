//! # Physical Frame Bitmap
//!
//! One bit per 4 KiB frame of physical memory; a set bit means "in use".
//! Allocation is first fit over the bitmap words.
//!
//! The bitmap is a fixed array inside the allocator, so it needs no heap and
//! can live in a `static` or inside the kernel state before anything else is
//! up. It covers up to [`MAX_FRAMES`] frames (512 MiB); memory above that is
//! ignored.
//!
//! ## Initialization
//!
//! 1. Every bit is set.
//! 2. Bits of usable regions from the boot memory map are cleared.
//! 3. The low reserved region (kernel image, boot data) is set again.

use kernel_info::boot::MemoryRegion;
use kernel_memory_addresses::{FRAME_SIZE, PhysicalAddress, PhysicalFrame, align_down, align_up};
use kernel_vmem::FrameAlloc;
use log::{trace, warn};

/// Number of 64-bit words in the bitmap.
const BITMAP_WORDS: usize = 2048;

/// Highest number of frames the bitmap can track.
pub const MAX_FRAMES: usize = BITMAP_WORDS * 64;

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum FrameError {
    #[error("physical address {0} is not frame aligned")]
    Unaligned(PhysicalAddress),
    #[error("physical address {0} is outside managed memory")]
    OutOfRange(PhysicalAddress),
    #[error("frame {0} is not allocated")]
    NotAllocated(PhysicalAddress),
}

/// Byte counts of managed physical memory.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct MemoryStats {
    pub total: u64,
    pub available: u64,
    pub used: u64,
}

pub struct BitmapFrameAlloc {
    bitmap: [u64; BITMAP_WORDS],
    total_frames: usize,
    free_frames: usize,
}

impl Default for BitmapFrameAlloc {
    fn default() -> Self {
        Self::new()
    }
}

impl BitmapFrameAlloc {
    /// An allocator that manages nothing; every frame reads as used.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            bitmap: [u64::MAX; BITMAP_WORDS],
            total_frames: 0,
            free_frames: 0,
        }
    }

    /// Build the bitmap from the boot memory map.
    ///
    /// Tracked memory spans frame 0 up to the end of the highest usable
    /// region (capped at [`MAX_FRAMES`]). The first `reserved_low` bytes stay
    /// used regardless of what the map says.
    pub fn init(&mut self, map: &[MemoryRegion], reserved_low: u64) {
        self.bitmap.fill(u64::MAX);

        let top = map
            .iter()
            .filter(|r| r.is_usable())
            .map(|r| r.end().as_u64() / FRAME_SIZE)
            .max()
            .unwrap_or(0);
        #[allow(clippy::cast_possible_truncation)]
        let top = (top as usize).min(MAX_FRAMES);
        self.total_frames = top;

        for region in map.iter().filter(|r| r.is_usable()) {
            let first = align_up(region.start().as_u64(), FRAME_SIZE) / FRAME_SIZE;
            let end = align_down(region.end().as_u64(), FRAME_SIZE) / FRAME_SIZE;
            #[allow(clippy::cast_possible_truncation)]
            let frames = (first as usize)..(end as usize).min(top);
            for index in frames {
                self.clear_bit(index);
            }
        }

        #[allow(clippy::cast_possible_truncation)]
        let low = (align_up(reserved_low, FRAME_SIZE) / FRAME_SIZE) as usize;
        for index in 0..low.min(top) {
            self.set_bit(index);
        }

        self.free_frames = (0..top).filter(|&i| !self.test_bit(i)).count();
        trace!(
            "frame bitmap: {} frames tracked, {} free",
            self.total_frames, self.free_frames
        );
    }

    #[inline]
    const fn test_bit(&self, index: usize) -> bool {
        self.bitmap[index / 64] & (1 << (index % 64)) != 0
    }

    #[inline]
    const fn set_bit(&mut self, index: usize) {
        self.bitmap[index / 64] |= 1 << (index % 64);
    }

    #[inline]
    const fn clear_bit(&mut self, index: usize) {
        self.bitmap[index / 64] &= !(1 << (index % 64));
    }

    /// Allocate the lowest free frame.
    pub fn allocate_frame(&mut self) -> Option<PhysicalAddress> {
        if self.free_frames == 0 {
            return None;
        }

        let words = self.total_frames.div_ceil(64);
        for (w, word) in self.bitmap[..words].iter().enumerate() {
            if *word == u64::MAX {
                continue;
            }
            let index = w * 64 + word.trailing_ones() as usize;
            if index >= self.total_frames {
                break;
            }
            self.set_bit(index);
            self.free_frames -= 1;
            return Some(PhysicalFrame::from_index(index as u64).base());
        }
        None
    }

    fn index_of(&self, pa: PhysicalAddress) -> Result<usize, FrameError> {
        if !pa.is_frame_aligned() {
            return Err(FrameError::Unaligned(pa));
        }
        #[allow(clippy::cast_possible_truncation)]
        let index = pa.frame().index() as usize;
        if index >= self.total_frames {
            return Err(FrameError::OutOfRange(pa));
        }
        Ok(index)
    }

    /// Return a frame to the pool.
    ///
    /// # Errors
    /// The frame must be aligned, managed and currently allocated. A double
    /// free is rejected and leaves the bitmap untouched.
    pub fn free_frame(&mut self, pa: PhysicalAddress) -> Result<(), FrameError> {
        let index = self.index_of(pa)?;
        if !self.test_bit(index) {
            warn!("rejected double free of frame {pa}");
            return Err(FrameError::NotAllocated(pa));
        }
        self.clear_bit(index);
        self.free_frames += 1;
        Ok(())
    }

    /// Allocate `count` physically contiguous frames whose first frame index
    /// is a multiple of `align_frames`.
    pub fn allocate_contiguous(
        &mut self,
        count: usize,
        align_frames: usize,
    ) -> Option<PhysicalAddress> {
        if count == 0 || count > self.free_frames {
            return None;
        }
        let align = align_frames.max(1);

        let mut start = 0usize;
        while start + count <= self.total_frames {
            match (start..start + count).find(|&i| self.test_bit(i)) {
                // skip past the blocker, then realign
                Some(used) => start = (used + 1).div_ceil(align) * align,
                None => {
                    for i in start..start + count {
                        self.set_bit(i);
                    }
                    self.free_frames -= count;
                    let pa = PhysicalFrame::from_index(start as u64).base();
                    trace!("reserved {count} contiguous frames at {pa}");
                    return Some(pa);
                }
            }
        }
        None
    }

    /// Free a run obtained from [`allocate_contiguous`](Self::allocate_contiguous).
    ///
    /// # Errors
    /// Fails without side effects if any frame of the run is not allocated.
    pub fn free_contiguous(&mut self, pa: PhysicalAddress, count: usize) -> Result<(), FrameError> {
        let first = self.index_of(pa)?;
        if first + count > self.total_frames {
            return Err(FrameError::OutOfRange(pa));
        }
        if let Some(i) = (first..first + count).find(|&i| !self.test_bit(i)) {
            return Err(FrameError::NotAllocated(
                PhysicalFrame::from_index(i as u64).base(),
            ));
        }
        for i in first..first + count {
            self.clear_bit(i);
        }
        self.free_frames += count;
        Ok(())
    }

    /// Whether the frame at `pa` is currently in use.
    ///
    /// Untracked addresses read as in use.
    #[must_use]
    pub fn is_allocated(&self, pa: PhysicalAddress) -> bool {
        self.index_of(pa.frame().base())
            .map_or(true, |i| self.test_bit(i))
    }

    #[must_use]
    pub const fn total_frames(&self) -> usize {
        self.total_frames
    }

    #[must_use]
    pub const fn free_frames(&self) -> usize {
        self.free_frames
    }

    #[must_use]
    pub const fn used_frames(&self) -> usize {
        self.total_frames - self.free_frames
    }

    #[must_use]
    pub const fn stats(&self) -> MemoryStats {
        MemoryStats {
            total: self.total_frames as u64 * FRAME_SIZE,
            available: self.free_frames as u64 * FRAME_SIZE,
            used: self.used_frames() as u64 * FRAME_SIZE,
        }
    }
}

impl FrameAlloc for BitmapFrameAlloc {
    fn alloc_4k(&mut self) -> Option<PhysicalFrame> {
        self.allocate_frame().map(PhysicalFrame::containing)
    }

    fn free_4k(&mut self, frame: PhysicalFrame) {
        if let Err(e) = self.free_frame(frame.base()) {
            warn!("free_4k: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_info::boot::MemoryRegion;

    fn with_frames(frames: u64, reserved_frames: u64) -> BitmapFrameAlloc {
        let mut a = BitmapFrameAlloc::new();
        a.init(
            &[MemoryRegion::available(0, frames * FRAME_SIZE)],
            reserved_frames * FRAME_SIZE,
        );
        a
    }

    #[test]
    fn empty_allocator_hands_out_nothing() {
        let mut a = BitmapFrameAlloc::new();
        assert_eq!(a.allocate_frame(), None);
        assert_eq!(a.total_frames(), 0);
    }

    #[test]
    fn init_respects_reserved_low_and_holes() {
        let mut a = BitmapFrameAlloc::new();
        a.init(
            &[
                MemoryRegion::available(0, 0x9_F000),
                MemoryRegion::reserved(0x9_F000, 0x6_1000),
                MemoryRegion::available(0x10_0000, 0x40_0000),
            ],
            0x30_0000,
        );
        assert_eq!(a.total_frames(), 0x500);
        // only [3 MiB, 5 MiB) is left
        assert_eq!(a.free_frames(), 0x200);
        assert!(a.is_allocated(PhysicalAddress::new(0x2F_F000)));
        assert!(!a.is_allocated(PhysicalAddress::new(0x30_0000)));
        assert_eq!(a.allocate_frame(), Some(PhysicalAddress::new(0x30_0000)));
    }

    #[test]
    fn frames_are_unique_until_freed() {
        let mut a = with_frames(64, 0);
        let mut seen = Vec::new();
        while let Some(f) = a.allocate_frame() {
            assert!(!seen.contains(&f));
            seen.push(f);
        }
        assert_eq!(seen.len(), 64);
        assert_eq!(a.free_frames(), 0);

        a.free_frame(seen[17]).unwrap();
        assert_eq!(a.allocate_frame(), Some(seen[17]));
    }

    #[test]
    fn exhaustion_then_free_recovers() {
        let mut a = with_frames(1024, 24);
        assert_eq!(a.free_frames(), 1000);

        let frames: Vec<_> = (0..1000).map(|_| a.allocate_frame().unwrap()).collect();
        assert_eq!(a.allocate_frame(), None);

        a.free_frame(frames[500]).unwrap();
        assert_eq!(a.allocate_frame(), Some(frames[500]));
    }

    #[test]
    fn double_free_is_rejected() {
        let mut a = with_frames(16, 0);
        let f = a.allocate_frame().unwrap();
        a.free_frame(f).unwrap();
        assert_eq!(a.free_frame(f), Err(FrameError::NotAllocated(f)));
        assert_eq!(a.free_frames(), 16);

        assert_eq!(
            a.free_frame(PhysicalAddress::new(0x1008)),
            Err(FrameError::Unaligned(PhysicalAddress::new(0x1008)))
        );
        assert!(matches!(
            a.free_frame(PhysicalAddress::new(0x100_0000)),
            Err(FrameError::OutOfRange(_))
        ));
    }

    #[test]
    fn contiguous_runs_skip_used_frames_and_honor_alignment() {
        let mut a = with_frames(64, 0);
        let _ = a.allocate_frame(); // frame 0
        let run = a.allocate_contiguous(8, 8).unwrap();
        assert_eq!(run, PhysicalAddress::new(8 * FRAME_SIZE));
        assert_eq!(a.free_frames(), 64 - 9);

        assert_eq!(a.allocate_contiguous(64, 1), None);
        a.free_contiguous(run, 8).unwrap();
        assert_eq!(a.free_frames(), 63);
        assert!(a.free_contiguous(run, 8).is_err());
    }

    #[test]
    fn stats_are_in_bytes() {
        let mut a = with_frames(32, 2);
        let _ = a.allocate_frame();
        let s = a.stats();
        assert_eq!(s.total, 32 * FRAME_SIZE);
        assert_eq!(s.available, 29 * FRAME_SIZE);
        assert_eq!(s.used, 3 * FRAME_SIZE);
    }
}

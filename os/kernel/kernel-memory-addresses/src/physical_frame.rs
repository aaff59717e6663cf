use crate::{FRAME_SHIFT, FRAME_SIZE, PhysicalAddress};
use core::fmt;

/// A 4 KiB physical frame, identified by its page-aligned base address.
///
/// Frames are what the bitmap allocator hands out and what page-table entries
/// point to. The base is always aligned to [`FRAME_SIZE`].
///
/// ```rust
/// # use kernel_memory_addresses::*;
/// let f = PhysicalFrame::from_index(3);
/// assert_eq!(f.base(), PhysicalAddress::new(0x3000));
/// assert_eq!(f.next().index(), 4);
/// ```
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalFrame(u64);

impl PhysicalFrame {
    /// The frame that contains `pa` (lower bits dropped).
    #[inline]
    #[must_use]
    pub const fn containing(pa: PhysicalAddress) -> Self {
        Self(pa.as_u64() & !(FRAME_SIZE - 1))
    }

    /// Build from an already aligned address.
    ///
    /// Returns `None` if `pa` is not frame aligned.
    #[inline]
    #[must_use]
    pub const fn from_aligned(pa: PhysicalAddress) -> Option<Self> {
        if pa.is_frame_aligned() {
            Some(Self(pa.as_u64()))
        } else {
            None
        }
    }

    #[inline]
    #[must_use]
    pub const fn from_index(index: u64) -> Self {
        Self(index << FRAME_SHIFT)
    }

    #[inline]
    #[must_use]
    pub const fn base(self) -> PhysicalAddress {
        PhysicalAddress::new(self.0)
    }

    /// Frame number (`base / FRAME_SIZE`).
    #[inline]
    #[must_use]
    pub const fn index(self) -> u64 {
        self.0 >> FRAME_SHIFT
    }

    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + FRAME_SIZE)
    }
}

impl fmt::Debug for PhysicalFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frame(0x{:016X})", self.0)
    }
}

impl fmt::Display for PhysicalFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}/4K", self.0)
    }
}

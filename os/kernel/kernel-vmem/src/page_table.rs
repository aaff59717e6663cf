//! # Memory Page Table
//!
//! One 4 KiB paging structure (any level) and the index helpers that split a
//! virtual address into its four table indices.
//!
//! ```text
//! | 47‒39 | 38‒30 | 29‒21 | 20‒12 | 11‒0   |
//! |  PML4 |  PDPT |   PD  |   PT  | Offset |
//! ```

use crate::PageEntryBits;
use kernel_info::memory::PAGE_TABLE_ENTRIES;
use kernel_memory_addresses::VirtualAddress;

/// Index into a paging structure at any level.
///
/// Range is `0..512` (checked in debug builds).
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TableIndex(u16);

impl TableIndex {
    /// Construct from a raw `u16`.
    ///
    /// ### Debug assertions
    /// - Asserts `v < 512` in debug builds.
    #[inline]
    #[must_use]
    pub const fn new(v: u16) -> Self {
        debug_assert!((v as usize) < PAGE_TABLE_ENTRIES);
        Self(v)
    }

    /// Index for `level` (4 = PML4 … 1 = PT) of `va`.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn of(va: VirtualAddress, level: u32) -> Self {
        let shift = 12 + 9 * (level - 1);
        Self::new(((va.as_u64() >> shift) & 0x1FF) as u16)
    }

    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// Split `va` into `(PML4, PDPT, PD, PT)` indices.
#[inline]
#[must_use]
pub const fn split_indices(va: VirtualAddress) -> (TableIndex, TableIndex, TableIndex, TableIndex) {
    (
        TableIndex::of(va, 4),
        TableIndex::of(va, 3),
        TableIndex::of(va, 2),
        TableIndex::of(va, 1),
    )
}

/// Rebuild the (lower-half) virtual address addressed by four table indices.
#[inline]
#[must_use]
pub const fn join_indices(i4: usize, i3: usize, i2: usize, i1: usize) -> VirtualAddress {
    VirtualAddress::new(((i4 as u64) << 39) | ((i3 as u64) << 30) | ((i2 as u64) << 21) | ((i1 as u64) << 12))
}

/// A paging structure: 512 entries, 4 KiB-aligned.
#[doc(alias = "PML4")]
#[doc(alias = "PT")]
#[repr(C, align(4096))]
pub struct PageTable {
    entries: [PageEntryBits; PAGE_TABLE_ENTRIES],
}

const _: () = assert!(size_of::<PageTable>() == 4096);

impl PageTable {
    /// Set all entries to zero (non-present).
    #[inline]
    pub fn zero(&mut self) {
        self.entries.fill(PageEntryBits::new());
    }

    #[inline]
    #[must_use]
    pub const fn get(&self, i: TableIndex) -> PageEntryBits {
        self.entries[i.as_usize()]
    }

    #[inline]
    pub const fn set(&mut self, i: TableIndex, e: PageEntryBits) {
        self.entries[i.as_usize()] = e;
    }

    #[inline]
    #[must_use]
    pub const fn entry(&self, i: usize) -> PageEntryBits {
        self.entries[i]
    }

    #[inline]
    pub const fn set_entry(&mut self, i: usize, e: PageEntryBits) {
        self.entries[i] = e;
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(|e| !e.present())
    }

    #[must_use]
    pub fn present_count(&self) -> usize {
        self.entries.iter().filter(|e| e.present()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indices_cover_each_level() {
        let va = VirtualAddress::new(0x0000_7fff_ffff_e000);
        let (i4, i3, i2, i1) = split_indices(va);
        assert_eq!(i4.as_usize(), 255);
        assert_eq!(i3.as_usize(), 511);
        assert_eq!(i2.as_usize(), 511);
        assert_eq!(i1.as_usize(), 510);
        assert_eq!(join_indices(255, 511, 511, 510), va);
    }

    #[test]
    fn kernel_base_lands_in_last_slot() {
        let va = VirtualAddress::new(kernel_info::memory::KERNEL_BASE);
        let (i4, i3, _, _) = split_indices(va);
        assert_eq!(i4.as_usize(), 511);
        assert_eq!(i3.as_usize(), 510);
    }
}

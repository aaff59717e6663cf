use bitfield_struct::bitfield;
use kernel_memory_addresses::{PhysicalAddress, PhysicalFrame};

/// Represents a single 64-bit x86-64 page table entry in its raw bitfield form.
///
/// This structure models the **common superset** of fields found in all
/// four paging levels (PML4E, PDPTE, PDE, PTE). The kernel core only builds
/// 4 KiB mappings, so `large_page` is always clear in entries it writes.
///
/// ### Bit layout
///
/// | Bits      | Name / Mnemonic   | Meaning |
/// |-----------|-------------------|----------|
/// | 0         | `P` (present)     | Valid entry if set |
/// | 1         | `RW`              | Writable if set |
/// | 2         | `US`              | User-mode accessible if set |
/// | 3         | `PWT`             | Write-through caching |
/// | 4         | `PCD`             | Disable caching |
/// | 5         | `A`               | Accessed |
/// | 6         | `D`               | Dirty (leaf only) |
/// | 7         | `PS`              | Large page flag |
/// | 8         | `G`               | Global (leaf only) |
/// | 9         | owned (OS)        | Leaf frame belongs to this address space |
/// | 10–11     | OS avail low      | Reserved for OS use |
/// | 12–51     | `addr`            | Physical frame bits [51:12] |
/// | 52–58     | OS avail high     | Reserved for OS use |
/// | 59–62     | `PKU` / OS use    | Protection key or OS use |
/// | 63        | `NX`              | Execute disable |
///
/// ### Ownership
/// The hardware ignores bit 9. The kernel sets it on leaves whose frame was
/// allocated *for* this address space (anonymous memory, stacks, loaded
/// segments, fork copies). Only owned frames are returned to the frame
/// allocator when the address space is cleared; leaves without the bit
/// (device memory, explicit `map_page` calls) are merely unlinked.
///
/// ### Example
/// ```rust
/// # use kernel_memory_addresses::PhysicalAddress;
/// # use kernel_vmem::PageEntryBits;
/// let mut e = PageEntryBits::new();
/// e.set_present(true);
/// e.set_writable(true);
/// e.set_physical_address(PhysicalAddress::new(0x12345));
/// assert!(e.present());
/// assert_eq!(e.physical_address().as_u64(), 0x12000);
/// ```
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct PageEntryBits {
    /// Present (P, bit 0).
    pub present: bool,

    /// Writable (RW, bit 1).
    pub writable: bool,

    /// User/Supervisor (US, bit 2).
    ///
    /// Must be set on every level of the walk for user-mode access.
    pub user_access: bool,

    /// Page Write-Through (PWT, bit 3).
    pub write_through: bool,

    /// Page Cache Disable (PCD, bit 4).
    pub cache_disabled: bool,

    /// Accessed (A, bit 5). Set by the CPU.
    pub accessed: bool,

    /// Dirty (D, bit 6), **leaf only**. Set by the CPU on first write.
    pub dirty: bool,

    /// Large Page / Page Size (PS, bit 7).
    pub large_page: bool,

    /// Global (G, bit 8), **leaf only**. Survives CR3 reloads.
    pub global_translation: bool,

    /// OS-available bit 9: the leaf frame is owned by this address space.
    pub owned: bool,

    /// OS-available (bits 10..=11).
    #[bits(2)]
    pub os_available_low: u8,

    /// Physical address bits [51:12] (bits 12..=51).
    #[bits(40)]
    phys_addr_bits_51_12: u64,

    /// OS-available (bits 52..=58).
    #[bits(7)]
    pub os_available_high: u8,

    /// Protection Key (PKU, bits 59..=62) if supported; otherwise OS use.
    #[bits(4)]
    pub protection_key: u8,

    /// No-Execute (NX, bit 63).
    pub no_execute: bool,
}

impl PageEntryBits {
    #[inline]
    pub const fn set_physical_address(&mut self, phys: PhysicalAddress) {
        // store bits [51:12]
        self.set_phys_addr_bits_51_12(phys.as_u64() >> 12);
    }

    #[inline]
    #[must_use]
    pub const fn with_physical_address(mut self, phys: PhysicalAddress) -> Self {
        self.set_physical_address(phys);
        self
    }

    #[inline]
    #[must_use]
    pub const fn physical_address(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.phys_addr_bits_51_12() << 12)
    }

    #[inline]
    #[must_use]
    pub const fn frame(&self) -> PhysicalFrame {
        PhysicalFrame::containing(self.physical_address())
    }

    /// Flag bits only (address field cleared).
    #[inline]
    #[must_use]
    pub const fn flags_only(self) -> Self {
        self.with_phys_addr_bits_51_12(0)
    }

    /// Non-leaf link to a next-level table.
    ///
    /// Intermediate entries are always writable; `user` is required on every
    /// level above a user leaf.
    #[inline]
    #[must_use]
    pub const fn table_link(table: PhysicalFrame, user: bool) -> Self {
        Self::new()
            .with_present(true)
            .with_writable(true)
            .with_user_access(user)
            .with_physical_address(table.base())
    }

    /// Kernel read/write data, global.
    #[inline]
    #[must_use]
    pub const fn kernel_rw() -> Self {
        Self::new()
            .with_present(true)
            .with_writable(true)
            .with_global_translation(true)
            .with_no_execute(true)
    }

    /// Kernel text, global.
    #[inline]
    #[must_use]
    pub const fn kernel_rx() -> Self {
        Self::new()
            .with_present(true)
            .with_global_translation(true)
    }

    /// User read/write data (heap, stack).
    #[inline]
    #[must_use]
    pub const fn user_rw() -> Self {
        Self::new()
            .with_present(true)
            .with_writable(true)
            .with_user_access(true)
            .with_no_execute(true)
    }

    /// User text.
    #[inline]
    #[must_use]
    pub const fn user_rx() -> Self {
        Self::new()
            .with_present(true)
            .with_user_access(true)
    }

    /// User read-only data.
    #[inline]
    #[must_use]
    pub const fn user_ro_nx() -> Self {
        Self::new()
            .with_present(true)
            .with_user_access(true)
            .with_no_execute(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owned_bit_is_bit_nine() {
        let e = PageEntryBits::new().with_owned(true);
        assert_eq!(e.into_bits(), 1 << 9);
    }

    #[test]
    fn address_roundtrips_without_touching_flags() {
        let e = PageEntryBits::user_rw().with_physical_address(PhysicalAddress::new(0x7654_3000));
        assert_eq!(e.physical_address().as_u64(), 0x7654_3000);
        assert!(e.present() && e.writable() && e.user_access() && e.no_execute());
        assert_eq!(e.flags_only(), PageEntryBits::user_rw());
    }

    #[test]
    fn table_link_sets_user_on_request() {
        let f = PhysicalFrame::from_index(9);
        let k = PageEntryBits::table_link(f, false);
        let u = PageEntryBits::table_link(f, true);
        assert!(!k.user_access());
        assert!(u.user_access());
        assert_eq!(u.frame(), f);
    }
}

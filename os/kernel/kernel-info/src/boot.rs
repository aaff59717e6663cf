//! # Kernel Boot Information

use kernel_memory_addresses::PhysicalAddress;

/// Kind of a physical memory region as reported by the bootloader.
///
/// The discriminants follow the E820/multiboot numbering, so a raw
/// type value of `1` is usable RAM.
#[repr(u32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MemoryRegionKind {
    /// Free RAM the kernel may hand out.
    Available = 1,
    /// Firmware or device reserved.
    Reserved = 2,
    /// ACPI tables; reclaimable once parsed.
    AcpiReclaimable = 3,
    /// ACPI non-volatile storage.
    AcpiNvs = 4,
    /// Defective RAM.
    BadMemory = 5,
}

impl MemoryRegionKind {
    /// Decode a raw region type. Unknown values are treated as reserved.
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        match raw {
            1 => Self::Available,
            3 => Self::AcpiReclaimable,
            4 => Self::AcpiNvs,
            5 => Self::BadMemory,
            _ => Self::Reserved,
        }
    }
}

/// One entry of the boot memory map.
/// Keep this `#[repr(C)]`; it is produced by the bootloader.
#[repr(C)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MemoryRegion {
    /// Physical start of the region in bytes.
    pub base: u64,
    /// Length of the region in **bytes**.
    pub length: u64,
    /// Region type.
    pub kind: MemoryRegionKind,
}

impl MemoryRegion {
    #[must_use]
    pub const fn available(base: u64, length: u64) -> Self {
        Self {
            base,
            length,
            kind: MemoryRegionKind::Available,
        }
    }

    #[must_use]
    pub const fn reserved(base: u64, length: u64) -> Self {
        Self {
            base,
            length,
            kind: MemoryRegionKind::Reserved,
        }
    }

    #[must_use]
    pub const fn start(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.base)
    }

    /// Exclusive end address, saturating at the top of the address space.
    #[must_use]
    pub const fn end(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.base.saturating_add(self.length))
    }

    #[must_use]
    pub const fn is_usable(&self) -> bool {
        matches!(self.kind, MemoryRegionKind::Available)
    }
}

//! # HHDM-based PhysMapper
//!
//! With a higher-half direct map (HHDM) every physical address is reachable
//! at `HHDM_BASE + pa`. The kernel uses this mapper for page tables, buddy
//! free-list links, slab headers and `kmalloc` pointers.
//!
//! ## Example
//! ```rust
//! use kernel_alloc::phys_mapper::HhdmPhysMapper;
//! use kernel_memory_addresses::PhysicalAddress;
//! use kernel_vmem::PhysMapper;
//!
//! let pa = PhysicalAddress::new(0x1234_0000);
//! let va = HhdmPhysMapper.phys_to_virt(pa);
//! assert_eq!(HhdmPhysMapper.virt_to_phys(va), pa);
//! ```

use kernel_info::memory::HHDM_BASE;
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
use kernel_vmem::PhysMapper;

/// [`PhysMapper`] for kernels with a higher-half direct map.
///
/// # Safety
/// Dereferencing the returned addresses requires the HHDM to be present and
/// to cover the referenced physical range.
#[derive(Debug, Copy, Clone, Default)]
pub struct HhdmPhysMapper;

impl PhysMapper for HhdmPhysMapper {
    #[inline]
    fn phys_to_virt(&self, pa: PhysicalAddress) -> VirtualAddress {
        VirtualAddress::new(HHDM_BASE + pa.as_u64())
    }

    #[inline]
    fn virt_to_phys(&self, va: VirtualAddress) -> PhysicalAddress {
        debug_assert!(va.as_u64() >= HHDM_BASE, "{va} is not in the direct map");
        PhysicalAddress::new(va.as_u64() - HHDM_BASE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_by_hhdm_base() {
        let va = HhdmPhysMapper.phys_to_virt(PhysicalAddress::new(0x5000));
        assert_eq!(va.as_u64(), HHDM_BASE + 0x5000);
        assert_eq!(HhdmPhysMapper.virt_to_phys(va).as_u64(), 0x5000);
    }
}

//! # Kernel Heap (`kmalloc` family)
//!
//! Small requests go to the nearest-fit slab size class, 32 to 2048 bytes.
//! Anything larger is served directly by the buddy allocator. Such a block
//! starts with a 16-byte [`LargeHeader`] recording its order, so `kfree` needs
//! no size argument.
//!
//! Returned pointers are kernel-virtual (through the [`PhysMapper`]) and at
//! least 16-byte aligned.

use crate::buddy::{BuddyAllocator, BuddyError, block_bytes, order_for};
use crate::slab::{CacheId, SlabAllocator, SlabError};
use core::ptr::NonNull;
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
use kernel_vmem::PhysMapper;
use log::{trace, warn};

/// Object sizes of the general purpose caches.
pub const SIZE_CLASSES: [usize; 7] = [32, 64, 128, 256, 512, 1024, 2048];

const CLASS_NAMES: [&str; SIZE_CLASSES.len()] = [
    "kmalloc-32",
    "kmalloc-64",
    "kmalloc-128",
    "kmalloc-256",
    "kmalloc-512",
    "kmalloc-1024",
    "kmalloc-2048",
];

const LARGE_MAGIC: u64 = 0x4B4D_414C_4C4F_4321;

/// Prefix of a large (buddy-backed) allocation.
#[repr(C, align(16))]
struct LargeHeader {
    magic: u64,
    order: u64,
}

const LARGE_HEADER_SIZE: u64 = size_of::<LargeHeader>() as u64;
const _: () = assert!(LARGE_HEADER_SIZE == 16);

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum HeapError {
    #[error("zero-sized allocation")]
    ZeroSize,
    #[error("allocation size overflows")]
    Overflow,
    #[error("out of memory")]
    OutOfMemory,
    #[error("{0} was not returned by kmalloc")]
    UnknownPointer(VirtualAddress),
    #[error(transparent)]
    Slab(#[from] SlabError),
    #[error(transparent)]
    Buddy(#[from] BuddyError),
}

/// Objects per slab for a size class: at least one page or eight objects.
const fn per_slab(size: usize) -> usize {
    let bytes = if 8 * size > 4096 { 8 * size } else { 4096 };
    let n = (bytes - 64) / size;
    if n > 256 { 256 } else { n }
}

/// Buddy and slab allocators plus the size-class caches on top of them.
pub struct KernelHeap<'m, M: PhysMapper> {
    mapper: &'m M,
    buddy: BuddyAllocator<'m, M>,
    slab: SlabAllocator<'m, M>,
    classes: [CacheId; SIZE_CLASSES.len()],
}

impl<'m, M: PhysMapper> KernelHeap<'m, M> {
    /// Create the size-class caches in `slab`.
    ///
    /// # Errors
    /// Fails if `slab` has no room for the seven caches.
    pub fn new(
        buddy: BuddyAllocator<'m, M>,
        mut slab: SlabAllocator<'m, M>,
    ) -> Result<Self, SlabError> {
        let first = slab.create_cache(CLASS_NAMES[0], SIZE_CLASSES[0], per_slab(SIZE_CLASSES[0]))?;
        let mut classes = [first; SIZE_CLASSES.len()];
        for i in 1..SIZE_CLASSES.len() {
            classes[i] = slab.create_cache(CLASS_NAMES[i], SIZE_CLASSES[i], per_slab(SIZE_CLASSES[i]))?;
        }
        Ok(Self {
            mapper: buddy.mapper(),
            buddy,
            slab,
            classes,
        })
    }

    #[must_use]
    pub const fn buddy(&self) -> &BuddyAllocator<'m, M> {
        &self.buddy
    }

    pub const fn buddy_mut(&mut self) -> &mut BuddyAllocator<'m, M> {
        &mut self.buddy
    }

    #[must_use]
    pub const fn slab(&self) -> &SlabAllocator<'m, M> {
        &self.slab
    }

    pub const fn slab_mut(&mut self) -> &mut SlabAllocator<'m, M> {
        &mut self.slab
    }

    /// Allocate one object from `cache`.
    ///
    /// # Errors
    /// See [`SlabAllocator::alloc`].
    pub fn alloc_object(&mut self, cache: CacheId) -> Result<PhysicalAddress, SlabError> {
        self.slab.alloc(&mut self.buddy, cache)
    }

    /// Return an object to `cache`.
    ///
    /// # Errors
    /// See [`SlabAllocator::free`].
    pub fn free_object(&mut self, cache: CacheId, pa: PhysicalAddress) -> Result<(), SlabError> {
        self.slab.free(cache, pa)
    }

    /// Release empty slabs of every size class.
    pub fn shrink(&mut self) -> usize {
        self.classes
            .iter()
            .map(|&c| self.slab.shrink(&mut self.buddy, c).unwrap_or(0))
            .sum()
    }

    fn class_for(&self, size: usize) -> Option<CacheId> {
        SIZE_CLASSES
            .iter()
            .position(|&s| s >= size)
            .map(|i| self.classes[i])
    }

    fn to_ptr(&self, pa: PhysicalAddress) -> Result<NonNull<u8>, HeapError> {
        NonNull::new(self.mapper.phys_to_virt(pa).as_mut_ptr::<u8>()).ok_or(HeapError::OutOfMemory)
    }

    /// Allocate `size` bytes. Contents are unspecified.
    ///
    /// # Errors
    /// [`HeapError::ZeroSize`] for `size == 0`, [`HeapError::OutOfMemory`]
    /// when neither the slab class nor the buddy allocator can serve it.
    pub fn kmalloc(&mut self, size: usize) -> Result<NonNull<u8>, HeapError> {
        if size == 0 {
            return Err(HeapError::ZeroSize);
        }

        if let Some(cache) = self.class_for(size) {
            let pa = self
                .slab
                .alloc(&mut self.buddy, cache)
                .map_err(|_| HeapError::OutOfMemory)?;
            return self.to_ptr(pa);
        }

        let total = (size as u64)
            .checked_add(LARGE_HEADER_SIZE)
            .ok_or(HeapError::Overflow)?;
        let order = order_for(total).ok_or(HeapError::OutOfMemory)?;
        let block = self
            .buddy
            .alloc(order)
            .map_err(|_| HeapError::OutOfMemory)?;

        let header = unsafe { self.mapper.phys_to_mut::<LargeHeader>(block) };
        header.magic = LARGE_MAGIC;
        header.order = order as u64;
        trace!("kmalloc({size}) served by order {order} block {block}");

        self.to_ptr(block + LARGE_HEADER_SIZE)
    }

    /// Locate the owner of `ptr`: a size class, or the header of a large block.
    #[allow(clippy::cast_possible_truncation)]
    fn classify(&self, ptr: NonNull<u8>) -> Result<Allocation, HeapError> {
        let va = VirtualAddress::from_nonnull(ptr);
        let pa = self.mapper.virt_to_phys(va);

        if let Some(&cache) = self.classes.iter().find(|&&c| self.slab.owns(c, pa)) {
            return Ok(Allocation::Small(cache, pa));
        }

        if let Some(base) = pa.as_u64().checked_sub(LARGE_HEADER_SIZE) {
            let base = PhysicalAddress::new(base);
            if base.is_frame_aligned() && self.buddy.manages(base) && !self.buddy.is_free(base) {
                let header = unsafe { self.mapper.phys_to_mut::<LargeHeader>(base) };
                if header.magic == LARGE_MAGIC {
                    return Ok(Allocation::Large(base, header.order as usize));
                }
            }
        }

        Err(HeapError::UnknownPointer(va))
    }

    /// Free memory returned by [`kmalloc`](Self::kmalloc) and friends.
    ///
    /// # Errors
    /// Unknown pointers and double frees are rejected.
    pub fn kfree(&mut self, ptr: NonNull<u8>) -> Result<(), HeapError> {
        match self.classify(ptr)? {
            Allocation::Small(cache, pa) => self.slab.free(cache, pa)?,
            Allocation::Large(base, order) => {
                let header = unsafe { self.mapper.phys_to_mut::<LargeHeader>(base) };
                header.magic = 0;
                self.buddy.free(base, order)?;
            }
        }
        Ok(())
    }

    /// Allocate zeroed memory for `n` elements of `size` bytes.
    ///
    /// # Errors
    /// [`HeapError::Overflow`] if `n * size` overflows; otherwise as
    /// [`kmalloc`](Self::kmalloc).
    pub fn kcalloc(&mut self, n: usize, size: usize) -> Result<NonNull<u8>, HeapError> {
        let bytes = n.checked_mul(size).ok_or(HeapError::Overflow)?;
        let ptr = self.kmalloc(bytes)?;
        unsafe { core::ptr::write_bytes(ptr.as_ptr(), 0, bytes) };
        Ok(ptr)
    }

    /// Resize an allocation.
    ///
    /// - `None` behaves like [`kmalloc`](Self::kmalloc).
    /// - `size == 0` frees `ptr` and yields `None`.
    /// - Growing within the usable size keeps the pointer; otherwise the
    ///   contents are moved to a new allocation and the old one is freed.
    ///
    /// # Errors
    /// On failure the original allocation is left untouched.
    pub fn krealloc(
        &mut self,
        ptr: Option<NonNull<u8>>,
        size: usize,
    ) -> Result<Option<NonNull<u8>>, HeapError> {
        let Some(old) = ptr else {
            return self.kmalloc(size).map(Some);
        };
        if size == 0 {
            self.kfree(old)?;
            return Ok(None);
        }

        let usable = self.usable_size(old)?;
        if size <= usable {
            return Ok(Some(old));
        }

        let new = self.kmalloc(size)?;
        unsafe { core::ptr::copy_nonoverlapping(old.as_ptr(), new.as_ptr(), usable) };
        if let Err(e) = self.kfree(old) {
            warn!("krealloc: releasing old block failed: {e}");
        }
        Ok(Some(new))
    }

    /// Number of bytes usable behind `ptr`.
    ///
    /// # Errors
    /// [`HeapError::UnknownPointer`] for pointers not from this heap.
    pub fn usable_size(&self, ptr: NonNull<u8>) -> Result<usize, HeapError> {
        match self.classify(ptr)? {
            Allocation::Small(cache, _) => Ok(self.slab.object_size(cache)?),
            #[allow(clippy::cast_possible_truncation)]
            Allocation::Large(_, order) => Ok((block_bytes(order) - LARGE_HEADER_SIZE) as usize),
        }
    }
}

enum Allocation {
    Small(CacheId, PhysicalAddress),
    Large(PhysicalAddress, usize),
}

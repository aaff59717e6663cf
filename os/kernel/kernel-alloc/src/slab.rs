//! # Slab Allocator
//!
//! Fixed-size object caches on top of the [`BuddyAllocator`].
//!
//! Every slab is one buddy block. It starts with a 64-byte [`SlabHeader`]
//! followed by the object array:
//!
//! ```text
//! ┌──────────────┬──────────┬──────────┬─────┬────────────────┐
//! │ SlabHeader   │ object 0 │ object 1 │ ... │ object n-1     │
//! │ (64 bytes)   │          │          │     │ (n = per slab) │
//! └──────────────┴──────────┴──────────┴─────┴────────────────┘
//! ```
//!
//! The header carries a magic value, the owning cache, the live-object count,
//! the physical address of the next slab of the same cache, and an occupancy
//! bitmap. A bit is set exactly between an object's `alloc` and its `free`.
//! Slabs of a cache form an unordered singly linked list.

use crate::buddy::{BuddyAllocator, block_bytes, order_for};
use kernel_memory_addresses::PhysicalAddress;
use kernel_vmem::PhysMapper;
use log::{debug, trace, warn};

/// Upper bound on the number of caches.
pub const MAX_SLAB_CACHES: usize = 64;

/// Upper bound on objects per slab (size of the occupancy bitmap).
pub const MAX_OBJECTS_PER_SLAB: usize = 256;

/// Offset of the first object within a slab.
pub const SLAB_HEADER_SIZE: u64 = 64;

const SLAB_MAGIC: u32 = 0x5_1AB5;
const NIL: u64 = u64::MAX;

#[repr(C)]
struct SlabHeader {
    magic: u32,
    cache: u16,
    in_use: u16,
    next: u64,
    bitmap: [u64; MAX_OBJECTS_PER_SLAB / 64],
    _reserved: [u8; 16],
}

const _: () = assert!(size_of::<SlabHeader>() as u64 == SLAB_HEADER_SIZE);

impl SlabHeader {
    fn first_free(&self, per_slab: usize) -> Option<usize> {
        self.bitmap
            .iter()
            .enumerate()
            .find(|(_, w)| **w != u64::MAX)
            .map(|(i, w)| i * 64 + w.trailing_ones() as usize)
            .filter(|&slot| slot < per_slab)
    }

    const fn is_set(&self, slot: usize) -> bool {
        self.bitmap[slot / 64] & (1 << (slot % 64)) != 0
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum SlabError {
    #[error("all {0} slab caches are in use")]
    TooManyCaches(usize),
    #[error("invalid cache geometry: {size} bytes x {per_slab}")]
    InvalidGeometry { size: usize, per_slab: usize },
    #[error("unknown slab cache {0:?}")]
    UnknownCache(CacheId),
    #[error("out of memory for a new slab")]
    OutOfMemory,
    #[error("{0} does not belong to this cache")]
    NotOwned(PhysicalAddress),
    #[error("{0} is not the start of an object")]
    Misaligned(PhysicalAddress),
    #[error("object {0} is already free")]
    DoubleFree(PhysicalAddress),
}

/// Handle to a cache created by [`SlabAllocator::create_cache`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct CacheId(u16);

#[derive(Debug, Copy, Clone)]
struct SlabCache {
    name: &'static str,
    object_size: usize,
    objects_per_slab: usize,
    slab_order: usize,
    slabs: u64,
    slab_count: usize,
    live: usize,
}

/// Occupancy of one cache.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct SlabStats {
    pub slabs: usize,
    pub live_objects: usize,
    pub capacity: usize,
}

pub struct SlabAllocator<'m, M: PhysMapper> {
    mapper: &'m M,
    caches: [Option<SlabCache>; MAX_SLAB_CACHES],
}

impl<'m, M: PhysMapper> SlabAllocator<'m, M> {
    #[must_use]
    pub const fn new(mapper: &'m M) -> Self {
        Self {
            mapper,
            caches: [None; MAX_SLAB_CACHES],
        }
    }

    #[inline]
    fn header(&self, slab: u64) -> &'m mut SlabHeader {
        unsafe { self.mapper.phys_to_mut::<SlabHeader>(PhysicalAddress::new(slab)) }
    }

    fn cache(&self, id: CacheId) -> Result<&SlabCache, SlabError> {
        self.caches
            .get(usize::from(id.0))
            .and_then(Option::as_ref)
            .ok_or(SlabError::UnknownCache(id))
    }

    fn cache_mut(&mut self, id: CacheId) -> Result<&mut SlabCache, SlabError> {
        self.caches
            .get_mut(usize::from(id.0))
            .and_then(Option::as_mut)
            .ok_or(SlabError::UnknownCache(id))
    }

    /// Register a cache of `objects_per_slab` objects of `object_size` bytes.
    ///
    /// Object sizes are rounded up to 8 bytes.
    ///
    /// # Errors
    /// Zero sizes, more than [`MAX_OBJECTS_PER_SLAB`] objects, or no free
    /// cache slot.
    #[allow(clippy::cast_possible_truncation)]
    pub fn create_cache(
        &mut self,
        name: &'static str,
        object_size: usize,
        objects_per_slab: usize,
    ) -> Result<CacheId, SlabError> {
        let size = object_size.next_multiple_of(8);
        let geometry = SlabError::InvalidGeometry {
            size: object_size,
            per_slab: objects_per_slab,
        };
        if size == 0 || objects_per_slab == 0 || objects_per_slab > MAX_OBJECTS_PER_SLAB {
            return Err(geometry);
        }
        let slab_order =
            order_for(SLAB_HEADER_SIZE + (size * objects_per_slab) as u64).ok_or(geometry)?;

        let (index, slot) = self
            .caches
            .iter_mut()
            .enumerate()
            .find(|(_, c)| c.is_none())
            .ok_or(SlabError::TooManyCaches(MAX_SLAB_CACHES))?;

        *slot = Some(SlabCache {
            name,
            object_size: size,
            objects_per_slab,
            slab_order,
            slabs: NIL,
            slab_count: 0,
            live: 0,
        });

        debug!("slab cache {name}: {size} bytes x {objects_per_slab}, order {slab_order}");
        Ok(CacheId(index as u16))
    }

    /// Look up a cache by name.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn find_cache(&self, name: &str) -> Option<CacheId> {
        self.caches
            .iter()
            .position(|c| c.is_some_and(|c| c.name == name))
            .map(|i| CacheId(i as u16))
    }

    /// Object size of `cache` in bytes.
    ///
    /// # Errors
    /// Unknown cache.
    pub fn object_size(&self, cache: CacheId) -> Result<usize, SlabError> {
        self.cache(cache).map(|c| c.object_size)
    }

    /// Allocate one object. Contents are unspecified.
    ///
    /// # Errors
    /// [`SlabError::OutOfMemory`] when every slab is full and the buddy
    /// allocator cannot supply a new one.
    pub fn alloc(
        &mut self,
        buddy: &mut BuddyAllocator<'m, M>,
        cache: CacheId,
    ) -> Result<PhysicalAddress, SlabError> {
        let c = *self.cache(cache)?;

        let mut slab = c.slabs;
        while slab != NIL {
            let header = self.header(slab);
            if let Some(slot) = header.first_free(c.objects_per_slab) {
                self.cache_mut(cache)?.live += 1;
                return Ok(self.take(slab, slot, c.object_size));
            }
            slab = header.next;
        }

        // every slab is full
        let block = buddy
            .alloc(c.slab_order)
            .map_err(|_| SlabError::OutOfMemory)?
            .as_u64();
        *self.header(block) = SlabHeader {
            magic: SLAB_MAGIC,
            cache: cache.0,
            in_use: 0,
            next: c.slabs,
            bitmap: [0; MAX_OBJECTS_PER_SLAB / 64],
            _reserved: [0; 16],
        };
        let entry = self.cache_mut(cache)?;
        entry.slabs = block;
        entry.slab_count += 1;
        entry.live += 1;
        trace!("new slab {block:#x} for cache {}", c.name);

        Ok(self.take(block, 0, c.object_size))
    }

    /// Mark `slot` of `slab` as occupied and return the object address.
    fn take(&self, slab: u64, slot: usize, size: usize) -> PhysicalAddress {
        let header = self.header(slab);
        header.bitmap[slot / 64] |= 1 << (slot % 64);
        header.in_use += 1;
        PhysicalAddress::new(slab + SLAB_HEADER_SIZE + (slot * size) as u64)
    }

    /// Find the slab of `cache` whose object array contains `pa`.
    fn slab_of(&self, c: &SlabCache, pa: PhysicalAddress) -> Option<u64> {
        let span = (c.object_size * c.objects_per_slab) as u64;
        let mut slab = c.slabs;
        while slab != NIL {
            let first = slab + SLAB_HEADER_SIZE;
            if (first..first + span).contains(&pa.as_u64()) {
                return Some(slab);
            }
            slab = self.header(slab).next;
        }
        None
    }

    /// Whether `pa` falls into an object array of `cache`.
    #[must_use]
    pub fn owns(&self, cache: CacheId, pa: PhysicalAddress) -> bool {
        self.cache(cache)
            .is_ok_and(|c| self.slab_of(c, pa).is_some())
    }

    /// Return an object to `cache`.
    ///
    /// # Errors
    /// Foreign pointers, pointers into the middle of an object and double
    /// frees are rejected without side effects.
    pub fn free(&mut self, cache: CacheId, pa: PhysicalAddress) -> Result<(), SlabError> {
        let c = *self.cache(cache)?;
        let slab = self.slab_of(&c, pa).ok_or(SlabError::NotOwned(pa))?;

        let offset = pa.as_u64() - slab - SLAB_HEADER_SIZE;
        if offset % c.object_size as u64 != 0 {
            return Err(SlabError::Misaligned(pa));
        }
        #[allow(clippy::cast_possible_truncation)]
        let slot = (offset / c.object_size as u64) as usize;

        let header = self.header(slab);
        debug_assert_eq!(header.magic, SLAB_MAGIC);
        debug_assert_eq!(header.cache, cache.0);
        if !header.is_set(slot) {
            warn!("rejected double free of {pa} in cache {}", c.name);
            return Err(SlabError::DoubleFree(pa));
        }
        header.bitmap[slot / 64] &= !(1 << (slot % 64));
        header.in_use -= 1;
        self.cache_mut(cache)?.live -= 1;
        Ok(())
    }

    /// Give completely empty slabs of `cache` back to the buddy allocator.
    /// Returns the number of slabs released.
    ///
    /// # Errors
    /// Unknown cache.
    pub fn shrink(
        &mut self,
        buddy: &mut BuddyAllocator<'m, M>,
        cache: CacheId,
    ) -> Result<usize, SlabError> {
        let c = *self.cache(cache)?;
        let mut released = 0usize;
        let mut prev = NIL;
        let mut slab = c.slabs;
        let mut head = c.slabs;

        while slab != NIL {
            let header = self.header(slab);
            let next = header.next;
            if header.in_use == 0 {
                if prev == NIL {
                    head = next;
                } else {
                    self.header(prev).next = next;
                }
                header.magic = 0;
                if let Err(e) = buddy.free(PhysicalAddress::new(slab), c.slab_order) {
                    warn!("shrink {}: {e}", c.name);
                }
                released += 1;
            } else {
                prev = slab;
            }
            slab = next;
        }

        let entry = self.cache_mut(cache)?;
        entry.slabs = head;
        entry.slab_count -= released;
        if released > 0 {
            debug!("cache {} released {released} empty slabs", c.name);
        }
        Ok(released)
    }

    /// Occupancy of `cache`.
    ///
    /// # Errors
    /// Unknown cache.
    pub fn stats(&self, cache: CacheId) -> Result<SlabStats, SlabError> {
        self.cache(cache).map(|c| SlabStats {
            slabs: c.slab_count,
            live_objects: c.live,
            capacity: c.slab_count * c.objects_per_slab,
        })
    }

    /// Bytes spanned by one slab of `cache`.
    ///
    /// # Errors
    /// Unknown cache.
    pub fn slab_bytes(&self, cache: CacheId) -> Result<u64, SlabError> {
        self.cache(cache).map(|c| block_bytes(c.slab_order))
    }
}

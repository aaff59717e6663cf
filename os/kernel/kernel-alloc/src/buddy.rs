//! # Buddy Allocator
//!
//! Power-of-two block allocator over physical regions carved out of the frame
//! bitmap. A block of order `o` spans `2^o` frames and is naturally aligned to
//! its own size, so its buddy is found by flipping bit `o + 12` of the address.
//!
//! Free lists are doubly linked and stored **in band**: the first bytes of a
//! free block hold a [`FreeHeader`] with the neighbours in the list of the
//! same order ([`NIL`] terminates) and a tag naming that order. A block is
//! taken as free only if its tag matches and its neighbours link back to it,
//! so whether a block is free, and unlinking it, cost the same no matter how
//! many blocks are free. The blocks are reached through a [`PhysMapper`].
//!
//! ```text
//! order 5: [................................]      alloc(3)
//! order 4: [................][..............]  ->  lower half split again,
//! order 3: [xxxxxxxx][......]                      upper halves stay free
//! ```

use kernel_memory_addresses::{FRAME_SIZE, PhysicalAddress};
use kernel_vmem::PhysMapper;
use log::{trace, warn};

/// Number of orders; blocks go from 4 KiB (order 0) to 2 GiB (order 19).
pub const MAX_BUDDY_ORDER: usize = 20;

/// Maximum number of disjoint regions the allocator manages.
pub const MAX_BUDDY_REGIONS: usize = 8;

/// End-of-list marker in the in-band links.
const NIL: u64 = u64::MAX;

/// High bits of [`FreeHeader::tag`]; the low byte is the order.
const FREE_TAG: u64 = 0xB0DD_1E5F_4EE0_0000;

/// In-band header of a free block.
#[derive(Copy, Clone)]
#[repr(C)]
struct FreeHeader {
    next: u64,
    prev: u64,
    tag: u64,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum BuddyError {
    #[error("no free block of order {0}")]
    OutOfMemory(usize),
    #[error("order {0} exceeds the largest block")]
    InvalidOrder(usize),
    #[error("{0} is not aligned for order {1}")]
    Misaligned(PhysicalAddress, usize),
    #[error("{0} lies outside every buddy region")]
    OutOfRange(PhysicalAddress),
    #[error("block {0} of order {1} is already free")]
    DoubleFree(PhysicalAddress, usize),
    #[error("too many buddy regions")]
    TooManyRegions,
    #[error("region at {0} overlaps a managed region")]
    OverlappingRegion(PhysicalAddress),
}

/// Bytes covered by a block of `order`.
#[inline]
#[must_use]
pub const fn block_bytes(order: usize) -> u64 {
    FRAME_SIZE << order
}

/// Smallest order whose block holds `bytes`.
#[must_use]
pub const fn order_for(bytes: u64) -> Option<usize> {
    let mut order = 0;
    while order < MAX_BUDDY_ORDER {
        if block_bytes(order) >= bytes {
            return Some(order);
        }
        order += 1;
    }
    None
}

#[derive(Copy, Clone)]
struct Region {
    start: u64,
    end: u64,
}

pub struct BuddyAllocator<'m, M: PhysMapper> {
    mapper: &'m M,
    heads: [u64; MAX_BUDDY_ORDER],
    counts: [usize; MAX_BUDDY_ORDER],
    regions: [Option<Region>; MAX_BUDDY_REGIONS],
}

impl<'m, M: PhysMapper> BuddyAllocator<'m, M> {
    #[must_use]
    pub const fn new(mapper: &'m M) -> Self {
        Self {
            mapper,
            heads: [NIL; MAX_BUDDY_ORDER],
            counts: [0; MAX_BUDDY_ORDER],
            regions: [None; MAX_BUDDY_REGIONS],
        }
    }

    #[inline]
    fn header(&self, block: u64) -> &'m mut FreeHeader {
        // Free blocks are owned by the allocator and frame aligned.
        unsafe { self.mapper.phys_to_mut::<FreeHeader>(PhysicalAddress::new(block)) }
    }

    fn push(&mut self, block: u64, order: usize) {
        let head = self.heads[order];
        *self.header(block) = FreeHeader {
            next: head,
            prev: NIL,
            tag: FREE_TAG | order as u64,
        };
        if head != NIL {
            self.header(head).prev = block;
        }
        self.heads[order] = block;
        self.counts[order] += 1;
    }

    fn pop(&mut self, order: usize) -> Option<u64> {
        let block = self.heads[order];
        if block == NIL {
            return None;
        }
        self.unlink(block, order);
        Some(block)
    }

    fn unlink(&mut self, block: u64, order: usize) {
        let FreeHeader { next, prev, .. } = *self.header(block);
        if prev == NIL {
            self.heads[order] = next;
        } else {
            self.header(prev).next = next;
        }
        if next != NIL {
            self.header(next).prev = prev;
        }
        self.header(block).tag = 0;
        self.counts[order] -= 1;
    }

    /// Whether `block` heads a free block of exactly `order`.
    ///
    /// The header of an allocated block holds arbitrary data, so the tag alone
    /// is not trusted: the list neighbour must point back at `block`.
    fn is_free_block(&self, block: u64, order: usize) -> bool {
        if !self.holds_block(block, order) {
            return false;
        }
        let FreeHeader { next, prev, tag } = *self.header(block);
        if tag != FREE_TAG | order as u64 {
            return false;
        }
        let linked_prev = if prev == NIL {
            self.heads[order] == block
        } else {
            self.links_to(prev, order, block, |h| h.next)
        };
        linked_prev && (next == NIL || self.links_to(next, order, block, |h| h.prev))
    }

    fn links_to(
        &self,
        from: u64,
        order: usize,
        block: u64,
        link: impl Fn(&FreeHeader) -> u64,
    ) -> bool {
        self.holds_block(from, order) && link(self.header(from)) == block
    }

    /// `block` is aligned to `order` and lies wholly inside a region.
    fn holds_block(&self, block: u64, order: usize) -> bool {
        let size = block_bytes(order);
        block % size == 0
            && block
                .checked_add(size)
                .is_some_and(|end| self.in_region(block, end))
    }

    /// Remove `block` from the list of `order`. Returns `false` if absent.
    fn remove(&mut self, block: u64, order: usize) -> bool {
        if !self.is_free_block(block, order) {
            return false;
        }
        self.unlink(block, order);
        true
    }

    fn in_region(&self, start: u64, end: u64) -> bool {
        self.regions
            .iter()
            .flatten()
            .any(|r| start >= r.start && end <= r.end)
    }

    /// Hand `frames` frames starting at `base` to the allocator.
    ///
    /// The range is cut into the largest naturally aligned blocks that fit.
    ///
    /// # Errors
    /// `base` must be frame aligned, the range must not overlap a region
    /// added before, and at most [`MAX_BUDDY_REGIONS`] regions can be added.
    pub fn add_region(&mut self, base: PhysicalAddress, frames: usize) -> Result<(), BuddyError> {
        if !base.is_frame_aligned() {
            return Err(BuddyError::Misaligned(base, 0));
        }
        let start = base.as_u64();
        let end = start + frames as u64 * FRAME_SIZE;
        if self
            .regions
            .iter()
            .flatten()
            .any(|r| start < r.end && r.start < end)
        {
            return Err(BuddyError::OverlappingRegion(base));
        }
        let slot = self
            .regions
            .iter_mut()
            .find(|r| r.is_none())
            .ok_or(BuddyError::TooManyRegions)?;
        *slot = Some(Region { start, end });

        let mut cur = start;
        while cur < end {
            let mut order = MAX_BUDDY_ORDER - 1;
            while order > 0 && (cur + block_bytes(order) > end || cur % block_bytes(order) != 0) {
                order -= 1;
            }
            self.push(cur, order);
            cur += block_bytes(order);
        }

        trace!("buddy region {base} with {frames} frames added");
        Ok(())
    }

    /// Allocate a block of `2^order` frames.
    ///
    /// # Errors
    /// [`BuddyError::OutOfMemory`] when no list at or above `order` has a block.
    pub fn alloc(&mut self, order: usize) -> Result<PhysicalAddress, BuddyError> {
        if order >= MAX_BUDDY_ORDER {
            return Err(BuddyError::InvalidOrder(order));
        }

        let (found, block) = (order..MAX_BUDDY_ORDER)
            .find_map(|o| self.pop(o).map(|b| (o, b)))
            .ok_or(BuddyError::OutOfMemory(order))?;

        for o in (order..found).rev() {
            self.push(block + block_bytes(o), o);
            trace!("split order {} block at {block:#x}", o + 1);
        }

        Ok(PhysicalAddress::new(block))
    }

    /// Return a block obtained from [`alloc`](Self::alloc) with the same order.
    ///
    /// Coalesces with free buddies as far up as possible; the merged block
    /// takes the lower address.
    ///
    /// # Errors
    /// Rejects foreign, misaligned or already free blocks without changing
    /// any list.
    pub fn free(&mut self, addr: PhysicalAddress, order: usize) -> Result<(), BuddyError> {
        if order >= MAX_BUDDY_ORDER {
            return Err(BuddyError::InvalidOrder(order));
        }
        let start = addr.as_u64();
        if start % block_bytes(order) != 0 {
            return Err(BuddyError::Misaligned(addr, order));
        }
        if !self.holds_block(start, order) {
            return Err(BuddyError::OutOfRange(addr));
        }
        let end = start + block_bytes(order);
        if self.overlaps_free(start, end, order) {
            warn!("rejected double free of buddy block {addr} (order {order})");
            return Err(BuddyError::DoubleFree(addr, order));
        }

        let mut block = start;
        let mut order = order;
        while order < MAX_BUDDY_ORDER - 1 {
            let buddy = block ^ block_bytes(order);
            if !self.remove(buddy, order) {
                break;
            }
            trace!("merged order {order} buddies at {:#x}", block.min(buddy));
            block = block.min(buddy);
            order += 1;
        }
        self.push(block, order);
        Ok(())
    }

    /// Whether any part of `start..end` (one block of `order`) is free: it
    /// sits inside a free block of the same or a larger order, or a smaller
    /// free block lies inside it. The work grows with `order`, never with the
    /// length of the free lists.
    fn overlaps_free(&self, start: u64, end: u64, order: usize) -> bool {
        let inside_larger = (order..MAX_BUDDY_ORDER).any(|o| {
            let head = start & !(block_bytes(o) - 1);
            self.is_free_block(head, o)
        });
        inside_larger
            || (0..order).any(|o| {
                (start..end)
                    .step_by(block_bytes(o) as usize)
                    .any(|b| self.is_free_block(b, o))
            })
    }

    /// Number of free blocks of `order`.
    #[must_use]
    pub fn free_count(&self, order: usize) -> usize {
        self.counts.get(order).copied().unwrap_or(0)
    }

    /// Per-order free block counts.
    #[must_use]
    pub const fn free_blocks(&self) -> [usize; MAX_BUDDY_ORDER] {
        self.counts
    }

    /// Total free frames across all orders.
    #[must_use]
    pub fn free_frames(&self) -> usize {
        self.counts
            .iter()
            .enumerate()
            .map(|(o, n)| n << o)
            .sum()
    }

    /// Whether `addr` lies inside any free block.
    #[must_use]
    pub fn is_free(&self, addr: PhysicalAddress) -> bool {
        let frame = addr.as_u64() & !(FRAME_SIZE - 1);
        self.overlaps_free(frame, frame + FRAME_SIZE, 0)
    }

    /// Whether `addr` lies in a managed region.
    #[must_use]
    pub fn manages(&self, addr: PhysicalAddress) -> bool {
        self.in_region(addr.as_u64(), addr.as_u64() + 1)
    }

    #[must_use]
    pub const fn mapper(&self) -> &'m M {
        self.mapper
    }
}

//! # Address Space (x86-64, PML4-rooted)
//!
//! Helpers to build and tear down a **single** virtual address space (tree
//! rooted at a PML4).
//!
//! ## Highlights
//!
//! - [`AddressSpace::create`] allocates a root and aliases the kernel half.
//! - [`AddressSpace::map_page`] installs one 4 KiB mapping, allocating and
//!   zeroing missing intermediate tables on the way down.
//! - [`AddressSpace::map_anonymous`] backs a range with fresh zeroed frames
//!   owned by the space.
//! - [`AddressSpace::copy_user_from`] duplicates a parent's user half (fork).
//! - [`AddressSpace::clear_user`] / [`AddressSpace::destroy`] give every owned
//!   frame and every lower-half table back to the frame allocator.
//!
//! ## Design
//!
//! - Non-leaf entries are always present + writable; `US` is added on every
//!   level above a user leaf.
//! - Only the lower half (PML4 `0..256`) is ever walked for teardown. The
//!   upper half is shared with the kernel root and left untouched.
//! - `unsafe` is confined to viewing a physical frame as a [`PageTable`]
//!   through the [`PhysMapper`].
//!
//! ## Safety
//!
//! Mutating the *active* address space requires TLB maintenance (`invlpg` or a
//! CR3 reload) by the caller.

use crate::page_table::{PageTable, TableIndex, join_indices, split_indices};
use crate::{FrameAlloc, PageEntryBits, PhysMapper, get_table};
use kernel_info::memory::{KERNEL_PML4_START, PAGE_TABLE_ENTRIES};
use kernel_memory_addresses::{FRAME_SIZE, PhysicalAddress, PhysicalFrame, VirtualAddress};
use log::trace;

/// Handle to a single, concrete address space.
pub struct AddressSpace<'m, M: PhysMapper> {
    root: PhysicalFrame, // PML4 frame
    mapper: &'m M,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum MapError {
    #[error("out of memory while mapping")]
    OutOfMemory,
    #[error("virtual address {0} is not page aligned")]
    UnalignedVirtual(VirtualAddress),
    #[error("physical address {0} is not page aligned")]
    UnalignedPhysical(PhysicalAddress),
    #[error("virtual address {0} is already mapped")]
    AlreadyMapped(VirtualAddress),
    #[error("large page in the way of {0}")]
    LargePage(VirtualAddress),
    #[error("range at {0} is outside the user half")]
    NotUserRange(VirtualAddress),
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum UnmapError {
    #[error("virtual address {0} is not mapped")]
    NotMapped(VirtualAddress),
}

impl<'m, M: PhysMapper> AddressSpace<'m, M> {
    /// Wrap an existing root frame.
    #[inline]
    pub const fn from_root(mapper: &'m M, root: PhysicalFrame) -> Self {
        Self { root, mapper }
    }

    /// Allocate a fresh, empty root.
    ///
    /// When `kernel_root` is given, PML4 entries `256..512` are copied from it
    /// so the new space sees the kernel.
    ///
    /// # Errors
    /// [`MapError::OutOfMemory`] if no frame is available for the root.
    pub fn create<A: FrameAlloc>(
        mapper: &'m M,
        alloc: &mut A,
        kernel_root: Option<PhysicalFrame>,
    ) -> Result<Self, MapError> {
        let root = alloc.alloc_4k().ok_or(MapError::OutOfMemory)?;
        let pml4 = unsafe { get_table(mapper, root) };
        pml4.zero();

        if let Some(kernel_root) = kernel_root {
            let kernel = unsafe { get_table(mapper, kernel_root) };
            for i in KERNEL_PML4_START..PAGE_TABLE_ENTRIES {
                pml4.set_entry(i, kernel.entry(i));
            }
        }

        trace!("created address space {root}");
        Ok(Self { root, mapper })
    }

    /// Give every empty kernel-half PML4 slot its own zeroed PDPT.
    ///
    /// Run once on the kernel root before any process space is created:
    /// later kernel mappings then land in tables every process already links
    /// to. Returns the number of PDPTs allocated.
    ///
    /// # Errors
    /// [`MapError::OutOfMemory`]; slots filled before the failure stay.
    pub fn populate_kernel_half<A: FrameAlloc>(&self, alloc: &mut A) -> Result<usize, MapError> {
        let pml4 = self.table(self.root);
        let mut added = 0usize;
        for i in KERNEL_PML4_START..PAGE_TABLE_ENTRIES {
            if pml4.entry(i).present() {
                continue;
            }
            let frame = alloc.alloc_4k().ok_or(MapError::OutOfMemory)?;
            unsafe { self.mapper.zero_frame(frame) };
            pml4.set_entry(i, PageEntryBits::table_link(frame, false));
            added += 1;
        }
        trace!("kernel root {}: {added} PDPTs preallocated", self.root);
        Ok(added)
    }

    /// Physical frame of the PML4.
    #[inline]
    pub const fn root(&self) -> PhysicalFrame {
        self.root
    }

    #[inline]
    pub const fn mapper(&self) -> &'m M {
        self.mapper
    }

    #[inline]
    fn table(&self, frame: PhysicalFrame) -> &'m mut PageTable {
        unsafe { get_table(self.mapper, frame) }
    }

    /// Walk down to the PT covering `va`, creating missing levels.
    fn walk_create<A: FrameAlloc>(
        &self,
        alloc: &mut A,
        va: VirtualAddress,
        user: bool,
    ) -> Result<&'m mut PageTable, MapError> {
        let (i4, i3, i2, _) = split_indices(va);
        let mut table = self.table(self.root);

        for idx in [i4, i3, i2] {
            let e = table.get(idx);
            let next = if e.present() {
                if e.large_page() {
                    return Err(MapError::LargePage(va));
                }
                if user && !e.user_access() {
                    table.set(idx, e.with_user_access(true));
                }
                e.frame()
            } else {
                let frame = alloc.alloc_4k().ok_or(MapError::OutOfMemory)?;
                unsafe { self.mapper.zero_frame(frame) };
                table.set(idx, PageEntryBits::table_link(frame, user));
                trace!("allocated page table {frame} for {va}");
                frame
            };
            table = self.table(next);
        }

        Ok(table)
    }

    /// Walk down to the PT covering `va` without allocating.
    fn walk(&self, va: VirtualAddress) -> Option<&'m mut PageTable> {
        let (i4, i3, i2, _) = split_indices(va);
        let mut table = self.table(self.root);
        for idx in [i4, i3, i2] {
            let e = table.get(idx);
            if !e.present() || e.large_page() {
                return None;
            }
            table = self.table(e.frame());
        }
        Some(table)
    }

    /// Map **one** 4 KiB page `va → pa` with `flags`.
    ///
    /// Missing intermediate tables are allocated from `alloc`, zeroed and
    /// linked. The leaf becomes `pa | flags | PRESENT`.
    ///
    /// # Errors
    /// - Alignment of `va` or `pa`.
    /// - [`MapError::AlreadyMapped`] if a present leaf exists; the old
    ///   mapping is left intact.
    /// - [`MapError::OutOfMemory`] if an intermediate table cannot be
    ///   allocated. Tables linked before the failure stay in place and are
    ///   reclaimed with the address space.
    pub fn map_page<A: FrameAlloc>(
        &self,
        alloc: &mut A,
        va: VirtualAddress,
        pa: PhysicalAddress,
        flags: PageEntryBits,
    ) -> Result<(), MapError> {
        if !va.is_frame_aligned() {
            return Err(MapError::UnalignedVirtual(va));
        }
        if !pa.is_frame_aligned() {
            return Err(MapError::UnalignedPhysical(pa));
        }

        let pt = self.walk_create(alloc, va, flags.user_access())?;
        let i1 = TableIndex::of(va, 1);
        if pt.get(i1).present() {
            return Err(MapError::AlreadyMapped(va));
        }

        pt.set(
            i1,
            flags.flags_only().with_present(true).with_physical_address(pa),
        );
        Ok(())
    }

    /// Unmap a single 4 KiB page at `va` and return the physical address it
    /// pointed to. An owned frame is handed back to `alloc`.
    ///
    /// # Errors
    /// [`UnmapError::NotMapped`] if there is no present leaf.
    pub fn unmap_page<A: FrameAlloc>(
        &self,
        alloc: &mut A,
        va: VirtualAddress,
    ) -> Result<PhysicalAddress, UnmapError> {
        let va = va.align_down(FRAME_SIZE);
        let pt = self.walk(va).ok_or(UnmapError::NotMapped(va))?;
        let i1 = TableIndex::of(va, 1);
        let e = pt.get(i1);
        if !e.present() {
            return Err(UnmapError::NotMapped(va));
        }

        pt.set(i1, PageEntryBits::new());
        if e.owned() {
            alloc.free_4k(e.frame());
        }
        Ok(e.physical_address())
    }

    /// Leaf entry for `va`, if present.
    #[must_use]
    pub fn leaf(&self, va: VirtualAddress) -> Option<PageEntryBits> {
        let e = self.walk(va)?.get(TableIndex::of(va, 1));
        e.present().then_some(e)
    }

    /// Translate a `VirtualAddress` to a `PhysicalAddress` if mapped.
    #[must_use]
    pub fn translate(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        self.leaf(va)
            .map(|e| e.physical_address() + va.frame_offset())
    }

    /// Back `[va, va + bytes)` with freshly allocated, zeroed frames.
    ///
    /// The leaves carry the `owned` bit, so the frames go back to the
    /// allocator when the space is cleared.
    ///
    /// # Errors
    /// [`MapError::OutOfMemory`], alignment, or overlap with an existing
    /// mapping. Pages mapped before the failure remain owned by the space.
    pub fn map_anonymous<A: FrameAlloc>(
        &self,
        alloc: &mut A,
        va: VirtualAddress,
        bytes: u64,
        flags: PageEntryBits,
    ) -> Result<(), MapError> {
        if !va.is_frame_aligned() {
            return Err(MapError::UnalignedVirtual(va));
        }
        let end = va
            .checked_add(bytes)
            .filter(|end| end.as_u64() <= kernel_info::memory::USERSPACE_END)
            .ok_or(MapError::NotUserRange(va))?;

        let mut page = va;
        while page < end {
            let frame = alloc.alloc_4k().ok_or(MapError::OutOfMemory)?;
            unsafe { self.mapper.zero_frame(frame) };
            if let Err(e) = self.map_page(alloc, page, frame.base(), flags.with_owned(true)) {
                alloc.free_4k(frame);
                return Err(e);
            }
            page += FRAME_SIZE;
        }
        Ok(())
    }

    /// Copy `data` into already mapped memory starting at `va`.
    ///
    /// # Errors
    /// [`UnmapError::NotMapped`] for the first page without a mapping; bytes
    /// before it have been written.
    pub fn write_bytes(&self, va: VirtualAddress, data: &[u8]) -> Result<(), UnmapError> {
        let mut done = 0usize;
        while done < data.len() {
            let cur = va + done as u64;
            let pa = self.translate(cur).ok_or(UnmapError::NotMapped(cur))?;
            let chunk = ((FRAME_SIZE - cur.frame_offset()) as usize).min(data.len() - done);
            let dst = self.mapper.phys_to_virt(pa).as_mut_ptr::<u8>();
            unsafe { core::ptr::copy_nonoverlapping(data[done..].as_ptr(), dst, chunk) };
            done += chunk;
        }
        Ok(())
    }

    /// Read mapped memory starting at `va` into `buf`.
    ///
    /// # Errors
    /// [`UnmapError::NotMapped`] for the first page without a mapping.
    pub fn read_bytes(&self, va: VirtualAddress, buf: &mut [u8]) -> Result<(), UnmapError> {
        let mut done = 0usize;
        while done < buf.len() {
            let cur = va + done as u64;
            let pa = self.translate(cur).ok_or(UnmapError::NotMapped(cur))?;
            let chunk = ((FRAME_SIZE - cur.frame_offset()) as usize).min(buf.len() - done);
            let src = self.mapper.phys_to_virt(pa).as_mut_ptr::<u8>();
            unsafe { core::ptr::copy_nonoverlapping(src, buf[done..].as_mut_ptr(), chunk) };
            done += chunk;
        }
        Ok(())
    }

    /// Visit every present 4 KiB leaf of the user half in address order.
    fn for_each_user_leaf<E>(
        &self,
        mut f: impl FnMut(VirtualAddress, PageEntryBits) -> Result<(), E>,
    ) -> Result<(), E> {
        let pml4 = self.table(self.root);
        for i4 in 0..KERNEL_PML4_START {
            let e4 = pml4.entry(i4);
            if !e4.present() {
                continue;
            }
            let pdpt = self.table(e4.frame());
            for i3 in 0..PAGE_TABLE_ENTRIES {
                let e3 = pdpt.entry(i3);
                if !e3.present() || e3.large_page() {
                    continue;
                }
                let pd = self.table(e3.frame());
                for i2 in 0..PAGE_TABLE_ENTRIES {
                    let e2 = pd.entry(i2);
                    if !e2.present() || e2.large_page() {
                        continue;
                    }
                    let pt = self.table(e2.frame());
                    for i1 in 0..PAGE_TABLE_ENTRIES {
                        let e1 = pt.entry(i1);
                        if e1.present() {
                            f(join_indices(i4, i3, i2, i1), e1)?;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Duplicate the user half of `parent` into this (empty) space.
    ///
    /// Owned pages are physically copied into new frames; non-owned leaves
    /// (shared or device memory) are mapped to the same frame. Returns the
    /// number of pages copied.
    ///
    /// # Errors
    /// [`MapError::OutOfMemory`]. Whatever was copied so far is owned by this
    /// space and released with it.
    pub fn copy_user_from<A: FrameAlloc>(
        &self,
        alloc: &mut A,
        parent: &AddressSpace<'_, M>,
    ) -> Result<usize, MapError> {
        let mut copied = 0usize;
        parent.for_each_user_leaf(|va, e| {
            let flags = e.flags_only();
            if e.owned() {
                let frame = alloc.alloc_4k().ok_or(MapError::OutOfMemory)?;
                unsafe { self.mapper.copy_frame(e.frame(), frame) };
                if let Err(err) = self.map_page(alloc, va, frame.base(), flags) {
                    alloc.free_4k(frame);
                    return Err(err);
                }
                copied += 1;
                Ok(())
            } else {
                self.map_page(alloc, va, e.physical_address(), flags)
            }
        })?;
        trace!("copied {copied} user pages from {} into {}", parent.root, self.root);
        Ok(copied)
    }

    /// Number of present user leaves.
    #[must_use]
    pub fn user_page_count(&self) -> usize {
        let mut n = 0usize;
        let _ = self.for_each_user_leaf(|_, _| {
            n += 1;
            Ok::<(), ()>(())
        });
        n
    }

    /// Release the whole user half: owned leaf frames and every lower-half
    /// PDPT/PD/PT go back to `alloc`, and PML4 entries `0..256` are cleared.
    ///
    /// The root and the kernel half are untouched. Returns the number of
    /// frames released.
    pub fn clear_user<A: FrameAlloc>(&self, alloc: &mut A) -> usize {
        let mut released = 0usize;
        let pml4 = self.table(self.root);

        for i4 in 0..KERNEL_PML4_START {
            let e4 = pml4.entry(i4);
            if !e4.present() {
                continue;
            }
            let pdpt = self.table(e4.frame());
            for i3 in 0..PAGE_TABLE_ENTRIES {
                let e3 = pdpt.entry(i3);
                if !e3.present() || e3.large_page() {
                    continue;
                }
                let pd = self.table(e3.frame());
                for i2 in 0..PAGE_TABLE_ENTRIES {
                    let e2 = pd.entry(i2);
                    if !e2.present() || e2.large_page() {
                        continue;
                    }
                    let pt = self.table(e2.frame());
                    for i1 in 0..PAGE_TABLE_ENTRIES {
                        let e1 = pt.entry(i1);
                        if e1.present() && e1.owned() {
                            alloc.free_4k(e1.frame());
                            released += 1;
                        }
                    }
                    alloc.free_4k(e2.frame());
                    released += 1;
                }
                alloc.free_4k(e3.frame());
                released += 1;
            }
            alloc.free_4k(e4.frame());
            released += 1;
            pml4.set_entry(i4, PageEntryBits::new());
        }

        trace!("cleared user half of {}: {released} frames released", self.root);
        released
    }

    /// Clear the user half and free the root itself.
    ///
    /// Returns the number of frames released, including the root.
    pub fn destroy<A: FrameAlloc>(self, alloc: &mut A) -> usize {
        let released = self.clear_user(alloc);
        alloc.free_4k(self.root);
        trace!("destroyed address space {}", self.root);
        released + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{TestFrames, TestPhys};
    use kernel_info::memory::{KERNEL_BASE, USER_IMAGE_BASE};

    fn setup(frames: usize) -> (TestPhys, TestFrames) {
        let phys = TestPhys::with_frames(frames);
        let alloc = TestFrames::all_of(&phys);
        (phys, alloc)
    }

    #[test]
    fn map_page_creates_tables_and_leaf() {
        let (phys, mut alloc) = setup(32);
        let space = AddressSpace::create(&phys, &mut alloc, None).unwrap();
        let before = alloc.free_count();

        let va = VirtualAddress::new(USER_IMAGE_BASE);
        let pa = PhysicalAddress::new(0x5000);
        space
            .map_page(&mut alloc, va, pa, PageEntryBits::user_rx())
            .unwrap();

        // PDPT, PD and PT were allocated lazily
        assert_eq!(before - alloc.free_count(), 3);
        assert_eq!(space.translate(va + 0x123), Some(pa + 0x123));

        let leaf = space.leaf(va).unwrap();
        assert!(leaf.present() && leaf.user_access() && !leaf.writable());
        assert!(!leaf.owned());

        // every level above a user leaf is user accessible
        let pml4 = unsafe { get_table(&phys, space.root()) };
        let e4 = pml4.get(TableIndex::of(va, 4));
        assert!(e4.present() && e4.user_access() && e4.writable());
    }

    #[test]
    fn second_mapping_in_same_table_allocates_nothing() {
        let (phys, mut alloc) = setup(32);
        let space = AddressSpace::create(&phys, &mut alloc, None).unwrap();
        let va = VirtualAddress::new(USER_IMAGE_BASE);
        space
            .map_page(&mut alloc, va, PhysicalAddress::new(0x5000), PageEntryBits::user_rw())
            .unwrap();
        let before = alloc.free_count();
        space
            .map_page(
                &mut alloc,
                va + FRAME_SIZE,
                PhysicalAddress::new(0x6000),
                PageEntryBits::user_rw(),
            )
            .unwrap();
        assert_eq!(alloc.free_count(), before);
    }

    #[test]
    fn map_page_rejects_overlap_and_misalignment() {
        let (phys, mut alloc) = setup(32);
        let space = AddressSpace::create(&phys, &mut alloc, None).unwrap();
        let va = VirtualAddress::new(USER_IMAGE_BASE);
        let pa = PhysicalAddress::new(0x5000);
        let flags = PageEntryBits::user_rw();

        space.map_page(&mut alloc, va, pa, flags).unwrap();
        assert_eq!(
            space.map_page(&mut alloc, va, PhysicalAddress::new(0x6000), flags),
            Err(MapError::AlreadyMapped(va))
        );
        assert_eq!(space.translate(va), Some(pa));

        assert!(matches!(
            space.map_page(&mut alloc, va + 1, pa, flags),
            Err(MapError::UnalignedVirtual(_))
        ));
        assert!(matches!(
            space.map_page(&mut alloc, va + FRAME_SIZE, pa + 8, flags),
            Err(MapError::UnalignedPhysical(_))
        ));
    }

    #[test]
    fn map_page_reports_out_of_memory() {
        let (phys, mut alloc) = setup(2);
        let space = AddressSpace::create(&phys, &mut alloc, None).unwrap();
        // one frame left, three tables needed
        let r = space.map_page(
            &mut alloc,
            VirtualAddress::new(USER_IMAGE_BASE),
            PhysicalAddress::zero(),
            PageEntryBits::user_rw(),
        );
        assert_eq!(r, Err(MapError::OutOfMemory));
        // the partially built chain is still reclaimed
        space.destroy(&mut alloc);
        assert_eq!(alloc.free_count(), 2);
    }

    #[test]
    fn kernel_half_is_aliased_and_never_freed() {
        let (phys, mut alloc) = setup(64);
        let kernel = AddressSpace::create(&phys, &mut alloc, None).unwrap();
        let kva = VirtualAddress::new(KERNEL_BASE);
        kernel
            .map_page(&mut alloc, kva, PhysicalAddress::new(0x10_0000), PageEntryBits::kernel_rx())
            .unwrap();
        let after_kernel = alloc.free_count();

        let user = AddressSpace::create(&phys, &mut alloc, Some(kernel.root())).unwrap();
        assert_eq!(user.translate(kva), Some(PhysicalAddress::new(0x10_0000)));

        user.map_anonymous(
            &mut alloc,
            VirtualAddress::new(USER_IMAGE_BASE),
            2 * FRAME_SIZE,
            PageEntryBits::user_rw(),
        )
        .unwrap();
        user.destroy(&mut alloc);

        assert_eq!(alloc.free_count(), after_kernel);
        assert_eq!(kernel.translate(kva), Some(PhysicalAddress::new(0x10_0000)));
    }

    #[test]
    fn populated_kernel_half_is_shared_by_later_spaces() {
        let (phys, mut alloc) = setup(300);
        let kernel = AddressSpace::create(&phys, &mut alloc, None).unwrap();
        assert_eq!(kernel.populate_kernel_half(&mut alloc).unwrap(), 256);
        assert_eq!(kernel.populate_kernel_half(&mut alloc).unwrap(), 0);

        let user = AddressSpace::create(&phys, &mut alloc, Some(kernel.root())).unwrap();
        // Mapped through the kernel root after the user space was created.
        let kva = VirtualAddress::new(KERNEL_BASE + 0x20_0000);
        kernel
            .map_page(&mut alloc, kva, PhysicalAddress::new(0x4000), PageEntryBits::kernel_rw())
            .unwrap();
        assert_eq!(user.translate(kva), Some(PhysicalAddress::new(0x4000)));
    }

    #[test]
    fn anonymous_memory_is_zeroed_owned_and_reclaimed() {
        let (phys, mut alloc) = setup(64);
        let total = alloc.free_count();
        let space = AddressSpace::create(&phys, &mut alloc, None).unwrap();
        let va = VirtualAddress::new(USER_IMAGE_BASE);

        space
            .map_anonymous(&mut alloc, va, 3 * FRAME_SIZE, PageEntryBits::user_rw())
            .unwrap();
        assert_eq!(space.user_page_count(), 3);
        assert!(space.leaf(va).unwrap().owned());

        let mut buf = [0xAAu8; 16];
        space.read_bytes(va + 2 * FRAME_SIZE, &mut buf).unwrap();
        assert_eq!(buf, [0u8; 16]);

        // 3 tables + 3 data frames, the root stays
        assert_eq!(space.clear_user(&mut alloc), 6);
        assert_eq!(space.user_page_count(), 0);
        assert_eq!(space.destroy(&mut alloc), 1);
        assert_eq!(alloc.free_count(), total);
    }

    #[test]
    fn write_and_read_cross_page_boundaries() {
        let (phys, mut alloc) = setup(32);
        let space = AddressSpace::create(&phys, &mut alloc, None).unwrap();
        let va = VirtualAddress::new(USER_IMAGE_BASE);
        space
            .map_anonymous(&mut alloc, va, 2 * FRAME_SIZE, PageEntryBits::user_rw())
            .unwrap();

        let at = va + FRAME_SIZE - 3;
        space.write_bytes(at, b"hello").unwrap();
        let mut out = [0u8; 5];
        space.read_bytes(at, &mut out).unwrap();
        assert_eq!(&out, b"hello");

        assert_eq!(
            space.write_bytes(va + 2 * FRAME_SIZE, b"x"),
            Err(UnmapError::NotMapped(va + 2 * FRAME_SIZE))
        );
    }

    #[test]
    fn unmap_frees_only_owned_frames() {
        let (phys, mut alloc) = setup(32);
        let space = AddressSpace::create(&phys, &mut alloc, None).unwrap();
        let anon = VirtualAddress::new(USER_IMAGE_BASE);
        let device = anon + FRAME_SIZE;
        space
            .map_anonymous(&mut alloc, anon, FRAME_SIZE, PageEntryBits::user_rw())
            .unwrap();
        space
            .map_page(&mut alloc, device, PhysicalAddress::new(0x1000), PageEntryBits::user_rw())
            .unwrap();

        let before = alloc.free_count();
        space.unmap_page(&mut alloc, anon).unwrap();
        assert_eq!(alloc.free_count(), before + 1);
        assert_eq!(
            space.unmap_page(&mut alloc, device),
            Ok(PhysicalAddress::new(0x1000))
        );
        assert_eq!(alloc.free_count(), before + 1);
        assert_eq!(
            space.unmap_page(&mut alloc, device),
            Err(UnmapError::NotMapped(device))
        );
        assert_eq!(space.translate(anon), None);
    }

    #[test]
    fn fork_copy_is_physical_and_independent() {
        let (phys, mut alloc) = setup(64);
        let parent = AddressSpace::create(&phys, &mut alloc, None).unwrap();
        let va = VirtualAddress::new(USER_IMAGE_BASE);
        parent
            .map_anonymous(&mut alloc, va, 2 * FRAME_SIZE, PageEntryBits::user_rw())
            .unwrap();
        let shared = va + 4 * FRAME_SIZE;
        parent
            .map_page(&mut alloc, shared, PhysicalAddress::new(0x2000), PageEntryBits::user_ro_nx())
            .unwrap();
        parent.write_bytes(va, b"parent").unwrap();

        let child = AddressSpace::create(&phys, &mut alloc, None).unwrap();
        assert_eq!(child.copy_user_from(&mut alloc, &parent), Ok(2));
        assert_eq!(child.user_page_count(), 3);

        // owned pages get their own frames, shared ones alias
        assert_ne!(child.translate(va), parent.translate(va));
        assert_eq!(child.translate(shared), parent.translate(shared));
        assert!(child.leaf(va).unwrap().owned());

        let mut buf = [0u8; 6];
        child.read_bytes(va, &mut buf).unwrap();
        assert_eq!(&buf, b"parent");

        child.write_bytes(va, b"child!").unwrap();
        parent.read_bytes(va, &mut buf).unwrap();
        assert_eq!(&buf, b"parent");
    }
}

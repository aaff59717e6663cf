//! Kernel heap and page-table operations on a booted [`Kernel`].

use crate::cpu::Cpu;
use crate::error::KernelError;
use crate::kernel::Kernel;
use crate::loader::ExecutableLoader;
use crate::security::PermissionCheck;
use core::ptr::NonNull;
use kernel_alloc::frame_alloc::MemoryStats;
use kernel_memory_addresses::{PhysicalAddress, PhysicalFrame, VirtualAddress};
use kernel_vmem::{AddressSpace, PageEntryBits, PhysMapper};
use log::debug;

impl<M, C, L, P> Kernel<'_, M, C, L, P>
where
    M: PhysMapper,
    C: Cpu,
    L: ExecutableLoader,
    P: PermissionCheck,
{
    /// Allocate `size` bytes from the kernel heap.
    ///
    /// # Errors
    /// [`KernelError::Heap`] for `size == 0` or exhaustion.
    pub fn kmalloc(&mut self, size: usize) -> Result<NonNull<u8>, KernelError> {
        Ok(self.memory.heap_mut().kmalloc(size)?)
    }

    /// Return a heap allocation.
    ///
    /// # Errors
    /// [`KernelError::Heap`] for foreign pointers and double frees.
    pub fn kfree(&mut self, ptr: NonNull<u8>) -> Result<(), KernelError> {
        Ok(self.memory.heap_mut().kfree(ptr)?)
    }

    /// Zeroed allocation of `n * size` bytes.
    ///
    /// # Errors
    /// [`KernelError::Heap`] on overflow or exhaustion.
    pub fn kcalloc(&mut self, n: usize, size: usize) -> Result<NonNull<u8>, KernelError> {
        Ok(self.memory.heap_mut().kcalloc(n, size)?)
    }

    /// Resize `ptr` to `size` bytes; see [`KernelHeap::krealloc`](kernel_alloc::heap::KernelHeap::krealloc).
    ///
    /// # Errors
    /// [`KernelError::Heap`]; the old allocation survives a failure.
    pub fn krealloc(
        &mut self,
        ptr: Option<NonNull<u8>>,
        size: usize,
    ) -> Result<Option<NonNull<u8>>, KernelError> {
        Ok(self.memory.heap_mut().krealloc(ptr, size)?)
    }

    /// A fresh PML4 sharing the kernel half with every other address space.
    ///
    /// # Errors
    /// [`KernelError::Map`] if no frame is left for the root.
    pub fn create_page_table(&mut self) -> Result<PhysicalFrame, KernelError> {
        let space = AddressSpace::create(self.memory.mapper(), &mut self.memory, Some(self.kernel_root))?;
        let root = space.root();
        self.page_tables.push(root);
        debug!("page table {root} created");
        Ok(root)
    }

    /// Free the user half of `root` and the root itself.
    ///
    /// # Errors
    /// - [`KernelError::KernelRootProtected`] for the kernel root.
    /// - [`KernelError::RootInUse`] while a process still runs on `root`.
    /// - [`KernelError::UnknownRoot`] for anything else not returned by
    ///   [`create_page_table`](Self::create_page_table), including a root
    ///   that was already destroyed.
    pub fn destroy_page_table(&mut self, root: PhysicalFrame) -> Result<usize, KernelError> {
        if root == self.kernel_root {
            return Err(KernelError::KernelRootProtected);
        }
        if self.table.iter().any(|(_, p)| p.root == root) {
            return Err(KernelError::RootInUse(root));
        }
        let slot = self
            .page_tables
            .iter()
            .position(|&r| r == root)
            .ok_or(KernelError::UnknownRoot(root))?;
        self.page_tables.swap_remove(slot);
        let released = self.address_space(root).destroy(&mut self.memory);
        debug!("page table {root} destroyed, {released} frames released");
        Ok(released)
    }

    /// Map one 4 KiB page of `root`. Missing intermediate tables are
    /// allocated on the way down.
    ///
    /// The caller keeps ownership of `pa`: the entry never carries the owned
    /// bit, so destroying `root` leaves the frame alone.
    ///
    /// # Errors
    /// [`KernelError::Map`]: misalignment, exhaustion, or an existing mapping
    /// at `va`.
    pub fn map_page(
        &mut self,
        root: PhysicalFrame,
        va: VirtualAddress,
        pa: PhysicalAddress,
        flags: PageEntryBits,
    ) -> Result<(), KernelError> {
        let space = self.address_space(root);
        Ok(space.map_page(&mut self.memory, va, pa, flags.with_owned(false))?)
    }

    /// Remove the mapping of `va` in `root`, returning its physical address.
    ///
    /// # Errors
    /// [`KernelError::Unmap`] if `va` is not mapped.
    pub fn unmap_page(
        &mut self,
        root: PhysicalFrame,
        va: VirtualAddress,
    ) -> Result<PhysicalAddress, KernelError> {
        let space = self.address_space(root);
        Ok(space.unmap_page(&mut self.memory, va)?)
    }

    #[must_use]
    pub fn translate(&self, root: PhysicalFrame, va: VirtualAddress) -> Option<PhysicalAddress> {
        self.address_space(root).translate(va)
    }

    #[must_use]
    pub const fn memory_stats(&self) -> MemoryStats {
        self.memory.stats()
    }
}

use crate::error::LoaderError;
use kernel_alloc::KernelMemory;
use kernel_memory_addresses::{FRAME_SIZE, VirtualAddress, align_up};
use kernel_vmem::{AddressSpace, PageEntryBits, PhysMapper};

/// Where execution starts and where the user heap begins.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct LoadedImage {
    pub entry: VirtualAddress,
    pub heap_base: VirtualAddress,
}

/// Access rights of a loadable segment.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub struct SegmentFlags {
    pub writable: bool,
    pub executable: bool,
}

impl SegmentFlags {
    pub const TEXT: Self = Self {
        writable: false,
        executable: true,
    };
    pub const DATA: Self = Self {
        writable: true,
        executable: false,
    };
    pub const RODATA: Self = Self {
        writable: false,
        executable: false,
    };

    const fn page_bits(self) -> PageEntryBits {
        match (self.writable, self.executable) {
            (false, true) => PageEntryBits::user_rx(),
            (true, false) => PageEntryBits::user_rw(),
            (false, false) => PageEntryBits::user_ro_nx(),
            (true, true) => PageEntryBits::user_rw().with_no_execute(false),
        }
    }
}

/// Parses an executable and populates a fresh user address space.
///
/// The format (ELF or otherwise) is the implementation's business; the core
/// only hands over an [`ImageBuilder`] for the target space.
pub trait ExecutableLoader {
    /// Load the image at `path`.
    ///
    /// # Errors
    /// Whatever prevents the image from being loaded. Segments mapped before
    /// the failure are reclaimed by the caller.
    fn load<M: PhysMapper>(
        &mut self,
        path: &str,
        image: &mut ImageBuilder<'_, '_, M>,
    ) -> Result<LoadedImage, LoaderError>;
}

/// Narrow view of a process address space under construction.
pub struct ImageBuilder<'a, 'm, M: PhysMapper> {
    space: &'a AddressSpace<'m, M>,
    memory: &'a mut KernelMemory<'m, M>,
    mapped_pages: u64,
}

impl<'a, 'm, M: PhysMapper> ImageBuilder<'a, 'm, M> {
    pub(crate) const fn new(space: &'a AddressSpace<'m, M>, memory: &'a mut KernelMemory<'m, M>) -> Self {
        Self {
            space,
            memory,
            mapped_pages: 0,
        }
    }

    /// Back `[va, va + len)` with zeroed user pages. `va` is rounded down and
    /// the end up to page boundaries.
    ///
    /// # Errors
    /// Out of memory, overlap with an earlier segment, or a range outside the
    /// user half.
    pub fn map_segment(
        &mut self,
        va: VirtualAddress,
        len: u64,
        flags: SegmentFlags,
    ) -> Result<(), LoaderError> {
        let start = va.align_down(FRAME_SIZE);
        let end = align_up(va.as_u64().saturating_add(len), FRAME_SIZE);
        let bytes = end - start.as_u64();
        self.space
            .map_anonymous(&mut *self.memory, start, bytes, flags.page_bits())?;
        self.mapped_pages += bytes / FRAME_SIZE;
        Ok(())
    }

    /// Copy `data` into previously mapped segments.
    ///
    /// # Errors
    /// [`LoaderError::Write`] if part of the range is not mapped.
    pub fn write(&mut self, va: VirtualAddress, data: &[u8]) -> Result<(), LoaderError> {
        self.space.write_bytes(va, data)?;
        Ok(())
    }

    /// Pages mapped through this builder so far.
    #[must_use]
    pub const fn mapped_pages(&self) -> u64 {
        self.mapped_pages
    }
}

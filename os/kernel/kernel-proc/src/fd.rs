use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use kernel_info::process::MAX_FDS_PER_PROCESS;

/// An open file object supplied by the filesystem layer.
///
/// The kernel core only stores and shares these; reads and writes go through
/// the filesystem's own interface. Sharing across `fork` is done by cloning the
/// `Arc`, so the object is released when the last descriptor goes away.
pub trait OpenFile: Send + Sync {
    /// Short type name for diagnostics (`"file"`, `"pipe"`, ...).
    fn kind(&self) -> &'static str;
}

/// One slot of an [`FdTable`].
#[derive(Clone)]
pub struct FileDescriptor {
    pub file: Arc<dyn OpenFile>,
    pub offset: u64,
    pub flags: u32,
}

impl fmt::Debug for FileDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileDescriptor")
            .field("file", &self.file.kind())
            .field("offset", &self.offset)
            .field("flags", &self.flags)
            .finish()
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum FdError {
    #[error("descriptor table is full")]
    TableFull,
    #[error("bad file descriptor {0}")]
    BadDescriptor(usize),
}

/// Per-process descriptor table with lowest-free allocation.
///
/// Grows on demand up to `MAX_FDS_PER_PROCESS` slots.
#[derive(Clone, Debug, Default)]
pub struct FdTable {
    slots: Vec<Option<FileDescriptor>>,
}

impl FdTable {
    #[must_use]
    pub const fn new() -> Self {
        Self { slots: Vec::new() }
    }

    /// Install `file` in the lowest free slot and return its number.
    ///
    /// # Errors
    /// [`FdError::TableFull`] once all `MAX_FDS_PER_PROCESS` slots are open.
    pub fn alloc(&mut self, file: Arc<dyn OpenFile>, flags: u32) -> Result<usize, FdError> {
        let fd = FileDescriptor {
            file,
            offset: 0,
            flags,
        };
        if let Some(i) = self.slots.iter().position(Option::is_none) {
            self.slots[i] = Some(fd);
            return Ok(i);
        }
        if self.slots.len() >= MAX_FDS_PER_PROCESS {
            return Err(FdError::TableFull);
        }
        self.slots.push(Some(fd));
        Ok(self.slots.len() - 1)
    }

    #[must_use]
    pub fn get(&self, fd: usize) -> Option<&FileDescriptor> {
        self.slots.get(fd).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, fd: usize) -> Option<&mut FileDescriptor> {
        self.slots.get_mut(fd).and_then(Option::as_mut)
    }

    /// Close one descriptor, returning it so the caller can drop the file.
    ///
    /// # Errors
    /// [`FdError::BadDescriptor`] if `fd` is not open.
    pub fn close(&mut self, fd: usize) -> Result<FileDescriptor, FdError> {
        self.slots
            .get_mut(fd)
            .and_then(Option::take)
            .ok_or(FdError::BadDescriptor(fd))
    }

    /// Close everything; returns how many descriptors were open.
    pub fn close_all(&mut self) -> usize {
        let n = self.open_count();
        self.slots.clear();
        n
    }

    #[must_use]
    pub fn open_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Console;

    impl OpenFile for Console {
        fn kind(&self) -> &'static str {
            "console"
        }
    }

    #[test]
    fn lowest_free_slot_is_reused() {
        let file: Arc<dyn OpenFile> = Arc::new(Console);
        let mut t = FdTable::new();
        assert_eq!(t.alloc(file.clone(), 0), Ok(0));
        assert_eq!(t.alloc(file.clone(), 0), Ok(1));
        assert_eq!(t.alloc(file.clone(), 0), Ok(2));
        t.close(1).unwrap();
        assert_eq!(t.alloc(file.clone(), 0), Ok(1));
        assert_eq!(t.open_count(), 3);
        assert!(matches!(t.close(7), Err(FdError::BadDescriptor(7))));
    }

    #[test]
    fn clones_share_files() {
        let file: Arc<dyn OpenFile> = Arc::new(Console);
        let mut t = FdTable::new();
        t.alloc(file.clone(), 0).unwrap();
        let copy = t.clone();
        assert_eq!(Arc::strong_count(&file), 3);

        t.close_all();
        assert_eq!(Arc::strong_count(&file), 2);
        assert_eq!(copy.get(0).unwrap().file.kind(), "console");
        drop(copy);
        assert_eq!(Arc::strong_count(&file), 1);
    }

    #[test]
    fn table_fills_up() {
        let file: Arc<dyn OpenFile> = Arc::new(Console);
        let mut t = FdTable::new();
        for _ in 0..MAX_FDS_PER_PROCESS {
            t.alloc(file.clone(), 0).unwrap();
        }
        assert_eq!(t.alloc(file, 0), Err(FdError::TableFull));
    }
}

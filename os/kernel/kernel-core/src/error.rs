use kernel_alloc::MemoryInitError;
use kernel_alloc::buddy::BuddyError;
use kernel_alloc::frame_alloc::FrameError;
use kernel_alloc::heap::HeapError;
use kernel_alloc::slab::SlabError;
use kernel_memory_addresses::PhysicalFrame;
use kernel_proc::{FdError, Pid, QueueError, SignalError, TableError};
use kernel_sched::StateViolation;
use kernel_vmem::{MapError, UnmapError};

/// Coarse classification of a [`KernelError`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ErrorKind {
    /// No frame, block, slab object or process slot was available.
    ResourceExhausted,
    /// The request is not valid in the current state; nothing was changed.
    InvalidState,
}

/// Failure reported by an [`ExecutableLoader`](crate::ExecutableLoader).
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum LoaderError {
    #[error("no executable at the given path")]
    NotFound,
    #[error("malformed executable image")]
    InvalidImage,
    #[error("image mapping failed: {0}")]
    Map(#[from] MapError),
    #[error("image write failed: {0}")]
    Write(#[from] UnmapError),
}

#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    #[error("process table is full")]
    ProcessTableFull,
    #[error("no process is running")]
    NoCurrentProcess,
    #[error("no process with pid {0}")]
    NoSuchProcess(Pid),
    #[error("pid {0} is not a child of the caller")]
    NotAChild(Pid),
    #[error("caller has no children")]
    NoChildren,
    #[error("the idle process cannot be signalled")]
    IdleProcess,
    #[error("operation not permitted")]
    PermissionDenied,
    #[error("argument and environment strings do not fit the user stack")]
    ArgumentsTooLarge,
    #[error("the kernel page table cannot be destroyed")]
    KernelRootProtected,
    #[error("page table {0} belongs to a live process")]
    RootInUse(PhysicalFrame),
    #[error("page table {0} was not created by create_page_table")]
    UnknownRoot(PhysicalFrame),
    #[error(transparent)]
    MemoryInit(#[from] MemoryInitError),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Buddy(#[from] BuddyError),
    #[error(transparent)]
    Slab(#[from] SlabError),
    #[error(transparent)]
    Heap(#[from] HeapError),
    #[error(transparent)]
    Map(#[from] MapError),
    #[error(transparent)]
    Unmap(#[from] UnmapError),
    #[error(transparent)]
    Loader(#[from] LoaderError),
    #[error(transparent)]
    Table(#[from] TableError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Fd(#[from] FdError),
    #[error(transparent)]
    Signal(#[from] SignalError),
    #[error(transparent)]
    State(#[from] StateViolation),
}

impl KernelError {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        use ErrorKind::{InvalidState, ResourceExhausted};
        match self {
            Self::ProcessTableFull
            | Self::MemoryInit(_)
            | Self::Map(MapError::OutOfMemory)
            | Self::Loader(LoaderError::Map(MapError::OutOfMemory))
            | Self::Buddy(BuddyError::OutOfMemory(_))
            | Self::Slab(SlabError::OutOfMemory)
            | Self::Heap(
                HeapError::OutOfMemory
                | HeapError::Slab(SlabError::OutOfMemory)
                | HeapError::Buddy(BuddyError::OutOfMemory(_)),
            )
            | Self::Table(TableError::Full(_))
            | Self::Fd(FdError::TableFull) => ResourceExhausted,
            _ => InvalidState,
        }
    }
}

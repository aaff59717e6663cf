use crate::fd::FdTable;
use crate::ids::{Pid, Priority, ProcessType};
use crate::queue::QueueLink;
use crate::state::ProcessState;
use alloc::string::String;
use kernel_info::process::{DEFAULT_TIME_SLICE, MAX_PROCESS_NAME};
use kernel_memory_addresses::{PhysicalAddress, PhysicalFrame, VirtualAddress};

/// A kernel stack: one buddy block of `2^order` frames.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct KernelStack {
    pub base: PhysicalAddress,
    pub order: usize,
}

/// The user stack region, growing down from `base + size`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct UserStack {
    pub base: VirtualAddress,
    pub size: u64,
}

impl UserStack {
    #[inline]
    #[must_use]
    pub const fn top(&self) -> VirtualAddress {
        VirtualAddress::new(self.base.as_u64() + self.size)
    }
}

/// Process control block.
#[derive(Debug, Clone)]
pub struct Process {
    pub pid: Pid,
    /// `None` for the idle process and for orphans.
    pub ppid: Option<Pid>,
    pub name: String,
    pub kind: ProcessType,
    pub state: ProcessState,
    pub priority: Priority,

    /// Ticks left in the current quantum.
    pub time_slice: u32,
    pub cpu_time_ms: u64,
    pub start_time: u64,
    pub exit_time: Option<u64>,
    pub exit_code: i32,

    /// Slab object holding the saved [`RegisterSnapshot`](crate::RegisterSnapshot).
    pub context: PhysicalAddress,
    /// PML4 of the process' address space.
    pub root: PhysicalFrame,
    pub kernel_stack: KernelStack,
    pub user_stack: Option<UserStack>,
    pub entry: u64,
    pub heap_base: u64,
    pub cwd: String,
    pub fds: FdTable,

    /// Outcome of a blocking wait, set when a child is reaped on our behalf.
    pub wait_result: Option<(Pid, i32)>,
    pub link: QueueLink,
}

impl Process {
    /// A fresh Ready PCB. Resources are filled in by the caller.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pid: Pid,
        ppid: Option<Pid>,
        name: &str,
        kind: ProcessType,
        priority: Priority,
        context: PhysicalAddress,
        root: PhysicalFrame,
        kernel_stack: KernelStack,
    ) -> Self {
        Self {
            pid,
            ppid,
            name: truncated_name(name),
            kind,
            state: ProcessState::Ready,
            priority,
            time_slice: DEFAULT_TIME_SLICE,
            cpu_time_ms: 0,
            start_time: 0,
            exit_time: None,
            exit_code: 0,
            context,
            root,
            kernel_stack,
            user_stack: None,
            entry: 0,
            heap_base: 0,
            cwd: String::from("/"),
            fds: FdTable::new(),
            wait_result: None,
            link: QueueLink::default(),
        }
    }

    #[inline]
    #[must_use]
    pub const fn is_queued(&self) -> bool {
        self.link.tag.is_some()
    }

    /// Replace the name, truncated to `MAX_PROCESS_NAME` bytes.
    pub fn rename(&mut self, name: &str) {
        self.name = truncated_name(name);
    }

    #[must_use]
    pub fn info(&self) -> ProcessInfo {
        ProcessInfo {
            pid: self.pid,
            ppid: self.ppid,
            state: self.state,
            priority: self.priority,
            cpu_time: self.cpu_time_ms,
            name: self.name.clone(),
        }
    }
}

fn truncated_name(name: &str) -> String {
    let mut end = name.len().min(MAX_PROCESS_NAME);
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    String::from(&name[..end])
}

/// Snapshot returned by the process listing.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ProcessInfo {
    pub pid: Pid,
    pub ppid: Option<Pid>,
    pub state: ProcessState,
    pub priority: Priority,
    /// Milliseconds of CPU time consumed.
    pub cpu_time: u64,
    pub name: String,
}

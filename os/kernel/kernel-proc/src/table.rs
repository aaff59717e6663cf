use crate::ids::{Pid, SlotId};
use crate::process::Process;
use crate::queue::{QueueLink, QueueLinks};
use alloc::vec::Vec;
use log::trace;

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum TableError {
    #[error("process table is full ({0} slots)")]
    Full(usize),
    #[error("no process with pid {0}")]
    NoSuchProcess(Pid),
}

/// Fixed-capacity arena of PCBs.
///
/// Slot indices are stable for the lifetime of a process and are what the
/// scheduler queues link through. PIDs are assigned here, increasing
/// monotonically and never reusing `0`.
#[derive(Debug)]
pub struct ProcessTable {
    slots: Vec<Option<Process>>,
    next_pid: Pid,
    len: usize,
}

impl ProcessTable {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots,
            next_pid: Pid::FIRST,
            len: 0,
        }
    }

    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn has_free_slot(&self) -> bool {
        self.len < self.slots.len()
    }

    /// The PID the next [`insert_with`](Self::insert_with) will hand out.
    #[must_use]
    pub const fn peek_pid(&self) -> Pid {
        self.next_pid
    }

    /// Claim the lowest free slot and a fresh PID, building the PCB with `make`.
    ///
    /// # Errors
    /// [`TableError::Full`] when every slot is taken; no PID is consumed.
    pub fn insert_with(
        &mut self,
        make: impl FnOnce(Pid) -> Process,
    ) -> Result<(SlotId, Pid), TableError> {
        let index = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(TableError::Full(self.slots.len()))?;
        let pid = self.allocate_pid();
        self.slots[index] = Some(make(pid));
        self.len += 1;
        trace!("process table: pid {pid} in slot {index}");
        Ok((SlotId::new(index), pid))
    }

    /// Place the idle process (PID 0) in the lowest free slot.
    ///
    /// # Errors
    /// [`TableError::Full`] when no slot is free.
    pub fn insert_idle(&mut self, make: impl FnOnce(Pid) -> Process) -> Result<SlotId, TableError> {
        let index = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(TableError::Full(self.slots.len()))?;
        self.slots[index] = Some(make(Pid::IDLE));
        self.len += 1;
        Ok(SlotId::new(index))
    }

    fn allocate_pid(&mut self) -> Pid {
        // Skip PIDs still in use after a wrap-around.
        loop {
            let pid = self.next_pid;
            self.next_pid = pid.next();
            if self.slot_of(pid).is_none() {
                return pid;
            }
        }
    }

    #[must_use]
    pub fn get(&self, slot: SlotId) -> Option<&Process> {
        self.slots.get(slot.index()).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, slot: SlotId) -> Option<&mut Process> {
        self.slots.get_mut(slot.index()).and_then(Option::as_mut)
    }

    #[must_use]
    pub fn slot_of(&self, pid: Pid) -> Option<SlotId> {
        self.slots
            .iter()
            .position(|s| s.as_ref().is_some_and(|p| p.pid == pid))
            .map(SlotId::new)
    }

    /// Look up by PID.
    ///
    /// # Errors
    /// [`TableError::NoSuchProcess`] if no live slot carries `pid`.
    pub fn find(&self, pid: Pid) -> Result<(SlotId, &Process), TableError> {
        let slot = self.slot_of(pid).ok_or(TableError::NoSuchProcess(pid))?;
        self.get(slot)
            .map(|p| (slot, p))
            .ok_or(TableError::NoSuchProcess(pid))
    }

    /// Free a slot, handing back the PCB. The caller must have unqueued it.
    pub fn remove(&mut self, slot: SlotId) -> Option<Process> {
        let process = self.slots.get_mut(slot.index())?.take()?;
        debug_assert!(!process.is_queued(), "pid {} freed while queued", process.pid);
        self.len -= 1;
        Some(process)
    }

    /// Slots of the direct children of `parent`.
    pub fn children_of(&self, parent: Pid) -> impl Iterator<Item = SlotId> + '_ {
        self.iter()
            .filter(move |(_, p)| p.ppid == Some(parent))
            .map(|(slot, _)| slot)
    }

    /// Occupied slots in index order.
    pub fn iter(&self) -> impl Iterator<Item = (SlotId, &Process)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|p| (SlotId::new(i), p)))
    }
}

impl QueueLinks for ProcessTable {
    fn link(&self, slot: SlotId) -> Option<&QueueLink> {
        self.get(slot).map(|p| &p.link)
    }

    fn link_mut(&mut self, slot: SlotId) -> Option<&mut QueueLink> {
        self.get_mut(slot).map(|p| &mut p.link)
    }
}

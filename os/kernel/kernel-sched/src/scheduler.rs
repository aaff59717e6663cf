use kernel_info::process::MAX_PRIORITY_LEVELS;
use kernel_proc::{
    BlockReason, Priority, ProcessQueue, ProcessState, ProcessTable, QueueError, QueueTag, SlotId,
};
use log::{debug, trace};

/// A dispatch decision: save `from` (if any), resume `to`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Switch {
    pub from: Option<SlotId>,
    pub to: SlotId,
}

#[derive(Debug)]
pub struct Scheduler {
    pub(crate) ready: [ProcessQueue; MAX_PRIORITY_LEVELS],
    pub(crate) blocked: ProcessQueue,
    pub(crate) zombies: ProcessQueue,
    pub(crate) current: Option<SlotId>,
    pub(crate) idle: Option<SlotId>,
    time_slice: u32,
    need_resched: bool,
}

impl Scheduler {
    /// Empty scheduler handing out quanta of `time_slice` ticks (at least one).
    #[must_use]
    pub fn new(time_slice: u32) -> Self {
        Self {
            ready: core::array::from_fn(|level| {
                let priority = u32::try_from(level).map_or(Priority::LOWEST, Priority::clamped);
                ProcessQueue::new(QueueTag::Ready(priority))
            }),
            blocked: ProcessQueue::new(QueueTag::Blocked),
            zombies: ProcessQueue::new(QueueTag::Zombie),
            current: None,
            idle: None,
            time_slice: time_slice.max(1),
            need_resched: false,
        }
    }

    /// Register the idle process. It is picked when every ready queue is
    /// empty and is never queued itself.
    pub const fn set_idle(&mut self, slot: SlotId) {
        self.idle = Some(slot);
    }

    #[inline]
    #[must_use]
    pub const fn idle(&self) -> Option<SlotId> {
        self.idle
    }

    #[inline]
    #[must_use]
    pub const fn current(&self) -> Option<SlotId> {
        self.current
    }

    #[inline]
    #[must_use]
    pub const fn time_slice(&self) -> u32 {
        self.time_slice
    }

    #[inline]
    #[must_use]
    pub const fn need_resched(&self) -> bool {
        self.need_resched
    }

    pub const fn request_resched(&mut self) {
        self.need_resched = true;
    }

    #[must_use]
    pub const fn ready_queue(&self, priority: Priority) -> &ProcessQueue {
        &self.ready[priority.index()]
    }

    #[must_use]
    pub const fn blocked(&self) -> &ProcessQueue {
        &self.blocked
    }

    #[must_use]
    pub const fn zombies(&self) -> &ProcessQueue {
        &self.zombies
    }

    #[must_use]
    pub fn has_ready(&self) -> bool {
        self.ready.iter().any(|q| !q.is_empty())
    }

    #[must_use]
    pub fn ready_count(&self) -> usize {
        self.ready.iter().map(ProcessQueue::len).sum()
    }

    fn queue_mut(&mut self, tag: QueueTag) -> &mut ProcessQueue {
        match tag {
            QueueTag::Ready(p) => &mut self.ready[p.index()],
            QueueTag::Blocked => &mut self.blocked,
            QueueTag::Zombie => &mut self.zombies,
        }
    }

    /// Take `slot` out of whichever queue its link names.
    fn unlink(&mut self, table: &mut ProcessTable, slot: SlotId) -> Result<(), QueueError> {
        let tag = table.get(slot).ok_or(QueueError::UnknownSlot(slot))?.link.tag;
        if let Some(tag) = tag {
            self.queue_mut(tag).remove(table, slot)?;
        }
        Ok(())
    }

    /// Mark `slot` Ready and append it to the tail of its priority level.
    ///
    /// The idle process is only marked Ready, never queued.
    ///
    /// # Errors
    /// Fails if the slot is empty or already queued.
    pub fn enqueue(&mut self, table: &mut ProcessTable, slot: SlotId) -> Result<(), QueueError> {
        let priority = table.get(slot).ok_or(QueueError::UnknownSlot(slot))?.priority;
        if Some(slot) != self.idle {
            self.ready[priority.index()].push_back(table, slot)?;
        }
        if let Some(p) = table.get_mut(slot) {
            p.state = ProcessState::Ready;
        }
        trace!("sched: slot {} ready at priority {priority}", slot.index());
        Ok(())
    }

    /// Move `slot` to the blocked queue.
    ///
    /// # Errors
    /// Fails if the slot is empty or queue links are inconsistent.
    pub fn block(
        &mut self,
        table: &mut ProcessTable,
        slot: SlotId,
        reason: BlockReason,
    ) -> Result<(), QueueError> {
        debug_assert_ne!(Some(slot), self.idle, "idle process cannot block");
        self.unlink(table, slot)?;
        self.blocked.push_back(table, slot)?;
        if let Some(p) = table.get_mut(slot) {
            p.state = ProcessState::Blocked(reason);
        }
        if Some(slot) == self.current {
            self.need_resched = true;
        }
        Ok(())
    }

    /// Move a blocked process back to the tail of its ready level.
    ///
    /// # Errors
    /// [`QueueError::NotQueued`] if `slot` is not blocked.
    pub fn wake(&mut self, table: &mut ProcessTable, slot: SlotId) -> Result<(), QueueError> {
        self.blocked.remove(table, slot)?;
        self.enqueue(table, slot)
    }

    /// Move `slot` to the zombie queue from any state.
    ///
    /// # Errors
    /// Fails if the slot is empty or queue links are inconsistent.
    pub fn make_zombie(&mut self, table: &mut ProcessTable, slot: SlotId) -> Result<(), QueueError> {
        debug_assert_ne!(Some(slot), self.idle, "idle process cannot exit");
        self.unlink(table, slot)?;
        self.zombies.push_back(table, slot)?;
        if let Some(p) = table.get_mut(slot) {
            p.state = ProcessState::Zombie;
        }
        if Some(slot) == self.current {
            self.need_resched = true;
        }
        Ok(())
    }

    /// Forget `slot` entirely before its table entry is freed.
    ///
    /// # Errors
    /// Fails if the slot is empty or queue links are inconsistent.
    pub fn remove(&mut self, table: &mut ProcessTable, slot: SlotId) -> Result<(), QueueError> {
        self.unlink(table, slot)?;
        if self.current == Some(slot) {
            self.current = None;
        }
        Ok(())
    }

    /// Dequeue the head of the most urgent non-empty level, or fall back to
    /// the idle process.
    pub fn select_next(&mut self, table: &mut ProcessTable) -> Option<SlotId> {
        self.ready
            .iter_mut()
            .find_map(|q| q.pop_front(table))
            .or(self.idle)
    }

    /// Pick the next process to run.
    ///
    /// A current process that is still Running goes to the tail of its level
    /// first, so it competes with its peers. Returns `None` when the pick is
    /// the current process, or when nothing at all can run.
    ///
    /// # Errors
    /// Fails only if the queue links are inconsistent.
    pub fn schedule(&mut self, table: &mut ProcessTable) -> Result<Option<Switch>, QueueError> {
        self.need_resched = false;
        let prev = self.current;

        if let Some(cur) = prev {
            let running = table
                .get(cur)
                .is_some_and(|p| p.state == ProcessState::Running);
            if running {
                self.enqueue(table, cur)?;
            }
        }

        let Some(next) = self.select_next(table) else {
            self.current = None;
            return Ok(None);
        };
        let slice = self.time_slice;
        if let Some(p) = table.get_mut(next) {
            p.state = ProcessState::Running;
            p.time_slice = slice;
        }

        if prev == Some(next) {
            return Ok(None);
        }
        self.current = Some(next);
        debug!(
            "sched: switch {:?} -> {}",
            prev.and_then(|s| table.get(s)).map(|p| p.pid),
            table.get(next).map_or(0, |p| p.pid.as_u32())
        );
        Ok(Some(Switch { from: prev, to: next }))
    }

    /// Account one timer tick of `tick_ms` to the current process.
    ///
    /// Returns `true` if the caller should reschedule: the quantum ran out,
    /// a more urgent process is ready, idle is running while work is
    /// queued, or the current process stopped running.
    pub fn tick(&mut self, table: &mut ProcessTable, tick_ms: u64) -> bool {
        let Some(cur) = self.current else {
            return self.has_ready();
        };
        let is_idle = Some(cur) == self.idle;
        let Some(p) = table.get_mut(cur) else {
            self.need_resched = true;
            return true;
        };
        p.cpu_time_ms += tick_ms;

        if is_idle {
            self.need_resched |= self.ready.iter().any(|q| !q.is_empty());
        } else if p.state == ProcessState::Running {
            p.time_slice = p.time_slice.saturating_sub(1);
            let expired = p.time_slice == 0;
            let preempted = self.ready[..p.priority.index()]
                .iter()
                .any(|q| !q.is_empty());
            if expired || preempted {
                trace!("sched: pid {} expired={expired} preempted={preempted}", p.pid);
                self.need_resched = true;
            }
        } else {
            self.need_resched = true;
        }
        self.need_resched
    }
}

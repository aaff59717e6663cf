use crate::scheduler::Scheduler;
use kernel_proc::{Pid, ProcessQueue, ProcessState, ProcessTable, QueueTag, SlotId};

/// A broken scheduling invariant found by [`Scheduler::audit`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum StateViolation {
    #[error("pid {pid} is {state} but linked into {found:?}, expected {expected:?}")]
    WrongQueue {
        pid: Pid,
        state: ProcessState,
        expected: Option<QueueTag>,
        found: Option<QueueTag>,
    },
    #[error("pid {0} is running but not current")]
    RunningNotCurrent(Pid),
    #[error("current pid {0} is not running")]
    CurrentNotRunning(Pid),
    #[error("current slot {0:?} is empty")]
    DanglingCurrent(SlotId),
    #[error("idle process is queued in {0:?}")]
    IdleQueued(QueueTag),
    #[error("queue {tag:?} counts {counted} entries but links {linked}")]
    QueueLength {
        tag: QueueTag,
        counted: usize,
        linked: usize,
    },
}

impl Scheduler {
    /// Check that every process is in exactly the place its state demands:
    /// Running only as `current`, Ready in the queue of its priority, Blocked
    /// and Zombie in their queues, and idle in none.
    ///
    /// # Errors
    /// The first violation found.
    pub fn audit(&self, table: &ProcessTable) -> Result<(), StateViolation> {
        let queues = self
            .ready
            .iter()
            .chain([&self.blocked, &self.zombies]);
        for queue in queues {
            audit_queue(queue, table)?;
        }

        for (slot, p) in table.iter() {
            if Some(slot) == self.idle {
                if let Some(tag) = p.link.tag {
                    return Err(StateViolation::IdleQueued(tag));
                }
                continue;
            }

            let expected = match p.state {
                ProcessState::Ready => Some(QueueTag::Ready(p.priority)),
                ProcessState::Running => None,
                ProcessState::Blocked(_) => Some(QueueTag::Blocked),
                ProcessState::Zombie => Some(QueueTag::Zombie),
            };
            if p.link.tag != expected {
                return Err(StateViolation::WrongQueue {
                    pid: p.pid,
                    state: p.state,
                    expected,
                    found: p.link.tag,
                });
            }
            if p.state == ProcessState::Running && self.current != Some(slot) {
                return Err(StateViolation::RunningNotCurrent(p.pid));
            }
        }

        if let Some(cur) = self.current {
            let p = table.get(cur).ok_or(StateViolation::DanglingCurrent(cur))?;
            if p.state != ProcessState::Running {
                return Err(StateViolation::CurrentNotRunning(p.pid));
            }
        }
        Ok(())
    }
}

fn audit_queue(queue: &ProcessQueue, table: &ProcessTable) -> Result<(), StateViolation> {
    let tag = queue.tag();
    let mut linked = 0;
    // One past the count is enough to spot a cycle or a long chain.
    for slot in queue.iter(table).take(queue.len() + 1) {
        linked += 1;
        let found = table.get(slot).and_then(|p| p.link.tag);
        if found != Some(tag) {
            let (pid, state) = table
                .get(slot)
                .map_or((Pid::IDLE, ProcessState::Zombie), |p| (p.pid, p.state));
            return Err(StateViolation::WrongQueue {
                pid,
                state,
                expected: Some(tag),
                found,
            });
        }
    }
    if linked == queue.len() {
        Ok(())
    } else {
        Err(StateViolation::QueueLength {
            tag,
            counted: queue.len(),
            linked,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_memory_addresses::{PhysicalAddress, PhysicalFrame};
    use kernel_proc::{BlockReason, KernelStack, Priority, Process, ProcessType};

    fn table_with(n: usize) -> (ProcessTable, Vec<SlotId>) {
        let mut table = ProcessTable::new(8);
        let slots = (0..n)
            .map(|_| {
                table
                    .insert_with(|pid| {
                        Process::new(
                            pid,
                            None,
                            "t",
                            ProcessType::User,
                            Priority::DEFAULT,
                            PhysicalAddress::zero(),
                            PhysicalFrame::from_index(0),
                            KernelStack {
                                base: PhysicalAddress::zero(),
                                order: 0,
                            },
                        )
                    })
                    .unwrap()
                    .0
            })
            .collect();
        (table, slots)
    }

    #[test]
    fn unqueued_ready_process_is_flagged() {
        let (table, slots) = table_with(1);
        let sched = Scheduler::new(5);
        let err = sched.audit(&table).unwrap_err();
        assert_eq!(
            err,
            StateViolation::WrongQueue {
                pid: table.get(slots[0]).unwrap().pid,
                state: ProcessState::Ready,
                expected: Some(QueueTag::Ready(Priority::DEFAULT)),
                found: None,
            }
        );
    }

    #[test]
    fn state_changed_behind_the_schedulers_back() {
        let (mut table, slots) = table_with(2);
        let mut sched = Scheduler::new(5);
        sched.enqueue(&mut table, slots[0]).unwrap();
        sched.enqueue(&mut table, slots[1]).unwrap();
        sched.audit(&table).unwrap();

        table.get_mut(slots[1]).unwrap().state = ProcessState::Blocked(BlockReason::Stopped);
        assert!(matches!(
            sched.audit(&table),
            Err(StateViolation::WrongQueue { .. })
        ));

        table.get_mut(slots[1]).unwrap().state = ProcessState::Running;
        assert!(matches!(
            sched.audit(&table),
            Err(StateViolation::WrongQueue { .. })
        ));
    }

    #[test]
    fn current_must_be_running() {
        let (mut table, slots) = table_with(1);
        let mut sched = Scheduler::new(5);
        sched.enqueue(&mut table, slots[0]).unwrap();
        sched.schedule(&mut table).unwrap();
        sched.audit(&table).unwrap();

        table.get_mut(slots[0]).unwrap().state = ProcessState::Zombie;
        // Zombie but not linked into the zombie queue.
        assert!(matches!(
            sched.audit(&table),
            Err(StateViolation::WrongQueue { .. })
        ));
    }
}

//! Index-linked FIFOs threaded through the process table.
//!
//! A queue only stores head, tail and length; the `next` pointers live in the
//! PCBs themselves ([`QueueLink`]). The link also carries the tag of the queue
//! it is in, which makes double insertion and removal from the wrong queue
//! detectable without walking every queue.

use crate::ids::{Priority, SlotId};
use core::iter;

/// Identifies a queue.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum QueueTag {
    Ready(Priority),
    Blocked,
    Zombie,
}

/// Per-process intrusive link. Both fields are `None` while unqueued.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct QueueLink {
    pub next: Option<SlotId>,
    pub tag: Option<QueueTag>,
}

/// Storage the queues are threaded through.
pub trait QueueLinks {
    fn link(&self, slot: SlotId) -> Option<&QueueLink>;
    fn link_mut(&mut self, slot: SlotId) -> Option<&mut QueueLink>;
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum QueueError {
    #[error("slot {slot:?} is already in {tag:?}")]
    AlreadyQueued { slot: SlotId, tag: QueueTag },
    #[error("slot {0:?} is not in this queue")]
    NotQueued(SlotId),
    #[error("slot {0:?} is empty")]
    UnknownSlot(SlotId),
}

#[derive(Debug, Clone)]
pub struct ProcessQueue {
    tag: QueueTag,
    head: Option<SlotId>,
    tail: Option<SlotId>,
    count: usize,
}

impl ProcessQueue {
    #[must_use]
    pub const fn new(tag: QueueTag) -> Self {
        Self {
            tag,
            head: None,
            tail: None,
            count: 0,
        }
    }

    #[inline]
    #[must_use]
    pub const fn tag(&self) -> QueueTag {
        self.tag
    }

    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.count
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }

    #[inline]
    #[must_use]
    pub const fn head(&self) -> Option<SlotId> {
        self.head
    }

    /// Append `slot` at the tail.
    ///
    /// # Errors
    /// Rejects slots that are empty or already sit in some queue.
    pub fn push_back<L: QueueLinks + ?Sized>(
        &mut self,
        links: &mut L,
        slot: SlotId,
    ) -> Result<(), QueueError> {
        let link = links.link_mut(slot).ok_or(QueueError::UnknownSlot(slot))?;
        if let Some(tag) = link.tag {
            return Err(QueueError::AlreadyQueued { slot, tag });
        }
        *link = QueueLink {
            next: None,
            tag: Some(self.tag),
        };

        match self.tail {
            Some(tail) => {
                let tail = links.link_mut(tail).ok_or(QueueError::UnknownSlot(tail))?;
                tail.next = Some(slot);
            }
            None => self.head = Some(slot),
        }
        self.tail = Some(slot);
        self.count += 1;
        Ok(())
    }

    /// Detach and return the head.
    pub fn pop_front<L: QueueLinks + ?Sized>(&mut self, links: &mut L) -> Option<SlotId> {
        let head = self.head?;
        let link = links.link_mut(head)?;
        debug_assert_eq!(link.tag, Some(self.tag));
        self.head = link.next;
        *link = QueueLink::default();
        if self.head.is_none() {
            self.tail = None;
        }
        self.count -= 1;
        Some(head)
    }

    /// Unlink `slot` from anywhere in the queue.
    ///
    /// # Errors
    /// [`QueueError::NotQueued`] if the slot's link does not carry this
    /// queue's tag.
    pub fn remove<L: QueueLinks + ?Sized>(
        &mut self,
        links: &mut L,
        slot: SlotId,
    ) -> Result<(), QueueError> {
        let link = links.link(slot).ok_or(QueueError::UnknownSlot(slot))?;
        if link.tag != Some(self.tag) {
            return Err(QueueError::NotQueued(slot));
        }
        let next = link.next;

        let mut prev = None;
        let mut cursor = self.head;
        while let Some(at) = cursor {
            if at == slot {
                break;
            }
            prev = Some(at);
            cursor = links.link(at).and_then(|l| l.next);
        }
        if cursor.is_none() {
            return Err(QueueError::NotQueued(slot));
        }

        match prev {
            Some(p) => {
                if let Some(l) = links.link_mut(p) {
                    l.next = next;
                }
            }
            None => self.head = next,
        }
        if self.tail == Some(slot) {
            self.tail = prev;
        }
        if let Some(l) = links.link_mut(slot) {
            *l = QueueLink::default();
        }
        self.count -= 1;
        Ok(())
    }

    /// Whether `slot` is linked into this queue.
    #[must_use]
    pub fn contains<L: QueueLinks + ?Sized>(&self, links: &L, slot: SlotId) -> bool {
        links.link(slot).is_some_and(|l| l.tag == Some(self.tag))
    }

    /// Front-to-back walk.
    pub fn iter<'a, L: QueueLinks + ?Sized>(
        &self,
        links: &'a L,
    ) -> impl Iterator<Item = SlotId> + 'a {
        iter::successors(self.head, move |s| links.link(*s).and_then(|l| l.next))
    }
}

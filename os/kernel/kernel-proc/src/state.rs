use crate::ids::Pid;
use core::fmt;

/// Why a process is sitting in the blocked queue.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BlockReason {
    /// Suspended by [`Signal::Stop`](crate::Signal::Stop); only
    /// [`Signal::Continue`](crate::Signal::Continue) resumes it.
    Stopped,
    /// Waiting for a child to exit. `None` waits for any child.
    WaitingForChild(Option<Pid>),
}

impl BlockReason {
    /// Whether the exit of `child` satisfies this wait.
    #[must_use]
    pub fn accepts_child(self, child: Pid) -> bool {
        match self {
            Self::Stopped => false,
            Self::WaitingForChild(None) => true,
            Self::WaitingForChild(Some(pid)) => pid == child,
        }
    }
}

/// Lifecycle state of a process.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ProcessState {
    Ready,
    Running,
    Blocked(BlockReason),
    Zombie,
}

impl ProcessState {
    /// Numeric form used by the process listing ABI.
    #[must_use]
    pub const fn as_raw(self) -> u32 {
        match self {
            Self::Ready => 0,
            Self::Running => 1,
            Self::Blocked(_) => 2,
            Self::Zombie => 3,
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Blocked(BlockReason::Stopped) => "stopped",
            Self::Blocked(BlockReason::WaitingForChild(_)) => "waiting",
            Self::Zombie => "zombie",
        }
    }

    #[inline]
    #[must_use]
    pub const fn is_zombie(self) -> bool {
        matches!(self, Self::Zombie)
    }

    /// Ready or Running.
    #[inline]
    #[must_use]
    pub const fn is_runnable(self) -> bool {
        matches!(self, Self::Ready | Self::Running)
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_values() {
        assert_eq!(ProcessState::Ready.as_raw(), 0);
        assert_eq!(ProcessState::Running.as_raw(), 1);
        assert_eq!(ProcessState::Blocked(BlockReason::Stopped).as_raw(), 2);
        assert_eq!(ProcessState::Zombie.as_raw(), 3);
    }

    #[test]
    fn wait_targets() {
        let any = BlockReason::WaitingForChild(None);
        let five = BlockReason::WaitingForChild(Some(Pid::new(5)));
        assert!(any.accepts_child(Pid::new(9)));
        assert!(five.accepts_child(Pid::new(5)));
        assert!(!five.accepts_child(Pid::new(6)));
        assert!(!BlockReason::Stopped.accepts_child(Pid::new(5)));
    }
}

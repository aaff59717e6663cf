use core::fmt;
use kernel_info::process::{DEFAULT_PRIORITY, MAX_PRIORITY_LEVELS};

/// Process identifier.
///
/// PIDs are handed out sequentially starting at 1; `0` belongs to the idle
/// process.
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Pid(u32);

impl Pid {
    /// The idle process.
    pub const IDLE: Self = Self(0);

    /// First PID given to a regular process.
    pub const FIRST: Self = Self(1);

    #[inline]
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn is_idle(self) -> bool {
        self.0 == 0
    }

    /// Successor, skipping the idle PID on wrap-around.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        match self.0.checked_add(1) {
            Some(n) => Self(n),
            None => Self::FIRST,
        }
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Index of a slot in the [`ProcessTable`](crate::ProcessTable).
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct SlotId(usize);

impl SlotId {
    #[inline]
    #[must_use]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// Scheduling priority, `0` (most urgent) to `7`.
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Priority(u8);

#[allow(clippy::cast_possible_truncation)]
const LOWEST: u8 = (MAX_PRIORITY_LEVELS - 1) as u8;

impl Priority {
    pub const HIGHEST: Self = Self(0);
    pub const LOWEST: Self = Self(LOWEST);
    pub const DEFAULT: Self = Self(DEFAULT_PRIORITY);

    /// `None` if `level` is not a valid queue index.
    #[must_use]
    pub const fn new(level: u8) -> Option<Self> {
        if level <= LOWEST {
            Some(Self(level))
        } else {
            None
        }
    }

    /// Out-of-range values become [`Priority::LOWEST`].
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn clamped(level: u32) -> Self {
        if level > LOWEST as u32 {
            Self::LOWEST
        } else {
            Self(level as u8)
        }
    }

    #[inline]
    #[must_use]
    pub const fn level(self) -> u8 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// All levels, most urgent first.
    pub fn all() -> impl Iterator<Item = Self> {
        (0..=LOWEST).map(Self)
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Privilege class of a process.
#[repr(u32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ProcessType {
    /// Runs in ring 0 on the kernel's selectors.
    Kernel = 0,
    /// Privileged user-space service.
    System = 1,
    /// Regular user program.
    User = 2,
}

impl ProcessType {
    #[must_use]
    pub const fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Kernel),
            1 => Some(Self::System),
            2 => Some(Self::User),
            _ => None,
        }
    }

    /// Whether the process executes in ring 3.
    #[must_use]
    pub const fn is_user_mode(self) -> bool {
        !matches!(self, Self::Kernel)
    }
}

/// Signals understood by the kernel core.
#[repr(i32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Signal {
    /// Terminate immediately; cannot be ignored.
    Kill = 9,
    /// Polite termination request. Handled like [`Signal::Kill`] for now.
    Terminate = 15,
    /// Resume a stopped process.
    Continue = 18,
    /// Suspend until [`Signal::Continue`].
    Stop = 19,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum SignalError {
    #[error("unknown signal number {0}")]
    Unknown(i32),
}

impl Signal {
    #[inline]
    #[must_use]
    pub const fn number(self) -> i32 {
        self as i32
    }

    /// Whether delivery ends the target.
    #[must_use]
    pub const fn is_fatal(self) -> bool {
        matches!(self, Self::Kill | Self::Terminate)
    }
}

impl TryFrom<i32> for Signal {
    type Error = SignalError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            9 => Ok(Self::Kill),
            15 => Ok(Self::Terminate),
            18 => Ok(Self::Continue),
            19 => Ok(Self::Stop),
            other => Err(SignalError::Unknown(other)),
        }
    }
}

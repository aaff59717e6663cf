use kernel_proc::{Pid, Signal};

/// A privileged request that is checked before it is carried out.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Operation<'a> {
    Kill { target: Pid, signal: Signal },
    Exec { path: &'a str },
}

/// Policy hook consulted by `kill` and `exec`.
///
/// `caller` is `None` when the request does not originate from a process
/// (boot code, the idle loop).
pub trait PermissionCheck {
    fn check_permission(&self, caller: Option<Pid>, op: Operation<'_>) -> bool;
}

/// Permits everything.
#[derive(Debug, Copy, Clone, Default)]
pub struct AllowAll;

impl PermissionCheck for AllowAll {
    #[inline]
    fn check_permission(&self, _caller: Option<Pid>, _op: Operation<'_>) -> bool {
        true
    }
}

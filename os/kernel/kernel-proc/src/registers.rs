use crate::ids::ProcessType;
use kernel_info::process::INITIAL_RFLAGS;

/// Kernel code selector (GDT index 1, RPL 0).
pub const KERNEL_CS: u64 = 0x08;
/// Kernel data selector (GDT index 2, RPL 0).
pub const KERNEL_DS: u64 = 0x10;
/// User code selector (GDT index 3, RPL 3).
pub const USER_CS: u64 = 0x1b;
/// User data selector (GDT index 4, RPL 3).
pub const USER_DS: u64 = 0x23;

/// Saved CPU state of a process that is not currently running.
///
/// The layout is shared with the context-switch stub; keep it `#[repr(C)]`
/// and in this order.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct RegisterSnapshot {
    pub rax: u64,
    pub rbx: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub rbp: u64,
    pub rsp: u64,
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
    pub rip: u64,
    pub rflags: u64,
    pub cs: u64,
    pub ds: u64,
    pub es: u64,
    pub fs: u64,
    pub gs: u64,
    pub ss: u64,
}

const _: () = assert!(size_of::<RegisterSnapshot>() == 24 * 8);

impl RegisterSnapshot {
    /// Byte size of a snapshot, used to size its slab cache.
    pub const SIZE: usize = size_of::<Self>();

    /// Fresh state that starts executing at `entry` with the stack just below
    /// `stack_top`. Interrupts are enabled; selectors match `kind`.
    #[must_use]
    pub const fn for_entry(kind: ProcessType, entry: u64, stack_top: u64) -> Self {
        let (cs, ds) = if kind.is_user_mode() {
            (USER_CS, USER_DS)
        } else {
            (KERNEL_CS, KERNEL_DS)
        };
        Self {
            rax: 0,
            rbx: 0,
            rcx: 0,
            rdx: 0,
            rsi: 0,
            rdi: 0,
            rbp: 0,
            // Leave room for a fake return address, as after a `call`.
            rsp: stack_top - 8,
            r8: 0,
            r9: 0,
            r10: 0,
            r11: 0,
            r12: 0,
            r13: 0,
            r14: 0,
            r15: 0,
            rip: entry,
            rflags: INITIAL_RFLAGS,
            cs,
            ds,
            es: ds,
            fs: ds,
            gs: ds,
            ss: ds,
        }
    }

    /// Whether this state returns to ring 3.
    #[must_use]
    pub const fn is_user(&self) -> bool {
        self.cs & 3 == 3
    }
}

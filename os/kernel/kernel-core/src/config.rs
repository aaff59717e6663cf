use kernel_alloc::buddy::{MAX_BUDDY_ORDER, order_for};
use kernel_info::memory::{
    DEFAULT_BUDDY_POOL_FRAMES, KERNEL_STACK_SIZE, LOW_RESERVED_BYTES, USER_STACK_SIZE,
};
use kernel_info::process::{DEFAULT_TIME_SLICE, MAX_PROCESSES, TICK_MS, TIMER_HZ};

/// Runtime knobs of the kernel core.
///
/// Defaults come from `kernel_info`; the `with_*` setters exist mainly so
/// tests can run on a few megabytes of simulated memory.
///
/// ```rust
/// use kernel_core::KernelConfig;
///
/// let cfg = KernelConfig::new().with_max_processes(64).with_time_slice(2);
/// assert_eq!(cfg.max_processes, 64);
/// assert_eq!(cfg.kernel_stack_order(), 2);
/// ```
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct KernelConfig {
    /// Slots in the process table, the idle process included.
    pub max_processes: usize,
    /// Ticks per quantum.
    pub time_slice: u32,
    pub timer_hz: u32,
    pub tick_ms: u64,
    /// Frames moved from the bitmap into the buddy pool at boot.
    pub buddy_pool_frames: usize,
    /// Low physical memory never handed out (kernel image, boot data).
    pub low_reserved_bytes: u64,
    pub user_stack_size: u64,
    /// Must be a power of two of at least one frame.
    pub kernel_stack_size: usize,
}

const _: () = assert!(KERNEL_STACK_SIZE.is_power_of_two());

impl KernelConfig {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_processes: MAX_PROCESSES,
            time_slice: DEFAULT_TIME_SLICE,
            timer_hz: TIMER_HZ,
            tick_ms: TICK_MS,
            buddy_pool_frames: DEFAULT_BUDDY_POOL_FRAMES,
            low_reserved_bytes: LOW_RESERVED_BYTES,
            user_stack_size: USER_STACK_SIZE,
            kernel_stack_size: KERNEL_STACK_SIZE,
        }
    }

    #[must_use]
    pub const fn with_max_processes(mut self, n: usize) -> Self {
        self.max_processes = n;
        self
    }

    #[must_use]
    pub const fn with_time_slice(mut self, ticks: u32) -> Self {
        self.time_slice = ticks;
        self
    }

    #[must_use]
    pub const fn with_buddy_pool_frames(mut self, frames: usize) -> Self {
        self.buddy_pool_frames = frames;
        self
    }

    #[must_use]
    pub const fn with_low_reserved_bytes(mut self, bytes: u64) -> Self {
        self.low_reserved_bytes = bytes;
        self
    }

    #[must_use]
    pub const fn with_user_stack_size(mut self, bytes: u64) -> Self {
        self.user_stack_size = bytes;
        self
    }

    #[must_use]
    pub const fn with_kernel_stack_size(mut self, bytes: usize) -> Self {
        self.kernel_stack_size = bytes;
        self
    }

    /// Buddy order of one kernel stack.
    #[must_use]
    pub const fn kernel_stack_order(&self) -> usize {
        match order_for(self.kernel_stack_size as u64) {
            Some(order) => order,
            None => MAX_BUDDY_ORDER - 1,
        }
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self::new()
    }
}

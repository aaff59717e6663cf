//! # Process and Scheduler Limits

/// Capacity of the process table, including the idle process.
pub const MAX_PROCESSES: usize = 1024;

/// Number of ready queues. Priority `0` is the most urgent.
pub const MAX_PRIORITY_LEVELS: usize = 8;

/// Priority given to processes created without an explicit one.
pub const DEFAULT_PRIORITY: u8 = 4;

/// Priority of the idle process; it is never queued, this is informational.
pub const IDLE_PRIORITY: u8 = (MAX_PRIORITY_LEVELS - 1) as u8;

/// Timer ticks per scheduling quantum.
pub const DEFAULT_TIME_SLICE: u32 = 10;

/// Programmed timer frequency.
pub const TIMER_HZ: u32 = 100;

/// Length of one timer tick in milliseconds.
pub const TICK_MS: u64 = 1000 / TIMER_HZ as u64;

/// Open file descriptors per process.
pub const MAX_FDS_PER_PROCESS: usize = 256;

/// Longest process name kept in the PCB (bytes).
pub const MAX_PROCESS_NAME: usize = 255;

/// `RFLAGS` for a freshly started process: IF set plus the reserved bit 1.
pub const INITIAL_RFLAGS: u64 = 0x202;

const _: () = {
    assert!(MAX_PRIORITY_LEVELS <= u8::MAX as usize);
    assert!((DEFAULT_PRIORITY as usize) < MAX_PRIORITY_LEVELS);
    assert!(DEFAULT_TIME_SLICE > 0);
    assert!(TICK_MS * TIMER_HZ as u64 == 1000);
    assert!(MAX_PROCESSES > 1);
};

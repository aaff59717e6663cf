//! # Memory Layout

/// End of userspace VA range after which the canonical hole begins.
pub const USERSPACE_END: u64 = 0x0000_8000_0000_0000;

/// A simple Higher Half Direct Map (HHDM) base.
/// Anything you map at [`HHDM_BASE`] + `pa` lets the kernel
/// access physical memory via a fixed offset.
pub const HHDM_BASE: u64 = 0xffff_8880_0000_0000;

/// Where the kernel executes (VMA), matches the linker script.
pub const KERNEL_BASE: u64 = 0xffff_ffff_8000_0000;

/// Where the kernel image is placed in *physical* memory (LMA) before paging.
pub const PHYS_LOAD: u64 = 0x0010_0000; // 1 MiB

/// Low physical memory that is never handed to the frame allocator:
/// legacy low memory, the kernel image and early boot data.
pub const LOW_RESERVED_BYTES: u64 = 0x30_0000; // 3 MiB

/// First PML4 slot of the shared kernel half.
pub const KERNEL_PML4_START: usize = 256;

/// Number of entries in every paging structure.
pub const PAGE_TABLE_ENTRIES: usize = 512;

/// Default load address for user images.
pub const USER_IMAGE_BASE: u64 = 0x0000_0000_0040_0000;

/// Start of the user heap when the loader does not supply one.
pub const USER_HEAP_BASE: u64 = 0x0000_0000_4000_0000;

/// Top (exclusive) of the initial user stack.
pub const USER_STACK_TOP: u64 = 0x0000_7fff_ffff_f000;

/// Size of the initial user stack.
pub const USER_STACK_SIZE: u64 = 64 * 1024;

/// The size of a per-process kernel stack.
pub const KERNEL_STACK_SIZE: usize = 16 * 1024;

/// Frames carved out of the bitmap for the buddy allocator at boot.
pub const DEFAULT_BUDDY_POOL_FRAMES: usize = 8192; // 32 MiB

const _: () = {
    assert!(KERNEL_STACK_SIZE.is_multiple_of(4096));
    assert!(KERNEL_STACK_SIZE.is_power_of_two());
    assert!(USER_STACK_SIZE.is_multiple_of(4096));
    assert!(USER_STACK_TOP.is_multiple_of(4096));
    assert!(USER_STACK_TOP < USERSPACE_END);
    assert!(USER_STACK_TOP - USER_STACK_SIZE > USER_HEAP_BASE);
    assert!(USER_HEAP_BASE > USER_IMAGE_BASE);
    assert!(HHDM_BASE >= USERSPACE_END);
    assert!(KERNEL_BASE > HHDM_BASE);
    assert!(LOW_RESERVED_BYTES > PHYS_LOAD);
    assert!(LOW_RESERVED_BYTES.is_multiple_of(4096));
};

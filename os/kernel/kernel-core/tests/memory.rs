mod support;

use kernel_core::{KernelError, abi};
use kernel_memory_addresses::{FRAME_SIZE, PhysicalAddress, VirtualAddress};
use kernel_vmem::testing::TestPhys;
use kernel_vmem::{MapError, PageEntryBits};
use support::{FRAMES, boot, spawn};

#[test]
fn kmalloc_family_keeps_contents_and_rejects_double_free() {
    let phys = TestPhys::with_frames(FRAMES);
    let mut kernel = boot(&phys, &[]);
    let before = kernel.memory_stats();

    let small = kernel.kmalloc(48).unwrap();
    let large = kernel.kmalloc(3 * 4096).unwrap();
    unsafe {
        small.as_ptr().write_bytes(0x5a, 48);
        large.as_ptr().write_bytes(0xa5, 3 * 4096);
    }

    let zeroed = kernel.kcalloc(16, 8).unwrap();
    let bytes = unsafe { core::slice::from_raw_parts(zeroed.as_ptr(), 128) };
    assert!(bytes.iter().all(|&b| b == 0));

    let grown = kernel.krealloc(Some(small), 4000).unwrap().unwrap();
    let copied = unsafe { core::slice::from_raw_parts(grown.as_ptr(), 48) };
    assert!(copied.iter().all(|&b| b == 0x5a));
    assert!(kernel.krealloc(Some(grown), 0).unwrap().is_none());

    kernel.kfree(large).unwrap();
    kernel.kfree(zeroed).unwrap();
    assert!(matches!(kernel.kfree(zeroed), Err(KernelError::Heap(_))));

    assert_eq!(kernel.memory_stats(), before);
}

#[test]
fn heap_sentinels_at_the_syscall_surface() {
    let phys = TestPhys::with_frames(FRAMES);
    let mut kernel = boot(&phys, &[]);

    assert!(abi::kmalloc(&mut kernel, 0).is_null());
    assert!(abi::kcalloc(&mut kernel, usize::MAX, 2).is_null());
    abi::kfree(&mut kernel, core::ptr::null_mut());

    let p = abi::krealloc(&mut kernel, core::ptr::null_mut(), 100);
    assert!(!p.is_null());
    assert!(abi::krealloc(&mut kernel, p, 0).is_null());
}

#[test]
fn page_table_create_map_translate_destroy() {
    let phys = TestPhys::with_frames(FRAMES);
    let mut kernel = boot(&phys, &[]);
    let before = kernel.memory_stats();

    let root = kernel.create_page_table().unwrap();
    let kernel_root = kernel.kernel_root();
    let va = VirtualAddress::new(0x4000_0000);
    let pa = PhysicalAddress::new(0x20_0000);
    kernel.map_page(root, va, pa, PageEntryBits::user_rw()).unwrap();

    assert_eq!(
        kernel.translate(root, VirtualAddress::new(0x4000_0123)),
        Some(PhysicalAddress::new(0x20_0123))
    );
    assert_eq!(kernel.translate(kernel_root, va), None);
    assert!(matches!(
        kernel.map_page(root, va, pa, PageEntryBits::user_rw()),
        Err(KernelError::Map(MapError::AlreadyMapped(at))) if at == va
    ));
    assert!(matches!(
        kernel.map_page(root, VirtualAddress::new(0x4000_0010), pa, PageEntryBits::user_rw()),
        Err(KernelError::Map(MapError::UnalignedVirtual(_)))
    ));

    // Root plus one table per level.
    assert_eq!(kernel.destroy_page_table(root).unwrap(), 4);
    assert_eq!(kernel.memory_stats(), before);
}

#[test]
fn destroy_refuses_kernel_and_live_roots() {
    let phys = TestPhys::with_frames(FRAMES);
    let mut kernel = boot(&phys, &["/bin/a"]);
    let pid = spawn(&mut kernel, "/bin/a", 4);
    let live = kernel.process(pid).unwrap().root;

    let kernel_root = kernel.kernel_root();
    assert!(matches!(
        kernel.destroy_page_table(kernel_root),
        Err(KernelError::KernelRootProtected)
    ));
    assert!(matches!(
        kernel.destroy_page_table(live),
        Err(KernelError::RootInUse(root)) if root == live
    ));
    assert!(kernel.translate(live, VirtualAddress::new(kernel.process(pid).unwrap().entry)).is_some());

    // The ABI reports the refusal only in the log.
    abi::destroy_page_table(&mut kernel, live.base().as_u64());
    assert!(kernel.process(pid).is_some());
}

#[test]
fn page_table_sentinels_at_the_syscall_surface() {
    let phys = TestPhys::with_frames(FRAMES);
    let mut kernel = boot(&phys, &[]);

    let root = abi::create_page_table(&mut kernel);
    assert_ne!(root, 0);
    assert_eq!(root % 4096, 0);

    let flags = PageEntryBits::user_rw().into_bits();
    assert_eq!(abi::map_page(&mut kernel, root, 0x1000, 0x8000, flags), 0);
    assert_eq!(abi::map_page(&mut kernel, root, 0x1000, 0x8000, flags), -1);
    assert_eq!(abi::map_page(&mut kernel, root + 8, 0x2000, 0x8000, flags), -1);

    let before = kernel.memory_stats();
    abi::destroy_page_table(&mut kernel, root);
    assert_eq!(kernel.memory_stats().available, before.available + 4 * FRAME_SIZE);
}

#[test]
fn second_destroy_of_a_root_is_refused() {
    let phys = TestPhys::with_frames(FRAMES);
    let mut kernel = boot(&phys, &[]);
    let first = kernel.create_page_table().unwrap();
    let second = kernel.create_page_table().unwrap();
    kernel.destroy_page_table(first).unwrap();

    // The freed root frame is free to back one of these tables.
    let va = VirtualAddress::new(0x4000_0000);
    let pa = PhysicalAddress::new(0x20_0000);
    kernel.map_page(second, va, pa, PageEntryBits::user_rw()).unwrap();
    let before = kernel.memory_stats();

    assert!(matches!(
        kernel.destroy_page_table(first),
        Err(KernelError::UnknownRoot(root)) if root == first
    ));
    abi::destroy_page_table(&mut kernel, first.base().as_u64());
    assert_eq!(kernel.memory_stats(), before);
    assert_eq!(kernel.translate(second, va), Some(pa));

    assert_eq!(kernel.destroy_page_table(second).unwrap(), 4);
    assert!(matches!(
        kernel.destroy_page_table(second),
        Err(KernelError::UnknownRoot(_))
    ));
}

#[test]
fn destroy_never_frees_frames_the_caller_mapped() {
    let phys = TestPhys::with_frames(FRAMES);
    let mut kernel = boot(&phys, &[]);
    let kernel_root = kernel.kernel_root();
    let root = kernel.create_page_table().unwrap();
    let before = kernel.memory_stats();

    let flags = PageEntryBits::user_rw().with_owned(true).into_bits();
    let target = kernel_root.base().as_u64();
    assert_eq!(abi::map_page(&mut kernel, root.base().as_u64(), 0x1000, target, flags), 0);
    assert_eq!(
        kernel.translate(root, VirtualAddress::new(0x1000)),
        Some(kernel_root.base())
    );

    // Only the root and its three tables come back.
    assert_eq!(kernel.destroy_page_table(root).unwrap(), 4);
    assert_eq!(kernel.memory_stats().available, before.available + FRAME_SIZE);
    assert!(kernel.memory().frames().is_allocated(kernel_root.base()));
}

mod support;

use kernel_core::{KernelError, LoaderError};
use kernel_info::memory::USER_IMAGE_BASE;
use kernel_memory_addresses::VirtualAddress;
use kernel_proc::{Pid, ProcessState};
use kernel_vmem::AddressSpace;
use kernel_vmem::testing::TestPhys;
use support::{DenyList, FRAMES, ScriptedLoader, boot, boot_with, config, spawn};

fn read_u64(space: &AddressSpace<'_, TestPhys>, at: u64) -> u64 {
    let mut buf = [0u8; 8];
    space.read_bytes(VirtualAddress::new(at), &mut buf).unwrap();
    u64::from_le_bytes(buf)
}

fn read_cstr(space: &AddressSpace<'_, TestPhys>, at: u64) -> String {
    let mut out = Vec::new();
    let mut byte = [0u8; 1];
    let mut va = at;
    loop {
        space.read_bytes(VirtualAddress::new(va), &mut byte).unwrap();
        if byte[0] == 0 {
            return String::from_utf8(out).unwrap();
        }
        out.push(byte[0]);
        va += 1;
    }
}

#[test]
fn exec_lays_out_arguments_and_keeps_the_pid() {
    let phys = TestPhys::with_frames(FRAMES);
    let mut kernel = boot(&phys, &["/bin/sh", "/bin/echo"]);
    let pid = spawn(&mut kernel, "/bin/sh", 4);
    kernel.start().unwrap();

    kernel
        .process_exec("/bin/echo", &["echo", "hello"], &["TERM=vt100"])
        .unwrap();

    let p = kernel.process(pid).unwrap();
    assert_eq!(p.name, "/bin/echo");
    assert_eq!(kernel.current_pid(), Some(pid));
    let space = AddressSpace::from_root(&phys, p.root);

    let regs = kernel.cpu().live;
    assert_eq!(regs, kernel.saved_registers(pid).unwrap());
    assert_eq!(regs.rip, USER_IMAGE_BASE);
    assert_eq!(regs.rsp % 16, 0);
    assert_eq!(regs.rdi, 2);
    assert_eq!(read_u64(&space, regs.rsp), 2);
    assert_eq!(regs.rsi, regs.rsp + 8);
    assert_eq!(read_cstr(&space, read_u64(&space, regs.rsi)), "echo");
    assert_eq!(read_cstr(&space, read_u64(&space, regs.rsi + 8)), "hello");
    assert_eq!(read_u64(&space, regs.rsi + 16), 0);
    assert_eq!(regs.rdx, regs.rsp + 32);
    assert_eq!(read_cstr(&space, read_u64(&space, regs.rdx)), "TERM=vt100");
    assert_eq!(read_u64(&space, regs.rdx + 8), 0);

    let mut code = [0u8; 9];
    space
        .read_bytes(VirtualAddress::new(USER_IMAGE_BASE), &mut code)
        .unwrap();
    assert_eq!(&code, b"/bin/echo");
}

#[test]
fn exec_of_missing_image_kills_the_caller() {
    let phys = TestPhys::with_frames(FRAMES);
    let mut kernel = boot(&phys, &["/bin/sh"]);
    let pid = spawn(&mut kernel, "/bin/sh", 4);
    kernel.start().unwrap();

    let err = kernel.process_exec("/bin/nope", &[], &[]).unwrap_err();
    assert!(matches!(err, KernelError::Loader(LoaderError::NotFound)));
    assert!(kernel.process(pid).is_none(), "parentless, so reaped");
    assert_eq!(kernel.current_pid(), Some(Pid::IDLE));
}

#[test]
fn failed_exec_leaves_zombie_for_the_parent() {
    let phys = TestPhys::with_frames(FRAMES);
    let mut kernel = boot(&phys, &["/bin/sh"]);
    spawn(&mut kernel, "/bin/sh", 4);
    kernel.start().unwrap();
    let child = kernel.process_fork().unwrap();
    kernel.yield_now().unwrap();
    assert_eq!(kernel.current_pid(), Some(child));

    assert!(kernel.process_exec("/bin/nope", &["x"], &[]).is_err());
    let zombie = kernel.process(child).unwrap();
    assert_eq!(zombie.state, ProcessState::Zombie);
    assert_eq!(zombie.exit_code, -1);
}

#[test]
fn refused_exec_keeps_the_old_image() {
    let phys = TestPhys::with_frames(FRAMES);
    let mut kernel = boot_with(
        &phys,
        config().with_user_stack_size(4096),
        ScriptedLoader::with(&["/bin/sh", "/bin/su"]),
        DenyList {
            kill: Vec::new(),
            exec: vec!["/bin/su"],
        },
    );
    let pid = spawn(&mut kernel, "/bin/sh", 4);
    kernel.start().unwrap();
    let pages = {
        let root = kernel.process(pid).unwrap().root;
        AddressSpace::from_root(&phys, root).user_page_count()
    };

    assert!(matches!(
        kernel.process_exec("/bin/su", &[], &[]),
        Err(KernelError::PermissionDenied)
    ));
    let huge = "x".repeat(8192);
    assert!(matches!(
        kernel.process_exec("/bin/sh", &[huge.as_str()], &[]),
        Err(KernelError::ArgumentsTooLarge)
    ));

    let p = kernel.process(pid).unwrap();
    assert_eq!(p.state, ProcessState::Running);
    assert_eq!(p.name, "/bin/sh");
    assert_eq!(AddressSpace::from_root(&phys, p.root).user_page_count(), pages);
}

#[test]
fn exec_from_idle_is_rejected() {
    let phys = TestPhys::with_frames(FRAMES);
    let mut kernel = boot(&phys, &["/bin/sh"]);
    assert!(matches!(
        kernel.process_exec("/bin/sh", &[], &[]),
        Err(KernelError::NoCurrentProcess)
    ));
    assert!(matches!(
        kernel.process_fork(),
        Err(KernelError::NoCurrentProcess)
    ));
}

mod support;

use kernel_core::{ErrorKind, KernelError, LoaderError, WaitOutcome, abi};
use kernel_memory_addresses::VirtualAddress;
use kernel_proc::{BlockReason, Pid, Priority, ProcessState, ProcessType, Signal};
use kernel_vmem::testing::TestPhys;
use support::{FRAMES, ScriptedLoader, audit, boot, boot_with, config, spawn};

#[test]
fn boot_leaves_idle_current() {
    let phys = TestPhys::with_frames(FRAMES);
    let kernel = boot(&phys, &[]);

    assert_eq!(kernel.current_pid(), Some(Pid::IDLE));
    let list = kernel.process_list();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].name, "idle");
    assert_eq!(list[0].state, ProcessState::Running);
    audit(&kernel);
}

#[test]
fn create_maps_image_and_user_stack() {
    let phys = TestPhys::with_frames(FRAMES);
    let mut kernel = boot(&phys, &["/bin/init"]);

    let pid = spawn(&mut kernel, "/bin/init", 3);
    assert_eq!(pid, Pid::FIRST);

    let p = kernel.process(pid).unwrap();
    assert_eq!(p.state, ProcessState::Ready);
    assert_eq!(p.ppid, None);
    assert_eq!(p.name, "/bin/init");
    assert_eq!(p.priority, Priority::new(3).unwrap());
    let stack = p.user_stack.unwrap();
    assert!(kernel.translate(p.root, stack.base).is_some());
    assert!(kernel.translate(p.root, VirtualAddress::new(p.entry)).is_some());

    let regs = kernel.saved_registers(pid).unwrap();
    assert_eq!(regs.rip, p.entry);
    assert_eq!(regs.rsp, stack.top().as_u64() - 8);
    assert!(regs.is_user());
    audit(&kernel);
}

#[test]
fn kernel_processes_run_on_their_kernel_stack() {
    let phys = TestPhys::with_frames(FRAMES);
    let mut kernel = boot(&phys, &["/sbin/kworker"]);

    let pid = kernel
        .process_create("/sbin/kworker", Priority::HIGHEST, ProcessType::Kernel)
        .unwrap();
    let p = kernel.process(pid).unwrap();
    assert!(p.user_stack.is_none());
    assert!(!kernel.saved_registers(pid).unwrap().is_user());
}

#[test]
fn failed_create_releases_everything() {
    let phys = TestPhys::with_frames(FRAMES);
    let loader = ScriptedLoader::with(&[]).broken("/bin/corrupt");
    let mut kernel = boot_with(&phys, config(), loader, Default::default());
    let before = kernel.memory_stats();
    let buddy_before = kernel.memory().heap().buddy().free_frames();

    let err = kernel
        .process_create("/bin/corrupt", Priority::DEFAULT, ProcessType::User)
        .unwrap_err();
    assert!(matches!(err, KernelError::Loader(LoaderError::InvalidImage)));
    let err = kernel
        .process_create("/bin/missing", Priority::DEFAULT, ProcessType::User)
        .unwrap_err();
    assert!(matches!(err, KernelError::Loader(LoaderError::NotFound)));

    assert_eq!(kernel.memory_stats(), before);
    assert_eq!(kernel.memory().heap().buddy().free_frames(), buddy_before);
    assert_eq!(kernel.table().len(), 1);
}

#[test]
fn full_table_is_resource_exhaustion() {
    let phys = TestPhys::with_frames(FRAMES);
    let mut kernel = boot_with(
        &phys,
        config().with_max_processes(3),
        ScriptedLoader::with(&["/bin/a"]),
        Default::default(),
    );
    spawn(&mut kernel, "/bin/a", 4);
    spawn(&mut kernel, "/bin/a", 4);

    let err = kernel
        .process_create("/bin/a", Priority::DEFAULT, ProcessType::User)
        .unwrap_err();
    assert!(matches!(err, KernelError::ProcessTableFull));
    assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
}

#[test]
fn fork_then_exit_then_wait_collects_status() {
    let phys = TestPhys::with_frames(FRAMES);
    let mut kernel = boot(&phys, &["/bin/filler", "/bin/parent"]);

    // Burn pids 1..=9 so the parent becomes pid 10.
    for _ in 0..9 {
        let pid = spawn(&mut kernel, "/bin/filler", 4);
        kernel.process_kill(pid, Signal::Kill).unwrap();
        assert!(kernel.process(pid).is_none(), "parentless zombie reaped at once");
    }
    let parent = spawn(&mut kernel, "/bin/parent", 4);
    assert_eq!(parent, Pid::new(10));

    kernel.start().unwrap();
    assert_eq!(kernel.current_pid(), Some(parent));
    kernel.cpu_mut().live.rbx = 0xfeed;

    let child = kernel.process_fork().unwrap();
    assert_eq!(child, Pid::new(11));
    let regs = kernel.saved_registers(child).unwrap();
    assert_eq!(regs.rax, 0);
    assert_eq!(regs.rbx, 0xfeed);
    assert_eq!(kernel.process(child).unwrap().ppid, Some(parent));

    // Child runs and exits before the parent waits.
    assert_eq!(support::run_until_switch(&mut kernel), child);
    kernel.process_exit(42).unwrap();
    assert_eq!(kernel.current_pid(), Some(parent));
    assert_eq!(kernel.process(child).unwrap().state, ProcessState::Zombie);
    audit(&kernel);

    let outcome = kernel.process_wait(Some(child)).unwrap();
    assert_eq!(
        outcome,
        WaitOutcome::Reaped {
            pid: child,
            status: 42
        }
    );
    assert!(kernel.process(child).is_none());
    assert_eq!(kernel.table().len(), 2);
    audit(&kernel);
}

#[test]
fn blocked_wait_is_completed_by_child_exit() {
    let phys = TestPhys::with_frames(FRAMES);
    let mut kernel = boot(&phys, &["/bin/parent"]);
    let parent = spawn(&mut kernel, "/bin/parent", 4);
    kernel.start().unwrap();

    let child = kernel.process_fork().unwrap();
    assert_eq!(kernel.process_wait(None).unwrap(), WaitOutcome::Blocked);
    assert_eq!(
        kernel.process(parent).unwrap().state,
        ProcessState::Blocked(BlockReason::WaitingForChild(None))
    );
    assert_eq!(kernel.current_pid(), Some(child));

    kernel.process_exit(7).unwrap();
    assert_eq!(kernel.current_pid(), Some(parent));
    assert!(kernel.process(child).is_none(), "reaped after the switch");
    assert_eq!(kernel.cpu().live.rax, u64::from(child.as_u32()));
    assert_eq!(kernel.take_wait_result(), Some((child, 7)));
    assert_eq!(kernel.take_wait_result(), None);
    audit(&kernel);
}

#[test]
fn wait_rejects_strangers_and_the_childless() {
    let phys = TestPhys::with_frames(FRAMES);
    let mut kernel = boot(&phys, &["/bin/a", "/bin/b"]);
    spawn(&mut kernel, "/bin/a", 2);
    let other = spawn(&mut kernel, "/bin/b", 3);
    kernel.start().unwrap();

    assert!(matches!(
        kernel.process_wait(None),
        Err(KernelError::NoChildren)
    ));
    assert!(matches!(
        kernel.process_wait(Some(other)),
        Err(KernelError::NotAChild(pid)) if pid == other
    ));
    assert_eq!(kernel.process(other).unwrap().state, ProcessState::Ready);
    audit(&kernel);
}

#[test]
fn orphans_are_reaped_when_they_exit() {
    let phys = TestPhys::with_frames(FRAMES);
    let mut kernel = boot(&phys, &["/bin/parent"]);
    let parent = spawn(&mut kernel, "/bin/parent", 4);
    kernel.start().unwrap();
    let child = kernel.process_fork().unwrap();

    kernel.process_exit(0).unwrap();
    assert!(kernel.process(parent).is_none());
    assert_eq!(kernel.current_pid(), Some(child));
    assert_eq!(kernel.process(child).unwrap().ppid, None);

    kernel.process_exit(3).unwrap();
    assert!(kernel.process(child).is_none());
    assert_eq!(kernel.current_pid(), Some(Pid::IDLE));
    assert_eq!(kernel.table().len(), 1);
    audit(&kernel);
}

#[test]
fn exit_and_reap_return_all_memory() {
    let phys = TestPhys::with_frames(FRAMES);
    let mut kernel = boot(&phys, &["/bin/parent"]);
    let before = kernel.memory_stats();
    let buddy_before = kernel.memory().heap().buddy().free_frames();

    spawn(&mut kernel, "/bin/parent", 4);
    kernel.start().unwrap();
    let child = kernel.process_fork().unwrap();
    kernel.process_kill(child, Signal::Terminate).unwrap();
    assert_eq!(
        kernel.process_wait(Some(child)).unwrap(),
        WaitOutcome::Reaped {
            pid: child,
            status: -15
        }
    );
    kernel.process_exit(0).unwrap();

    assert_eq!(kernel.current_pid(), Some(Pid::IDLE));
    assert_eq!(kernel.memory_stats(), before);
    assert_eq!(kernel.memory().heap().buddy().free_frames(), buddy_before);
}

#[test]
fn process_calls_fold_errors_into_sentinels() {
    let phys = TestPhys::with_frames(FRAMES);
    let mut kernel = boot(&phys, &["/bin/sh"]);

    assert_eq!(abi::process_create(&mut kernel, "/bin/sh", 2, 9), 0);
    assert_eq!(abi::process_create(&mut kernel, "/bin/none", 2, 2), 0);
    assert_eq!(abi::process_fork(&mut kernel), 0, "idle cannot fork");

    let pid = abi::process_create(&mut kernel, "/bin/sh", 200, 2);
    assert_eq!(pid, 1);
    let p = kernel.process(Pid::new(pid)).unwrap();
    assert_eq!(p.priority, Priority::LOWEST);

    assert_eq!(abi::process_kill(&mut kernel, pid, 4), -1);
    assert_eq!(abi::process_kill(&mut kernel, 77, 9), -1);
    assert_eq!(kernel.process(Pid::new(pid)).unwrap().state, ProcessState::Ready);

    kernel.start().unwrap();
    let mut status = 123;
    assert_eq!(abi::process_wait(&mut kernel, 0, &mut status), 0);
    assert_eq!(status, 123, "untouched when there is nothing to collect");

    let child = abi::process_fork(&mut kernel);
    assert_eq!(abi::process_kill(&mut kernel, child, 15), 0);
    assert_eq!(abi::process_wait(&mut kernel, child, &mut status), child);
    assert_eq!(status, -15);
    assert_eq!(abi::process_exec(&mut kernel, "/bin/missing", &[], &[]), -1);
    assert_eq!(kernel.current_pid(), Some(Pid::IDLE));
}

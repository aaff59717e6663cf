use kernel_memory_addresses::{PhysicalAddress, PhysicalFrame};
use kernel_proc::{KernelStack, Pid, Priority, Process, ProcessTable, ProcessType, SlotId};
use kernel_sched::Scheduler;
use std::collections::HashMap;

fn process(pid: Pid, level: u8) -> Process {
    Process::new(
        pid,
        None,
        "worker",
        ProcessType::User,
        Priority::new(level).unwrap(),
        PhysicalAddress::zero(),
        PhysicalFrame::from_index(0),
        KernelStack {
            base: PhysicalAddress::zero(),
            order: 0,
        },
    )
}

fn setup(n: usize, level: u8) -> (ProcessTable, Scheduler, Vec<SlotId>) {
    let mut table = ProcessTable::new(64);
    let idle = table.insert_idle(|pid| process(pid, 7)).unwrap();
    let mut sched = Scheduler::new(2);
    sched.set_idle(idle);

    let slots: Vec<_> = (0..n)
        .map(|_| table.insert_with(|pid| process(pid, level)).unwrap().0)
        .collect();
    for &s in &slots {
        sched.enqueue(&mut table, s).unwrap();
    }
    (table, sched, slots)
}

/// Drive the timer until `dispatches` switches happened, returning the pids
/// in dispatch order.
fn run(table: &mut ProcessTable, sched: &mut Scheduler, dispatches: usize) -> Vec<u32> {
    let mut order = Vec::new();
    if let Some(sw) = sched.schedule(table).unwrap() {
        order.push(table.get(sw.to).unwrap().pid.as_u32());
    }
    while order.len() < dispatches {
        if sched.tick(table, 10) {
            if let Some(sw) = sched.schedule(table).unwrap() {
                order.push(table.get(sw.to).unwrap().pid.as_u32());
            }
        }
        sched.audit(table).unwrap();
    }
    order
}

#[test]
fn three_processes_at_priority_two_round_robin() {
    let (mut table, mut sched, _) = setup(3, 2);
    let order = run(&mut table, &mut sched, 7);
    assert_eq!(order, [1, 2, 3, 1, 2, 3, 1]);
}

#[test]
fn everyone_runs_once_before_anyone_runs_twice() {
    let n = 9;
    let (mut table, mut sched, slots) = setup(n, 4);
    let order = run(&mut table, &mut sched, n * 3);

    for round in order.chunks(n) {
        let mut seen: HashMap<u32, usize> = HashMap::new();
        for pid in round {
            *seen.entry(*pid).or_default() += 1;
        }
        assert_eq!(seen.len(), n);
        assert!(seen.values().all(|&c| c == 1));
    }

    // Equal slices, equal time.
    let times: Vec<_> = slots
        .iter()
        .map(|&s| table.get(s).unwrap().cpu_time_ms)
        .collect();
    assert!(times.windows(2).all(|w| w[0].abs_diff(w[1]) <= 20));
}

#[test]
fn lower_levels_starve_while_higher_ones_run() {
    let mut table = ProcessTable::new(8);
    let mut sched = Scheduler::new(1);
    let busy = table.insert_with(|pid| process(pid, 0)).unwrap().0;
    let starved = table.insert_with(|pid| process(pid, 3)).unwrap().0;
    sched.enqueue(&mut table, busy).unwrap();
    sched.enqueue(&mut table, starved).unwrap();

    sched.schedule(&mut table).unwrap();
    for _ in 0..50 {
        assert!(sched.tick(&mut table, 10));
        assert_eq!(sched.schedule(&mut table).unwrap(), None);
    }
    assert_eq!(sched.current(), Some(busy));
    assert_eq!(table.get(starved).unwrap().cpu_time_ms, 0);
}

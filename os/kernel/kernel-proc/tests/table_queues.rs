use kernel_memory_addresses::{PhysicalAddress, PhysicalFrame};
use kernel_proc::{
    KernelStack, Pid, Priority, Process, ProcessQueue, ProcessTable, ProcessType, QueueError,
    QueueTag, SlotId,
};

fn spawn(table: &mut ProcessTable, name: &str) -> (SlotId, Pid) {
    table
        .insert_with(|pid| {
            Process::new(
                pid,
                None,
                name,
                ProcessType::User,
                Priority::new(2).unwrap(),
                PhysicalAddress::zero(),
                PhysicalFrame::from_index(0),
                KernelStack {
                    base: PhysicalAddress::zero(),
                    order: 0,
                },
            )
        })
        .unwrap()
}

#[test]
fn queues_link_through_the_table() {
    let mut table = ProcessTable::new(16);
    let mut ready = ProcessQueue::new(QueueTag::Ready(Priority::new(2).unwrap()));
    let slots: Vec<_> = ["a", "b", "c"]
        .into_iter()
        .map(|n| spawn(&mut table, n).0)
        .collect();

    for &s in &slots {
        ready.push_back(&mut table, s).unwrap();
        assert!(table.get(s).unwrap().is_queued());
    }
    let names: Vec<_> = ready
        .iter(&table)
        .map(|s| table.get(s).unwrap().name.clone())
        .collect();
    assert_eq!(names, ["a", "b", "c"]);

    let first = ready.pop_front(&mut table).unwrap();
    assert!(!table.get(first).unwrap().is_queued());
    assert_eq!(ready.len(), 2);
}

#[test]
fn moving_between_queues_needs_a_removal() {
    let mut table = ProcessTable::new(4);
    let mut ready = ProcessQueue::new(QueueTag::Ready(Priority::HIGHEST));
    let mut blocked = ProcessQueue::new(QueueTag::Blocked);
    let (slot, _) = spawn(&mut table, "p");

    ready.push_back(&mut table, slot).unwrap();
    assert!(matches!(
        blocked.push_back(&mut table, slot),
        Err(QueueError::AlreadyQueued { .. })
    ));

    ready.remove(&mut table, slot).unwrap();
    blocked.push_back(&mut table, slot).unwrap();
    assert!(blocked.contains(&table, slot));
    assert!(ready.is_empty());

    blocked.remove(&mut table, slot).unwrap();
    assert!(table.remove(slot).is_some());
    assert!(table.is_empty());
}

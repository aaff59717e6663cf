use kernel_sync::{InterruptControl, IrqGuard, IrqSpinLock};
use std::cell::{Cell, RefCell};

/// Fake interrupt flag that records every transition.
#[derive(Default)]
struct FakeIrq {
    enabled: Cell<bool>,
    events: RefCell<Vec<&'static str>>,
}

impl FakeIrq {
    fn enabled() -> Self {
        let irq = Self::default();
        irq.enabled.set(true);
        irq
    }
}

impl InterruptControl for FakeIrq {
    fn interrupts_enabled(&self) -> bool {
        self.enabled.get()
    }

    fn disable_interrupts(&self) {
        self.enabled.set(false);
        self.events.borrow_mut().push("cli");
    }

    fn enable_interrupts(&self) {
        self.enabled.set(true);
        self.events.borrow_mut().push("sti");
    }
}

#[test]
fn guard_masks_and_restores() {
    let irq = FakeIrq::enabled();
    {
        let _g = IrqGuard::new(&irq);
        assert!(!irq.interrupts_enabled());
    }
    assert!(irq.interrupts_enabled());
    assert_eq!(*irq.events.borrow(), ["cli", "sti"]);
}

#[test]
fn nested_guards_restore_only_once() {
    let irq = FakeIrq::enabled();
    {
        let _outer = IrqGuard::new(&irq);
        {
            let _inner = IrqGuard::new(&irq);
        }
        // inner guard saw interrupts already masked and must not unmask
        assert!(!irq.interrupts_enabled());
    }
    assert!(irq.interrupts_enabled());
    assert_eq!(*irq.events.borrow(), ["cli", "sti"]);
}

#[test]
fn guard_leaves_masked_state_alone() {
    let irq = FakeIrq::default();
    {
        let _g = IrqGuard::new(&irq);
    }
    assert!(!irq.interrupts_enabled());
    assert!(irq.events.borrow().is_empty());
}

#[test]
fn lock_irq_masks_for_the_critical_section() {
    let irq = FakeIrq::enabled();
    let lock = IrqSpinLock::new(Vec::<u32>::new());

    {
        let mut g = lock.lock_irq(&irq);
        assert!(!irq.interrupts_enabled());
        assert!(lock.is_locked());
        g.push(7);
    }

    assert!(!lock.is_locked());
    assert!(irq.interrupts_enabled());
    assert_eq!(lock.with_lock_irq(&irq, |v| v.clone()), vec![7]);
}

#[test]
fn get_mut_bypasses_the_lock() {
    let mut lock = IrqSpinLock::new(1u64);
    *lock.get_mut() += 1;
    assert_eq!(lock.into_inner(), 2);
}

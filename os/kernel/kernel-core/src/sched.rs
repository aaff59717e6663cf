//! Dispatching: the scheduler's decisions applied to the CPU.

use crate::cpu::Cpu;
use crate::error::KernelError;
use crate::kernel::Kernel;
use crate::loader::ExecutableLoader;
use crate::security::PermissionCheck;
use kernel_proc::{RegisterSnapshot, SlotId};
use kernel_sched::StateViolation;
use kernel_vmem::PhysMapper;
use log::{info, trace};

impl<M, C, L, P> Kernel<'_, M, C, L, P>
where
    M: PhysMapper,
    C: Cpu,
    L: ExecutableLoader,
    P: PermissionCheck,
{
    /// Run the scheduler and switch to its pick.
    ///
    /// # Errors
    /// Only on corrupted queue links.
    pub fn schedule(&mut self) -> Result<(), KernelError> {
        if let Some(switch) = self.scheduler.schedule(&mut self.table)? {
            self.context_switch(switch.from, switch.to)?;
        }
        self.finish_deferred_reap();
        Ok(())
    }

    /// Save `from`, restore `to`, activate its address space and point the
    /// trap return path at its kernel stack. No policy.
    pub(crate) fn context_switch(
        &mut self,
        from: Option<SlotId>,
        to: SlotId,
    ) -> Result<(), KernelError> {
        let mapper = self.memory.mapper();

        if let Some(prev) = from.and_then(|s| self.table.get(s)) {
            // SAFETY: the context object is owned by `prev` and nothing else
            // references it during the switch.
            let regs = unsafe { mapper.phys_to_mut::<RegisterSnapshot>(prev.context) };
            self.cpu.save_context(regs);
        }

        let (context, root, stack) = self
            .table
            .get(to)
            .map(|p| (p.context, p.root, p.kernel_stack))
            .ok_or(StateViolation::DanglingCurrent(to))?;
        let top = self.kernel_stack_top(stack);

        // SAFETY: as above, for `to`.
        let regs = unsafe { mapper.phys_to_mut::<RegisterSnapshot>(context) };
        self.cpu.restore_context(regs);
        self.cpu.activate_root(root);
        self.cpu.set_kernel_stack(top);
        trace!("switched to slot {} (root {root})", to.index());
        Ok(())
    }

    /// A process that died on its own stack is freed once the CPU left it.
    fn finish_deferred_reap(&mut self) {
        let Some(slot) = self.deferred_reap else {
            return;
        };
        if self.scheduler.current() != Some(slot) {
            self.deferred_reap = None;
            self.reap(slot);
        }
    }

    /// Timer interrupt: advance the clock, charge the current process and
    /// preempt it if needed.
    ///
    /// # Errors
    /// Only on corrupted queue links.
    pub fn timer_tick(&mut self) -> Result<(), KernelError> {
        self.ticks += 1;
        if self.scheduler.tick(&mut self.table, self.config.tick_ms) {
            self.schedule()?;
        }
        Ok(())
    }

    /// Give up the rest of the quantum to the next process at the same or
    /// higher priority.
    ///
    /// # Errors
    /// Only on corrupted queue links.
    pub fn yield_now(&mut self) -> Result<(), KernelError> {
        self.scheduler.request_resched();
        self.schedule()
    }

    /// Arm the timer, dispatch the most urgent ready process and unmask
    /// interrupts. The boot context is saved as the idle process.
    ///
    /// # Errors
    /// Only on corrupted queue links.
    pub fn start(&mut self) -> Result<(), KernelError> {
        self.cpu.arm_timer(self.config.timer_hz);
        self.schedule()?;
        self.cpu.enable_interrupts();
        info!(
            "scheduler started at {} Hz, {} ready",
            self.config.timer_hz,
            self.scheduler.ready_count()
        );
        Ok(())
    }

    /// [`start`](Self::start), then idle forever.
    ///
    /// Use this when the platform's [`Cpu::wait_for_interrupt`] dispatches
    /// interrupts itself. With the kernel behind a lock, use
    /// [`entry::scheduler_start`](crate::entry::scheduler_start) instead.
    ///
    /// # Panics
    /// If the ready queues are corrupted at start.
    pub fn scheduler_start(&mut self) -> ! {
        if let Err(e) = self.start() {
            panic!("scheduler start failed: {e}");
        }
        loop {
            self.cpu.wait_for_interrupt();
        }
    }
}

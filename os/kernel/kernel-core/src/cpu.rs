use kernel_memory_addresses::{PhysicalFrame, VirtualAddress};
use kernel_proc::RegisterSnapshot;

/// The privileged CPU operations the core needs.
///
/// On hardware, the trap entry stub pushes the interrupted registers onto the
/// kernel stack; [`save_context`](Cpu::save_context) copies them out of that
/// frame and [`restore_context`](Cpu::restore_context) overwrites it, so the
/// final `iretq` resumes whichever process was restored last.
pub trait Cpu {
    /// Copy the interrupted register state into `regs`.
    fn save_context(&mut self, regs: &mut RegisterSnapshot);

    /// Make `regs` the state the trap return resumes.
    fn restore_context(&mut self, regs: &RegisterSnapshot);

    /// Load `root` into CR3.
    fn activate_root(&mut self, root: PhysicalFrame);

    /// Stack the CPU switches to on the next ring 3 → ring 0 transition
    /// (`TSS.rsp0`).
    fn set_kernel_stack(&mut self, top: VirtualAddress);

    /// Program the periodic timer.
    fn arm_timer(&mut self, hz: u32);

    fn enable_interrupts(&mut self);

    /// Halt until the next interrupt (`sti; hlt`).
    fn wait_for_interrupt(&mut self);
}

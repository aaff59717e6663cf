use crate::config::KernelConfig;
use crate::cpu::Cpu;
use crate::error::KernelError;
use crate::loader::ExecutableLoader;
use crate::security::{AllowAll, PermissionCheck};
use alloc::vec::Vec;
use kernel_alloc::KernelMemory;
use kernel_alloc::buddy::block_bytes;
use kernel_alloc::slab::CacheId;
use kernel_info::boot::MemoryRegion;
use kernel_memory_addresses::{PhysicalAddress, PhysicalFrame, VirtualAddress};
use kernel_proc::{
    KernelStack, Pid, Priority, Process, ProcessInfo, ProcessTable, ProcessType, RegisterSnapshot,
    SlotId,
};
use kernel_sched::Scheduler;
use kernel_vmem::{AddressSpace, PhysMapper};
use log::info;

/// Objects per slab of the register-context cache.
const CONTEXTS_PER_SLAB: usize = 16;

/// What the bootloader hands over.
#[derive(Debug, Copy, Clone)]
pub struct BootInfo<'a> {
    pub memory_map: &'a [MemoryRegion],
    /// The PML4 active at handover. Its kernel half (kernel image, direct
    /// map) is carried over into the kernel root.
    pub bootstrap_root: Option<PhysicalFrame>,
}

/// The whole kernel core state.
///
/// There are no globals: every operation goes through `&mut Kernel`, and the
/// trap layer serializes access with an interrupt-masking lock (see
/// [`entry`](crate::entry)).
pub struct Kernel<'m, M, C, L, P = AllowAll>
where
    M: PhysMapper,
    C: Cpu,
    L: ExecutableLoader,
    P: PermissionCheck,
{
    pub(crate) config: KernelConfig,
    pub(crate) memory: KernelMemory<'m, M>,
    pub(crate) kernel_root: PhysicalFrame,
    pub(crate) context_cache: CacheId,
    pub(crate) table: ProcessTable,
    pub(crate) scheduler: Scheduler,
    pub(crate) cpu: C,
    pub(crate) loader: L,
    pub(crate) permissions: P,
    pub(crate) ticks: u64,
    /// A dead process whose kernel stack was still in use; reaped after the
    /// next switch away from it.
    pub(crate) deferred_reap: Option<SlotId>,
    /// Roots handed out by `create_page_table` and not yet destroyed.
    pub(crate) page_tables: Vec<PhysicalFrame>,
}

impl<'m, M, C, L, P> Kernel<'m, M, C, L, P>
where
    M: PhysMapper,
    C: Cpu,
    L: ExecutableLoader,
    P: PermissionCheck,
{
    /// Bring up memory management, the kernel page table and the idle
    /// process. The idle process is current when this returns.
    ///
    /// # Errors
    /// [`KernelError::MemoryInit`] if the allocators cannot be set up.
    ///
    /// # Panics
    /// If the kernel page table cannot be built or the idle process cannot be
    /// created. Neither is recoverable.
    pub fn boot(
        mapper: &'m M,
        boot: BootInfo<'_>,
        config: KernelConfig,
        cpu: C,
        loader: L,
        permissions: P,
    ) -> Result<Self, KernelError> {
        let mut memory = KernelMemory::init(
            mapper,
            boot.memory_map,
            config.low_reserved_bytes,
            config.buddy_pool_frames,
        )?;
        let kernel_root = build_kernel_root(mapper, &mut memory, boot.bootstrap_root);
        let context_cache = memory.heap_mut().slab_mut().create_cache(
            "task_context",
            RegisterSnapshot::SIZE,
            CONTEXTS_PER_SLAB,
        )?;

        let mut kernel = Self {
            config,
            memory,
            kernel_root,
            context_cache,
            table: ProcessTable::new(config.max_processes),
            scheduler: Scheduler::new(config.time_slice),
            cpu,
            loader,
            permissions,
            ticks: 0,
            deferred_reap: None,
            page_tables: Vec::new(),
        };
        kernel.spawn_idle();

        let stats = kernel.memory.stats();
        info!(
            "kernel core up: {} KiB free of {} KiB, {} process slots, kernel root {kernel_root}",
            stats.available / 1024,
            stats.total / 1024,
            config.max_processes
        );
        Ok(kernel)
    }

    fn spawn_idle(&mut self) {
        let order = self.config.kernel_stack_order();
        let Ok(base) = self.memory.heap_mut().buddy_mut().alloc(order) else {
            panic!("no kernel stack for the idle process");
        };
        let Ok(context) = self.memory.heap_mut().alloc_object(self.context_cache) else {
            panic!("no register context for the idle process");
        };
        let stack = KernelStack { base, order };
        let top = self.kernel_stack_top(stack);
        *self.registers(context) = RegisterSnapshot::for_entry(ProcessType::Kernel, 0, top.as_u64());

        let root = self.kernel_root;
        let Ok(slot) = self.table.insert_idle(|pid| {
            Process::new(
                pid,
                None,
                "idle",
                ProcessType::Kernel,
                Priority::LOWEST,
                context,
                root,
                stack,
            )
        }) else {
            panic!("no process slot for the idle process");
        };
        self.scheduler.set_idle(slot);

        // The boot thread becomes the idle process; nothing to switch.
        if let Err(e) = self.scheduler.schedule(&mut self.table) {
            panic!("cannot dispatch the idle process: {e}");
        }
    }

    #[must_use]
    pub const fn config(&self) -> &KernelConfig {
        &self.config
    }

    #[must_use]
    pub const fn memory(&self) -> &KernelMemory<'m, M> {
        &self.memory
    }

    #[must_use]
    pub const fn kernel_root(&self) -> PhysicalFrame {
        self.kernel_root
    }

    #[must_use]
    pub const fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    #[must_use]
    pub const fn table(&self) -> &ProcessTable {
        &self.table
    }

    #[must_use]
    pub const fn cpu(&self) -> &C {
        &self.cpu
    }

    pub const fn cpu_mut(&mut self) -> &mut C {
        &mut self.cpu
    }

    #[must_use]
    pub const fn loader(&self) -> &L {
        &self.loader
    }

    pub const fn loader_mut(&mut self) -> &mut L {
        &mut self.loader
    }

    /// PID of the running process. The idle process reports [`Pid::IDLE`].
    #[must_use]
    pub fn current_pid(&self) -> Option<Pid> {
        self.scheduler
            .current()
            .and_then(|s| self.table.get(s))
            .map(|p| p.pid)
    }

    #[must_use]
    pub fn process(&self, pid: Pid) -> Option<&Process> {
        self.table.find(pid).ok().map(|(_, p)| p)
    }

    /// Copy of the saved registers of `pid`.
    #[must_use]
    pub fn saved_registers(&self, pid: Pid) -> Option<RegisterSnapshot> {
        let context = self.process(pid)?.context;
        // SAFETY: context objects stay allocated for the lifetime of the PCB.
        Some(unsafe { *self.memory.mapper().phys_to_mut::<RegisterSnapshot>(context) })
    }

    /// One entry per live process, in slot order.
    #[must_use]
    pub fn process_list(&self) -> Vec<ProcessInfo> {
        self.table.iter().map(|(_, p)| p.info()).collect()
    }

    /// Milliseconds since boot, by timer ticks.
    #[must_use]
    pub const fn system_time(&self) -> u64 {
        self.ticks * self.config.tick_ms
    }

    /// Saved register state behind a context object.
    pub(crate) fn registers(&mut self, context: PhysicalAddress) -> &mut RegisterSnapshot {
        // SAFETY: each context object belongs to exactly one PCB, lives until
        // that PCB is reaped, and is only reached through `&mut self`.
        unsafe { self.memory.mapper().phys_to_mut(context) }
    }

    pub(crate) fn kernel_stack_top(&self, stack: KernelStack) -> VirtualAddress {
        self.memory
            .mapper()
            .phys_to_virt(stack.base + block_bytes(stack.order))
    }

    pub(crate) fn address_space(&self, root: PhysicalFrame) -> AddressSpace<'m, M> {
        AddressSpace::from_root(self.memory.mapper(), root)
    }

    /// Current process, unless it is idle.
    pub(crate) fn current_user_slot(&self) -> Result<SlotId, KernelError> {
        self.scheduler
            .current()
            .filter(|&s| Some(s) != self.scheduler.idle())
            .ok_or(KernelError::NoCurrentProcess)
    }
}

/// Create the kernel root: the bootstrap kernel half, plus a PDPT for every
/// remaining kernel slot so later kernel mappings reach all processes.
fn build_kernel_root<M: PhysMapper>(
    mapper: &M,
    memory: &mut KernelMemory<'_, M>,
    bootstrap: Option<PhysicalFrame>,
) -> PhysicalFrame {
    let space = match AddressSpace::create(mapper, memory, bootstrap) {
        Ok(space) => space,
        Err(e) => panic!("cannot allocate the kernel page table: {e}"),
    };
    if let Err(e) = space.populate_kernel_half(memory) {
        panic!("cannot build the kernel half of the page table: {e}");
    }
    space.root()
}

//! Process lifecycle: create, fork, exec, exit, wait and kill.
//!
//! A process holds three kernel resources besides its PCB: an address space
//! (PML4 root plus everything below it), a kernel stack from the buddy
//! allocator and a register context from the `task_context` slab cache. They
//! are acquired together and released together; a half-built process never
//! reaches the table.

use crate::cpu::Cpu;
use crate::error::KernelError;
use crate::kernel::Kernel;
use crate::loader::{ExecutableLoader, ImageBuilder, LoadedImage};
use crate::security::{Operation, PermissionCheck};
use alloc::vec::Vec;
use core::iter;
use kernel_info::memory::USER_STACK_TOP;
use kernel_memory_addresses::{PhysicalAddress, PhysicalFrame, VirtualAddress};
use kernel_proc::{
    BlockReason, KernelStack, Pid, Priority, Process, ProcessState, ProcessType, RegisterSnapshot,
    Signal, SlotId, UserStack,
};
use kernel_vmem::{AddressSpace, PageEntryBits, PhysMapper, UnmapError};
use log::{debug, info, trace, warn};

/// Result of [`Kernel::process_wait`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum WaitOutcome {
    /// A zombie child was collected.
    Reaped { pid: Pid, status: i32 },
    /// The caller is blocked. Once a matching child exits, its pid lands in
    /// the caller's saved `rax` and [`Kernel::take_wait_result`] yields the
    /// pair.
    Blocked,
}

/// Address space, kernel stack and register context of one process.
#[derive(Debug, Copy, Clone)]
struct Resources {
    root: PhysicalFrame,
    stack: KernelStack,
    context: PhysicalAddress,
}

impl Resources {
    const fn of(p: &Process) -> Self {
        Self {
            root: p.root,
            stack: p.kernel_stack,
            context: p.context,
        }
    }
}

impl<'m, M, C, L, P> Kernel<'m, M, C, L, P>
where
    M: PhysMapper,
    C: Cpu,
    L: ExecutableLoader,
    P: PermissionCheck,
{
    /// Load `path` into a new process and make it Ready.
    ///
    /// The parent is the calling process; processes created by the kernel
    /// itself have none.
    ///
    /// # Errors
    /// - [`KernelError::ProcessTableFull`] when no slot is free.
    /// - Memory exhaustion and [`KernelError::Loader`] failures. Everything
    ///   acquired up to that point is released again.
    pub fn process_create(
        &mut self,
        path: &str,
        priority: Priority,
        kind: ProcessType,
    ) -> Result<Pid, KernelError> {
        if !self.table.has_free_slot() {
            return Err(KernelError::ProcessTableFull);
        }

        let res = self.allocate_resources()?;
        let (image, user_stack) = match self.populate(path, kind, res.root) {
            Ok(v) => v,
            Err(e) => {
                warn!("create {path}: {e}");
                self.release(res);
                return Err(e);
            }
        };

        let top = match user_stack {
            Some(stack) => stack.top(),
            None => self.kernel_stack_top(res.stack),
        };
        *self.registers(res.context) = RegisterSnapshot::for_entry(kind, image.entry.as_u64(), top.as_u64());

        let ppid = self.caller_pid();
        let now = self.system_time();
        let inserted = self.table.insert_with(|pid| {
            let mut p = Process::new(pid, ppid, path, kind, priority, res.context, res.root, res.stack);
            p.user_stack = user_stack;
            p.entry = image.entry.as_u64();
            p.heap_base = image.heap_base.as_u64();
            p.start_time = now;
            p
        });
        let (slot, pid) = match inserted {
            Ok(v) => v,
            Err(e) => {
                self.release(res);
                return Err(e.into());
            }
        };
        self.admit(slot)?;

        info!("created pid {pid} ({path}, {kind:?}) at priority {priority}");
        Ok(pid)
    }

    /// Duplicate the calling process.
    ///
    /// The child gets a physical copy of the user half, the same open files
    /// and the caller's registers with `rax = 0`. Returns the child's pid to
    /// the parent.
    ///
    /// # Errors
    /// - [`KernelError::NoCurrentProcess`] when called from the idle loop.
    /// - [`KernelError::ProcessTableFull`] or memory exhaustion; nothing is
    ///   left behind.
    pub fn process_fork(&mut self) -> Result<Pid, KernelError> {
        let parent_slot = self.current_user_slot()?;
        if !self.table.has_free_slot() {
            return Err(KernelError::ProcessTableFull);
        }
        let parent = Resources::of(
            self.table
                .get(parent_slot)
                .ok_or(KernelError::NoCurrentProcess)?,
        );

        let mut regs = *self.registers(parent.context);
        self.cpu.save_context(&mut regs);
        *self.registers(parent.context) = regs;

        let res = self.allocate_resources()?;
        let space = self.address_space(res.root);
        let parent_space = self.address_space(parent.root);
        let copied = match space.copy_user_from(&mut self.memory, &parent_space) {
            Ok(n) => n,
            Err(e) => {
                warn!("fork: copying the address space failed: {e}");
                self.release(res);
                return Err(e.into());
            }
        };

        regs.rax = 0;
        *self.registers(res.context) = regs;

        let now = self.system_time();
        let template = self
            .table
            .get(parent_slot)
            .ok_or(KernelError::NoCurrentProcess)?;
        let mut child = Process::new(
            template.pid,
            Some(template.pid),
            &template.name,
            template.kind,
            template.priority,
            res.context,
            res.root,
            res.stack,
        );
        child.user_stack = template.user_stack;
        child.entry = template.entry;
        child.heap_base = template.heap_base;
        child.cwd.clone_from(&template.cwd);
        child.fds = template.fds.clone();
        child.start_time = now;

        let (slot, pid) = match self.table.insert_with(|pid| Process { pid, ..child }) {
            Ok(v) => v,
            Err(e) => {
                self.release(res);
                return Err(e.into());
            }
        };
        self.admit(slot)?;

        debug!("fork: pid {pid} from parent slot {}, {copied} pages copied", parent_slot.index());
        Ok(pid)
    }

    /// Replace the image of the calling process with `path`.
    ///
    /// `argv` and `envp` are copied onto the new user stack, System V style:
    /// `rsp` points at `argc`, followed by the `argv` pointers, a null, the
    /// `envp` pointers and a null. `rdi`, `rsi` and `rdx` carry `argc`,
    /// `argv` and `envp`. The pid and open files are kept.
    ///
    /// # Errors
    /// - [`KernelError::PermissionDenied`] or [`KernelError::ArgumentsTooLarge`];
    ///   the old image is untouched.
    /// - [`KernelError::Loader`]: the old image is already gone, so the
    ///   process exits with status `-1` and the CPU moves on to the next
    ///   process.
    pub fn process_exec(
        &mut self,
        path: &str,
        argv: &[&str],
        envp: &[&str],
    ) -> Result<(), KernelError> {
        let slot = self.current_user_slot()?;
        let (pid, kind, res) = {
            let p = self.table.get(slot).ok_or(KernelError::NoCurrentProcess)?;
            (p.pid, p.kind, Resources::of(p))
        };
        if !self
            .permissions
            .check_permission(Some(pid), Operation::Exec { path })
        {
            return Err(KernelError::PermissionDenied);
        }
        if argument_bytes(argv, envp) > self.config.user_stack_size {
            return Err(KernelError::ArgumentsTooLarge);
        }

        let space = self.address_space(res.root);
        let released = space.clear_user(&mut self.memory);
        trace!("exec: pid {pid} dropped {released} frames of its old image");

        let (image, stack) = match self.reload(path, &space) {
            Ok(v) => v,
            Err(e) => {
                warn!("exec {path} failed for pid {pid}: {e}");
                self.exit_process(slot, -1)?;
                self.schedule()?;
                return Err(e);
            }
        };
        let frame = push_arguments(&space, stack.top(), argv, envp)?;

        let mut regs = RegisterSnapshot::for_entry(kind, image.entry.as_u64(), frame.sp);
        regs.rsp = frame.sp;
        regs.rdi = frame.argc;
        regs.rsi = frame.argv;
        regs.rdx = frame.envp;
        *self.registers(res.context) = regs;
        // New mappings at old addresses; reloading CR3 drops stale TLB entries.
        self.cpu.activate_root(res.root);
        self.cpu.restore_context(&regs);

        if let Some(p) = self.table.get_mut(slot) {
            p.entry = image.entry.as_u64();
            p.heap_base = image.heap_base.as_u64();
            p.user_stack = Some(stack);
            p.rename(path);
        }
        info!("exec: pid {pid} now runs {path} with {} arguments", argv.len());
        Ok(())
    }

    /// Terminate the calling process with `code` and switch away from it.
    ///
    /// # Errors
    /// [`KernelError::NoCurrentProcess`] from the idle loop.
    pub fn process_exit(&mut self, code: i32) -> Result<(), KernelError> {
        let slot = self.current_user_slot()?;
        self.exit_process(slot, code)?;
        self.schedule()
    }

    /// Collect an exited child: `Some(pid)` for a specific one, `None` for
    /// any.
    ///
    /// # Errors
    /// [`KernelError::NotAChild`] or [`KernelError::NoChildren`]; the caller
    /// is not blocked.
    pub fn process_wait(&mut self, target: Option<Pid>) -> Result<WaitOutcome, KernelError> {
        let slot = self.current_user_slot()?;
        let me = self
            .table
            .get(slot)
            .map(|p| p.pid)
            .ok_or(KernelError::NoCurrentProcess)?;

        let zombie = match target {
            Some(pid) => {
                let (child, p) = self
                    .table
                    .find(pid)
                    .map_err(|_| KernelError::NotAChild(pid))?;
                if p.ppid != Some(me) {
                    return Err(KernelError::NotAChild(pid));
                }
                p.state.is_zombie().then_some(child)
            }
            None => {
                if self.table.children_of(me).next().is_none() {
                    return Err(KernelError::NoChildren);
                }
                self.table
                    .children_of(me)
                    .find(|&c| self.table.get(c).is_some_and(|p| p.state.is_zombie()))
            }
        };

        if let Some((pid, status)) = zombie.and_then(|child| self.reap(child)) {
            debug!("wait: pid {me} collected {pid} with status {status}");
            return Ok(WaitOutcome::Reaped { pid, status });
        }

        if let Some(p) = self.table.get_mut(slot) {
            p.wait_result = None;
        }
        self.scheduler
            .block(&mut self.table, slot, BlockReason::WaitingForChild(target))?;
        self.schedule()?;
        Ok(WaitOutcome::Blocked)
    }

    /// The `(pid, status)` left by a blocking wait of the calling process.
    pub fn take_wait_result(&mut self) -> Option<(Pid, i32)> {
        let slot = self.current_user_slot().ok()?;
        self.table.get_mut(slot)?.wait_result.take()
    }

    /// Deliver `signal` to `pid`.
    ///
    /// - `Kill`/`Terminate` turn the target into a zombie with status
    ///   `-signo`, whatever it was doing.
    /// - `Stop` suspends a Ready or Running target.
    /// - `Continue` resumes a stopped target at the tail of its level.
    ///
    /// A signal that does not apply to the target's state (stopping a blocked
    /// process, killing a zombie) is accepted and ignored.
    ///
    /// # Errors
    /// [`KernelError::NoSuchProcess`], [`KernelError::IdleProcess`] or
    /// [`KernelError::PermissionDenied`]; the target is untouched.
    pub fn process_kill(&mut self, pid: Pid, signal: Signal) -> Result<(), KernelError> {
        let (slot, state) = self
            .table
            .find(pid)
            .map(|(s, p)| (s, p.state))
            .map_err(|_| KernelError::NoSuchProcess(pid))?;
        if Some(slot) == self.scheduler.idle() {
            return Err(KernelError::IdleProcess);
        }
        let caller = self.caller_pid();
        if !self
            .permissions
            .check_permission(caller, Operation::Kill { target: pid, signal })
        {
            return Err(KernelError::PermissionDenied);
        }

        let is_current = self.scheduler.current() == Some(slot);
        match signal {
            Signal::Kill | Signal::Terminate => {
                if state.is_zombie() {
                    return Ok(());
                }
                self.exit_process(slot, -signal.number())?;
                info!("pid {pid} killed by {signal:?}");
                if is_current {
                    self.schedule()?;
                }
            }
            Signal::Stop => {
                if matches!(state, ProcessState::Ready | ProcessState::Running) {
                    self.scheduler
                        .block(&mut self.table, slot, BlockReason::Stopped)?;
                    debug!("pid {pid} stopped");
                    if is_current {
                        self.schedule()?;
                    }
                }
            }
            Signal::Continue => {
                if state == ProcessState::Blocked(BlockReason::Stopped) {
                    self.scheduler.wake(&mut self.table, slot)?;
                    debug!("pid {pid} continued");
                }
            }
        }
        Ok(())
    }

    /// Turn `slot` into a zombie and settle its family.
    ///
    /// Open files and user memory go immediately. Zombie children are reaped
    /// and live ones orphaned. The process itself is reaped right away when
    /// nobody will wait for it: it has no parent, or the parent is already
    /// blocked waiting for it.
    pub(crate) fn exit_process(&mut self, slot: SlotId, code: i32) -> Result<(), KernelError> {
        let now = self.system_time();
        let (pid, ppid, root, closed) = {
            let p = self.table.get_mut(slot).ok_or(KernelError::NoCurrentProcess)?;
            let closed = p.fds.close_all();
            p.exit_code = code;
            p.exit_time = Some(now);
            (p.pid, p.ppid, p.root, closed)
        };
        let released = self.address_space(root).clear_user(&mut self.memory);
        self.scheduler.make_zombie(&mut self.table, slot)?;
        info!("pid {pid} exited with status {code} ({closed} files closed, {released} frames released)");

        self.orphan_children(pid);

        let parent = ppid.and_then(|pp| self.table.find(pp).ok().map(|(s, p)| (s, p.state)));
        match parent {
            None => self.reap_or_defer(slot),
            Some((parent_slot, ProcessState::Blocked(reason))) if reason.accepts_child(pid) => {
                self.reap_or_defer(slot);
                self.deliver_wait(parent_slot, pid, code)?;
            }
            Some(_) => {}
        }
        Ok(())
    }

    fn orphan_children(&mut self, parent: Pid) {
        let children: Vec<SlotId> = self.table.children_of(parent).collect();
        for child in children {
            let zombie = self.table.get(child).is_some_and(|p| p.state.is_zombie());
            if zombie {
                self.reap(child);
            } else if let Some(p) = self.table.get_mut(child) {
                p.ppid = None;
            }
        }
    }

    /// Hand `(pid, status)` to a parent blocked in wait and make it Ready.
    fn deliver_wait(&mut self, parent: SlotId, pid: Pid, status: i32) -> Result<(), KernelError> {
        let context = {
            let p = self
                .table
                .get_mut(parent)
                .ok_or(KernelError::NoSuchProcess(pid))?;
            p.wait_result = Some((pid, status));
            p.context
        };
        self.registers(context).rax = u64::from(pid.as_u32());
        self.scheduler.wake(&mut self.table, parent)?;
        Ok(())
    }

    /// Reap `slot` now, or after the next switch if it is still running on
    /// its own kernel stack.
    fn reap_or_defer(&mut self, slot: SlotId) {
        if self.scheduler.current() == Some(slot) {
            self.deferred_reap = Some(slot);
        } else {
            self.reap(slot);
        }
    }

    /// Free the table slot and every resource of a dead process.
    pub(crate) fn reap(&mut self, slot: SlotId) -> Option<(Pid, i32)> {
        if let Err(e) = self.scheduler.remove(&mut self.table, slot) {
            warn!("reap: slot {} not cleanly unlinked: {e}", slot.index());
        }
        let p = self.table.remove(slot)?;
        self.release(Resources::of(&p));
        debug!("reaped pid {} (status {})", p.pid, p.exit_code);
        Some((p.pid, p.exit_code))
    }

    fn allocate_resources(&mut self) -> Result<Resources, KernelError> {
        let space = AddressSpace::create(
            self.memory.mapper(),
            &mut self.memory,
            Some(self.kernel_root),
        )?;

        let order = self.config.kernel_stack_order();
        let stack = match self.memory.heap_mut().buddy_mut().alloc(order) {
            Ok(base) => KernelStack { base, order },
            Err(e) => {
                space.destroy(&mut self.memory);
                return Err(e.into());
            }
        };

        let context = match self.memory.heap_mut().alloc_object(self.context_cache) {
            Ok(context) => context,
            Err(e) => {
                self.free_kernel_stack(stack);
                space.destroy(&mut self.memory);
                return Err(e.into());
            }
        };

        Ok(Resources {
            root: space.root(),
            stack,
            context,
        })
    }

    fn release(&mut self, res: Resources) {
        let frames = self.address_space(res.root).destroy(&mut self.memory);
        self.free_kernel_stack(res.stack);
        if let Err(e) = self
            .memory
            .heap_mut()
            .free_object(self.context_cache, res.context)
        {
            warn!("register context {} not freed: {e}", res.context);
        }
        trace!("released address space {} ({frames} frames)", res.root);
    }

    fn free_kernel_stack(&mut self, stack: KernelStack) {
        if let Err(e) = self.memory.heap_mut().buddy_mut().free(stack.base, stack.order) {
            warn!("kernel stack {} not freed: {e}", stack.base);
        }
    }

    /// Queue a freshly inserted process; undo the insertion if that fails.
    fn admit(&mut self, slot: SlotId) -> Result<(), KernelError> {
        if let Err(e) = self.scheduler.enqueue(&mut self.table, slot) {
            self.reap(slot);
            return Err(e.into());
        }
        Ok(())
    }

    /// Pid of the calling process; `None` from the idle loop.
    fn caller_pid(&self) -> Option<Pid> {
        let slot = self.current_user_slot().ok()?;
        self.table.get(slot).map(|p| p.pid)
    }

    /// Map the user stack (user-mode kinds only) and load `path` into `root`.
    fn populate(
        &mut self,
        path: &str,
        kind: ProcessType,
        root: PhysicalFrame,
    ) -> Result<(LoadedImage, Option<UserStack>), KernelError> {
        let space = self.address_space(root);
        let stack = if kind.is_user_mode() {
            Some(self.map_user_stack(&space)?)
        } else {
            None
        };
        let image = self.load_image(path, &space)?;
        Ok((image, stack))
    }

    /// Stack and image for an exec; the user half is empty on entry.
    fn reload(
        &mut self,
        path: &str,
        space: &AddressSpace<'m, M>,
    ) -> Result<(LoadedImage, UserStack), KernelError> {
        let stack = self.map_user_stack(space)?;
        let image = self.load_image(path, space)?;
        Ok((image, stack))
    }

    fn map_user_stack(&mut self, space: &AddressSpace<'m, M>) -> Result<UserStack, KernelError> {
        let size = self.config.user_stack_size;
        let base = VirtualAddress::new(USER_STACK_TOP - size);
        space.map_anonymous(&mut self.memory, base, size, PageEntryBits::user_rw())?;
        Ok(UserStack { base, size })
    }

    fn load_image(
        &mut self,
        path: &str,
        space: &AddressSpace<'m, M>,
    ) -> Result<LoadedImage, KernelError> {
        let mut builder = ImageBuilder::new(space, &mut self.memory);
        let image = self.loader.load(path, &mut builder)?;
        trace!("{path}: {} pages mapped, entry {}", builder.mapped_pages(), image.entry);
        Ok(image)
    }
}

/// Stack bytes `argv` and `envp` need: the strings with their terminators,
/// `argc`, both pointer arrays with their nulls, and alignment slack.
fn argument_bytes(argv: &[&str], envp: &[&str]) -> u64 {
    let strings: usize = argv.iter().chain(envp).map(|s| s.len() + 1).sum();
    let words = argv.len() + envp.len() + 3;
    (strings + words * 8 + 32) as u64
}

/// Where [`push_arguments`] left things.
struct ArgumentFrame {
    sp: u64,
    argc: u64,
    argv: u64,
    envp: u64,
}

fn push_string<M: PhysMapper>(
    space: &AddressSpace<'_, M>,
    sp: u64,
    s: &str,
) -> Result<u64, UnmapError> {
    let at = sp - (s.len() as u64 + 1);
    space.write_bytes(VirtualAddress::new(at), s.as_bytes())?;
    space.write_bytes(VirtualAddress::new(at + s.len() as u64), &[0])?;
    Ok(at)
}

fn push_arguments<M: PhysMapper>(
    space: &AddressSpace<'_, M>,
    top: VirtualAddress,
    argv: &[&str],
    envp: &[&str],
) -> Result<ArgumentFrame, UnmapError> {
    let mut sp = top.as_u64();
    let mut argv_ptrs = Vec::with_capacity(argv.len());
    for s in argv {
        sp = push_string(space, sp, s)?;
        argv_ptrs.push(sp);
    }
    let mut envp_ptrs = Vec::with_capacity(envp.len());
    for s in envp {
        sp = push_string(space, sp, s)?;
        envp_ptrs.push(sp);
    }

    let argc = argv.len() as u64;
    let words: Vec<u64> = iter::once(argc)
        .chain(argv_ptrs)
        .chain(iter::once(0))
        .chain(envp_ptrs)
        .chain(iter::once(0))
        .collect();
    sp = (sp - words.len() as u64 * 8) & !0xf;

    let mut at = sp;
    for w in &words {
        space.write_bytes(VirtualAddress::new(at), &w.to_le_bytes())?;
        at += 8;
    }

    Ok(ArgumentFrame {
        sp,
        argc,
        argv: sp + 8,
        envp: sp + 8 * (argc + 2),
    })
}

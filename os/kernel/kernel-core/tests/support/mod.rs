//! Host-side collaborators for driving a [`Kernel`] in tests.

#![allow(dead_code)]

use kernel_core::{
    BootInfo, Cpu, ExecutableLoader, ImageBuilder, Kernel, KernelConfig, LoadedImage, LoaderError,
    Operation, PermissionCheck, SegmentFlags,
};
use kernel_info::boot::MemoryRegion;
use kernel_info::memory::{USER_HEAP_BASE, USER_IMAGE_BASE};
use kernel_log::{KernelLogger, LogSink};
use kernel_memory_addresses::{PhysicalFrame, VirtualAddress};
use kernel_proc::{Pid, Priority, ProcessType, RegisterSnapshot};
use kernel_vmem::testing::TestPhys;
use kernel_vmem::PhysMapper;
use log::LevelFilter;
use std::collections::HashMap;
use std::io::Write;

pub const FRAMES: usize = 4096;

pub type TestKernel<'m> = Kernel<'m, TestPhys, RecordingCpu, ScriptedLoader, DenyList>;

struct Stderr;

impl LogSink for Stderr {
    fn write_bytes(&self, bytes: &[u8]) {
        let _ = std::io::stderr().write_all(bytes);
    }
}

static LOGGER: KernelLogger<Stderr> = KernelLogger::new(Stderr, LevelFilter::Debug);

/// What the core asked the CPU to do, in order.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CpuEvent {
    Save,
    Restore { rip: u64 },
    ActivateRoot(PhysicalFrame),
    KernelStack(VirtualAddress),
    ArmTimer(u32),
    InterruptsOn,
}

/// Models the trap frame as `live`: whatever was restored last is what the
/// interrupted code "runs" with.
#[derive(Debug, Default)]
pub struct RecordingCpu {
    pub live: RegisterSnapshot,
    pub events: Vec<CpuEvent>,
}

impl RecordingCpu {
    pub fn roots(&self) -> Vec<PhysicalFrame> {
        self.events
            .iter()
            .filter_map(|e| match e {
                CpuEvent::ActivateRoot(root) => Some(*root),
                _ => None,
            })
            .collect()
    }
}

impl Cpu for RecordingCpu {
    fn save_context(&mut self, regs: &mut RegisterSnapshot) {
        *regs = self.live;
        self.events.push(CpuEvent::Save);
    }

    fn restore_context(&mut self, regs: &RegisterSnapshot) {
        self.live = *regs;
        self.events.push(CpuEvent::Restore { rip: regs.rip });
    }

    fn activate_root(&mut self, root: PhysicalFrame) {
        self.events.push(CpuEvent::ActivateRoot(root));
    }

    fn set_kernel_stack(&mut self, top: VirtualAddress) {
        self.events.push(CpuEvent::KernelStack(top));
    }

    fn arm_timer(&mut self, hz: u32) {
        self.events.push(CpuEvent::ArmTimer(hz));
    }

    fn enable_interrupts(&mut self) {
        self.events.push(CpuEvent::InterruptsOn);
    }

    fn wait_for_interrupt(&mut self) {}
}

/// Serves a fixed set of "executables": each is one text page holding the
/// path bytes, loaded at `USER_IMAGE_BASE`.
#[derive(Debug, Default)]
pub struct ScriptedLoader {
    images: HashMap<String, Vec<u8>>,
    /// Paths that map a segment and then report a corrupt image.
    broken: Vec<String>,
    pub loads: usize,
}

impl ScriptedLoader {
    pub fn with(paths: &[&str]) -> Self {
        let mut loader = Self::default();
        for path in paths {
            loader
                .images
                .insert((*path).to_string(), path.as_bytes().to_vec());
        }
        loader
    }

    pub fn broken(mut self, path: &str) -> Self {
        self.broken.push(path.to_string());
        self
    }
}

impl ExecutableLoader for ScriptedLoader {
    fn load<M: PhysMapper>(
        &mut self,
        path: &str,
        image: &mut ImageBuilder<'_, '_, M>,
    ) -> Result<LoadedImage, LoaderError> {
        let base = VirtualAddress::new(USER_IMAGE_BASE);
        if self.broken.iter().any(|p| p == path) {
            image.map_segment(base, 3 * 4096, SegmentFlags::DATA)?;
            return Err(LoaderError::InvalidImage);
        }
        let code = self.images.get(path).ok_or(LoaderError::NotFound)?;
        image.map_segment(base, code.len() as u64, SegmentFlags::TEXT)?;
        image.write(base, code)?;
        self.loads += 1;
        Ok(LoadedImage {
            entry: base,
            heap_base: VirtualAddress::new(USER_HEAP_BASE),
        })
    }
}

/// Refuses the listed kill targets and exec paths.
#[derive(Debug, Default)]
pub struct DenyList {
    pub kill: Vec<Pid>,
    pub exec: Vec<&'static str>,
}

impl PermissionCheck for DenyList {
    fn check_permission(&self, _caller: Option<Pid>, op: Operation<'_>) -> bool {
        match op {
            Operation::Kill { target, .. } => !self.kill.contains(&target),
            Operation::Exec { path } => !self.exec.contains(&path),
        }
    }
}

pub fn config() -> KernelConfig {
    KernelConfig::new()
        .with_max_processes(16)
        .with_buddy_pool_frames(1024)
        .with_low_reserved_bytes(0x1_0000)
}

pub fn boot_with(
    phys: &TestPhys,
    config: KernelConfig,
    loader: ScriptedLoader,
    permissions: DenyList,
) -> TestKernel<'_> {
    let _ = LOGGER.init();
    let map = [MemoryRegion::available(0, phys.len_bytes())];
    let boot = BootInfo {
        memory_map: &map,
        bootstrap_root: None,
    };
    Kernel::boot(
        phys,
        boot,
        config,
        RecordingCpu::default(),
        loader,
        permissions,
    )
    .expect("kernel boots on simulated memory")
}

pub fn boot<'a>(phys: &'a TestPhys, paths: &[&str]) -> TestKernel<'a> {
    boot_with(phys, config(), ScriptedLoader::with(paths), DenyList::default())
}

pub fn spawn(kernel: &mut TestKernel<'_>, path: &str, level: u8) -> Pid {
    kernel
        .process_create(path, Priority::new(level).unwrap(), ProcessType::User)
        .expect("process_create")
}

/// Tick the timer until the current process changes; returns the new pid.
pub fn run_until_switch(kernel: &mut TestKernel<'_>) -> Pid {
    let before = kernel.current_pid();
    for _ in 0..1000 {
        kernel.timer_tick().unwrap();
        if kernel.current_pid() != before {
            return kernel.current_pid().unwrap();
        }
    }
    panic!("no switch away from {before:?}");
}

pub fn audit(kernel: &TestKernel<'_>) {
    kernel
        .scheduler()
        .audit(kernel.table())
        .expect("queues consistent with process states");
}

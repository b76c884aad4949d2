//! The process subsystem's shared state.

use alloc::sync::Arc;
use core::fmt;

use pmm::FrameAllocator;

use crate::process::{Process, ProcessRegistry};
use crate::sync::Semaphore;
use crate::{KernelConfig, Platform};

/// Frame allocator, process registry and collaborators, shared by every process.
pub struct Kernel {
    pub(crate) platform: Arc<dyn Platform>,
    pub(crate) frames: Arc<FrameAllocator>,
    pub(crate) registry: ProcessRegistry,
    pub(crate) config: KernelConfig,
    /// Bounds the number of execs staging arguments at once.
    pub(crate) exec_gate: Semaphore,
}

impl Kernel {
    pub fn new(
        platform: Arc<dyn Platform>,
        frames: Arc<FrameAllocator>,
        config: KernelConfig,
    ) -> Arc<Self> {
        log::info!(
            "process subsystem up: {} frames, {} process slots, arg_max {}",
            frames.total_frames(),
            config.max_processes,
            config.arg_max
        );
        Arc::new(Self {
            platform,
            frames,
            registry: ProcessRegistry::new(config.max_processes),
            config,
            exec_gate: Semaphore::new(config.exec_concurrency.max(1)),
        })
    }

    pub fn frames(&self) -> &Arc<FrameAllocator> {
        &self.frames
    }

    pub fn registry(&self) -> &ProcessRegistry {
        &self.registry
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn platform(&self) -> &Arc<dyn Platform> {
        &self.platform
    }

    /// Switches the address space of `process` in on the current CPU.
    pub(crate) fn activate(&self, process: &Process) {
        let space = process.space();
        if let Some(space) = space.as_ref() {
            self.platform.with_tlb(&mut |tlb| space.activate(tlb));
        }
    }
}

impl fmt::Debug for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kernel")
            .field("free_frames", &self.frames.free_frames())
            .field("processes", &self.registry.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

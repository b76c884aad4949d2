//! Collaborators the process subsystem is built on.
//!
//! The thread scheduler, the program loader and the user-mode trampoline are owned
//! by the surrounding kernel; this crate only sees them through these traits.

use alloc::boxed::Box;
use alloc::sync::Arc;

use pmm::{AddressSpace, Tlb, VirtualAddress};

use crate::{Errno, Kernel, Process, TrapFrame};

/// Kernel thread management.
pub trait Scheduler {
    /// Starts a new kernel context running `entry`.
    fn spawn(&self, name: &str, entry: Box<dyn FnOnce() + Send + 'static>) -> Result<(), Errno>;

    /// Gives up the CPU to another runnable context.
    fn yield_now(&self);

    /// Ends the calling context.
    fn exit_context(&self) -> !;
}

/// Access to executables.
pub trait Loader {
    /// Opens the program at `path`.
    fn open(&self, path: &str) -> Result<Arc<dyn ProgramImage>, Errno>;
}

/// An executable that can be loaded into an address space.
pub trait ProgramImage: Send + Sync {
    /// Defines the program's regions in `space`, commits them, copies the program in
    /// and completes the load. Returns the entry point.
    fn load(&self, space: &mut AddressSpace) -> Result<VirtualAddress, Errno>;
}

/// Everything the process subsystem needs from the machine it runs on.
pub trait Platform: Scheduler + Loader + Send + Sync {
    /// Drops to user mode in `process` with the registers in `frame`.
    fn enter_user(&self, kernel: &Arc<Kernel>, process: Arc<Process>, frame: TrapFrame) -> !;

    /// Runs `f` with the current CPU's TLB.
    fn with_tlb(&self, f: &mut dyn FnMut(&mut dyn Tlb));
}

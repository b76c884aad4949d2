#![cfg_attr(not(any(test, feature = "hosted")), no_std)]

//! # Kestrel process subsystem
//!
//! Processes on top of the [`pmm`] memory manager: identifiers and the exit/wait
//! handshake, `fork`, `execv`, `_exit` and `waitpid`, the system call and page
//! fault entry points, and the collaborator traits the surrounding kernel
//! implements.
//!
//! With the `hosted` feature the crate also provides [`hosted::HostedPlatform`],
//! which runs processes as host threads.

extern crate alloc;

mod args;
mod config;
mod console;
mod error;
mod kernel;
mod lifecycle;
mod loader;
mod platform;
pub mod process;
pub mod sync;
pub mod syscall;
mod trapframe;
mod vm;
mod wait_status;

#[cfg(any(test, feature = "hosted"))]
pub mod hosted;

pub use args::{ArgumentVector, ceiling as argument_ceiling};
pub use config::KernelConfig;
pub use console::Console;
pub use error::Errno;
pub use kernel::Kernel;
pub use loader::{ImageSegment, ImageTable, MemoryImage};
pub use platform::{Loader, Platform, ProgramImage, Scheduler};
pub use process::{Pid, Process};
pub use trapframe::{INSTRUCTION_SIZE, TrapFrame};
pub use wait_status::{ExitReason, SIGSEGV, WaitStatus};

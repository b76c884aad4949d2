#![cfg_attr(not(any(test, feature = "software-emulation")), no_std)]

//! # Kestrel Memory Manager (PMM)
//!
//! The memory half of the Kestrel process subsystem. It provides:
//!
//! - A first-fit allocator for runs of physically contiguous frames.
//! - Per-process address spaces of two segments plus a fixed stack.
//! - A software-managed TLB abstraction and the fault resolver that fills it.
//! - Software emulation for testing in non-kernel environments.

extern crate alloc;

mod address;
mod address_space;
pub mod arch;
pub mod fault;
mod frame;
mod frame_allocator;
mod memmap;
mod numbers;
mod physical_memory;
pub mod tlb;

pub use address::{PhysicalAddress, VirtualAddress};
pub use address_space::{
    AccessError, AddressSpace, MAX_SEGMENTS, RegionError, RegionKind, Segment, Translation,
};
pub use fault::{FaultError, FaultKind};
pub use frame::FrameState;
pub use frame_allocator::{AllocError, FrameAllocator, FrameRun, ReleaseError};
pub use memmap::BootMemoryRegion;
pub use numbers::{FrameNumber, PageNumber};
pub use physical_memory::PhysicalMemory;
pub use tlb::{InterruptGuard, Shootdown, Tlb, TlbEntry, TlbFlags};

#[cfg(any(test, feature = "software-emulation"))]
pub use arch::{SoftwareTlb, TlbException};

pub use arch::PAGE_SIZE;

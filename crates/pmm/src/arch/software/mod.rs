//! Software emulation implementation for testing and development.
//!
//! This module provides a software-emulated architecture that can run on any host.
//! It's designed for testing and development without requiring actual hardware access.
//!
//! The software-emulated architecture is a "scale model" of a MIPS-style machine
//! with a software-managed TLB:
//! - 16-bit addresses
//! - 4-bit page offset (16-byte pages)
//! - user stack topping out at 0x8000
//! - 32-bit pointers in user memory
//!
//! Each host thread plays the part of one CPU: it has its own interrupt flag and
//! its own TLB.

use core::cell::{Cell, UnsafeCell};

mod tlb;

pub use tlb::{SoftwareTlb, TlbException};

/// Maximum number of bits in a physical address for software emulation.
pub const MAX_PHYSICAL_BITS: usize = 16;

/// Maximum number of bits in a virtual address for software emulation.
pub const MAX_VIRTUAL_BITS: usize = 16;

/// Page size in bytes (16 bytes = 2^4).
pub const PAGE_SIZE: usize = 16;

/// Initial user stack pointer.
pub const USER_STACK_TOP: usize = 0x8000;

/// Width in bytes of a pointer stored in user memory.
pub const USER_POINTER_SIZE: usize = 4;

/// Validates a physical address for software emulation.
///
/// Physical addresses must fit within 16 bits.
#[inline]
pub const fn validate_physical(addr: usize) -> bool {
    addr <= 0xFFFF
}

/// Validates a virtual address for software emulation.
///
/// Virtual addresses must fit within 16 bits.
#[inline]
pub const fn validate_virtual(addr: usize) -> bool {
    addr <= 0xFFFF
}

std::thread_local! {
    /// Interrupt-enable flag of the emulated CPU running on this thread.
    static INTERRUPTS_ENABLED: Cell<bool> = const { Cell::new(true) };
}

/// Returns whether interrupts are enabled on the emulated CPU.
#[inline]
pub fn interrupts_enabled() -> bool {
    INTERRUPTS_ENABLED.with(Cell::get)
}

/// Masks interrupts on the emulated CPU.
#[inline]
pub fn disable_interrupts() {
    INTERRUPTS_ENABLED.with(|flag| flag.set(false));
}

/// Unmasks interrupts on the emulated CPU.
#[inline]
pub fn enable_interrupts() {
    INTERRUPTS_ENABLED.with(|flag| flag.set(true));
}

/// Emulated memory for software simulation.
///
/// This provides a simulated physical memory space for testing frame allocation
/// and address-space copies without requiring actual hardware.
///
/// Bytes are handed out through raw pointers. Callers only ever touch frames
/// they own through an allocation, so two threads never access the same byte
/// concurrently.
pub struct EmulatedMemory {
    /// The underlying memory buffer.
    memory: Box<[UnsafeCell<u8>]>,
}

// SAFETY: see the type-level documentation; access is partitioned by frame ownership.
unsafe impl Sync for EmulatedMemory {}

impl EmulatedMemory {
    /// Creates a new emulated memory region of the specified size.
    ///
    /// # Panics
    ///
    /// Panics if the region does not fit in the emulated physical address width.
    pub fn new(size: usize) -> Self {
        assert!(
            size <= 1 << MAX_PHYSICAL_BITS,
            "emulated memory exceeds the physical address width"
        );
        Self {
            memory: (0..size).map(|_| UnsafeCell::new(0)).collect(),
        }
    }

    /// Translates a physical range to a pointer into the buffer.
    ///
    /// # Panics
    ///
    /// Panics if any part of the range lies outside the emulated memory.
    pub fn translate(&self, phys: usize, len: usize) -> *mut u8 {
        assert!(
            phys.checked_add(len)
                .is_some_and(|end| end <= self.memory.len()),
            "physical address out of bounds"
        );
        UnsafeCell::raw_get(self.memory.as_ptr().wrapping_add(phys))
    }

    /// Returns the size of the emulated memory region.
    pub fn size(&self) -> usize {
        self.memory.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interrupt_flag_is_per_thread() {
        disable_interrupts();
        assert!(!interrupts_enabled());

        let other = std::thread::spawn(interrupts_enabled).join().unwrap();
        assert!(other);

        enable_interrupts();
        assert!(interrupts_enabled());
    }

    #[test]
    fn emulated_memory_starts_zeroed() {
        let memory = EmulatedMemory::new(64);
        let ptr = memory.translate(0, 64);
        let bytes = unsafe { core::slice::from_raw_parts(ptr, 64) };
        assert!(bytes.iter().all(|b| *b == 0));
    }

    #[test]
    #[should_panic(expected = "physical address out of bounds")]
    fn emulated_memory_rejects_out_of_bounds() {
        let memory = EmulatedMemory::new(64);
        memory.translate(60, 8);
    }
}

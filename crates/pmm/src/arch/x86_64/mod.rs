//! x86_64 architecture-specific implementation.
//!
//! This module provides the hardware implementation for x86_64 architecture:
//! address validation, the user address-space layout and interrupt masking.
//! The translation cache itself is owned by the platform; see [`crate::Tlb`].

use ::x86_64::instructions::interrupts;

/// Maximum number of bits in a physical address on x86_64.
/// This is typically 52 bits on modern CPUs, but we use 48 as a conservative default.
pub const MAX_PHYSICAL_BITS: usize = 48;

/// Maximum number of bits in a virtual address on x86_64 with 4-level paging.
pub const MAX_VIRTUAL_BITS: usize = 48;

/// Default page size in bytes (4 KiB).
pub const PAGE_SIZE: usize = 4096;

/// Initial user stack pointer. User programs live in the low 2 GiB.
pub const USER_STACK_TOP: usize = 0x8000_0000;

/// Width in bytes of a pointer stored in user memory.
pub const USER_POINTER_SIZE: usize = 8;

/// Validates a physical address for x86_64.
///
/// Physical addresses must not exceed the maximum physical address width.
#[inline]
pub const fn validate_physical(addr: usize) -> bool {
    let max_addr = (1usize << MAX_PHYSICAL_BITS) - 1;
    addr <= max_addr
}

/// Validates a virtual address for x86_64.
///
/// Virtual addresses must be canonical (bits 47-63 must be sign-extended from bit 47).
#[inline]
pub const fn validate_virtual(addr: usize) -> bool {
    let canonical = if (addr & (1 << 47)) != 0 {
        addr | 0xFFFF_0000_0000_0000
    } else {
        addr & 0x0000_FFFF_FFFF_FFFF
    };
    canonical == addr
}

/// Returns whether maskable interrupts are enabled on this CPU (`RFLAGS.IF`).
#[inline]
pub fn interrupts_enabled() -> bool {
    interrupts::are_enabled()
}

/// Masks interrupts on this CPU (`cli`).
#[inline]
pub fn disable_interrupts() {
    interrupts::disable();
}

/// Unmasks interrupts on this CPU (`sti`).
#[inline]
pub fn enable_interrupts() {
    interrupts::enable();
}

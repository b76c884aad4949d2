//! Address types for physical and virtual memory.
//!
//! Both are thin newtypes over `usize` that validate against the active architecture's
//! address width on construction.

use core::fmt;
use core::ops::{Add, Sub};

use crate::{FrameNumber, PageNumber, arch};

/// Generates the parts shared by [`PhysicalAddress`] and [`VirtualAddress`].
macro_rules! impl_address_common {
    ($name:ident, $validate:path, $err:literal, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        #[repr(transparent)]
        pub struct $name(usize);

        impl $name {
            /// Creates a new address.
            ///
            /// # Panics
            ///
            #[doc = concat!("Panics with `", $err, "` if the address is invalid for the architecture.")]
            #[inline]
            pub const fn new(addr: usize) -> Self {
                assert!($validate(addr), $err);
                Self(addr)
            }

            /// Creates a new address, returning `None` if it is invalid for the architecture.
            #[inline]
            pub const fn try_new(addr: usize) -> Option<Self> {
                if $validate(addr) { Some(Self(addr)) } else { None }
            }

            /// The zero address.
            #[inline]
            pub const fn zero() -> Self {
                Self(0)
            }

            /// Returns the raw address value.
            #[inline]
            pub const fn as_usize(self) -> usize {
                self.0
            }

            /// Checks if the address is aligned to the given alignment.
            ///
            /// # Panics
            ///
            /// Panics if `align` is not a power of two.
            #[inline]
            pub const fn is_aligned(self, align: usize) -> bool {
                assert!(align.is_power_of_two(), "alignment must be a power of two");
                self.0 & (align - 1) == 0
            }

            /// Aligns the address down to the given alignment.
            ///
            /// # Panics
            ///
            /// Panics if `align` is not a power of two.
            #[inline]
            pub const fn align_down(self, align: usize) -> Self {
                assert!(align.is_power_of_two(), "alignment must be a power of two");
                Self(self.0 & !(align - 1))
            }

            /// Aligns the address up to the given alignment.
            ///
            /// # Panics
            ///
            /// Panics if `align` is not a power of two.
            #[inline]
            pub const fn align_up(self, align: usize) -> Self {
                assert!(align.is_power_of_two(), "alignment must be a power of two");
                Self::new((self.0 + align - 1) & !(align - 1))
            }

            /// Returns the byte offset of this address within its page.
            #[inline]
            pub const fn page_offset(self) -> usize {
                self.0 & (arch::PAGE_SIZE - 1)
            }

            /// Adds `rhs`, returning `None` on overflow or if the result is invalid.
            #[inline]
            pub const fn checked_add(self, rhs: usize) -> Option<Self> {
                match self.0.checked_add(rhs) {
                    Some(addr) => Self::try_new(addr),
                    None => None,
                }
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:#x})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:#x}", self.0)
            }
        }

        impl From<$name> for usize {
            #[inline]
            fn from(addr: $name) -> usize {
                addr.0
            }
        }

        impl Add<usize> for $name {
            type Output = Self;

            #[inline]
            fn add(self, rhs: usize) -> Self::Output {
                Self::new(self.0 + rhs)
            }
        }

        impl Sub<usize> for $name {
            type Output = Self;

            #[inline]
            fn sub(self, rhs: usize) -> Self::Output {
                Self::new(self.0 - rhs)
            }
        }

        impl Sub<$name> for $name {
            type Output = usize;

            #[inline]
            fn sub(self, rhs: $name) -> Self::Output {
                self.0 - rhs.0
            }
        }
    };
}

impl_address_common!(
    PhysicalAddress,
    arch::validate_physical,
    "physical address exceeds maximum width",
    "A physical memory address."
);

impl PhysicalAddress {
    /// Returns the frame containing this address.
    #[inline]
    pub const fn frame_number(self) -> FrameNumber {
        FrameNumber::new(self.0 / arch::PAGE_SIZE)
    }
}

impl_address_common!(
    VirtualAddress,
    arch::validate_virtual,
    "virtual address is not valid",
    "A virtual memory address in a user address space."
);

impl VirtualAddress {
    /// Returns the page containing this address.
    #[inline]
    pub const fn page_number(self) -> PageNumber {
        PageNumber::new(self.0 / arch::PAGE_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn physical_rejects_addresses_past_width() {
        assert!(PhysicalAddress::try_new(1usize << arch::MAX_PHYSICAL_BITS).is_none());
        assert!(PhysicalAddress::try_new((1usize << arch::MAX_PHYSICAL_BITS) - 1).is_some());
    }

    #[test]
    #[should_panic(expected = "virtual address is not valid")]
    fn virtual_new_panics_past_width() {
        VirtualAddress::new(1usize << arch::MAX_VIRTUAL_BITS);
    }

    #[test]
    fn alignment_helpers() {
        let addr = VirtualAddress::new(0x0124);
        assert!(!addr.is_aligned(arch::PAGE_SIZE));
        assert_eq!(addr.align_down(arch::PAGE_SIZE), VirtualAddress::new(0x0120));
        assert_eq!(addr.align_up(arch::PAGE_SIZE), VirtualAddress::new(0x0130));
        assert_eq!(addr.page_offset(), 0x4);
        assert_eq!(VirtualAddress::new(0x0130).align_up(arch::PAGE_SIZE), VirtualAddress::new(0x0130));
    }

    #[test]
    fn checked_add_stops_at_width() {
        let top = VirtualAddress::new(0xFFF0);
        assert_eq!(top.checked_add(0x0F), Some(VirtualAddress::new(0xFFFF)));
        assert_eq!(top.checked_add(0x10), None);
        assert_eq!(top.checked_add(usize::MAX), None);
    }

    #[test]
    fn frame_and_page_numbers() {
        assert_eq!(PhysicalAddress::new(0x0125).frame_number(), FrameNumber::new(0x12));
        assert_eq!(VirtualAddress::new(0x0400).page_number(), PageNumber::new(0x40));
    }

    #[test]
    fn arithmetic() {
        let a = PhysicalAddress::new(0x0150);
        assert_eq!(a + 0x10, PhysicalAddress::new(0x0160));
        assert_eq!(a - 0x50, PhysicalAddress::new(0x0100));
        assert_eq!(a - PhysicalAddress::new(0x0100), 0x50);
    }

    #[test]
    fn formatting() {
        let addr = VirtualAddress::new(0x0400);
        assert_eq!(format!("{addr}"), "0x400");
        assert_eq!(format!("{addr:?}"), "VirtualAddress(0x400)");
    }
}

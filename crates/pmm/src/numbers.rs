//! Page and frame number types.

use core::fmt;
use core::ops::{Add, Sub};

use crate::{PhysicalAddress, VirtualAddress, arch};

macro_rules! impl_page_number_common {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[repr(transparent)]
        pub struct $name(usize);

        impl $name {
            /// Creates a new page/frame number.
            #[inline]
            pub const fn new(number: usize) -> Self {
                Self(number)
            }

            /// Returns the raw page/frame number.
            #[inline]
            pub const fn as_usize(self) -> usize {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl Add<usize> for $name {
            type Output = Self;

            #[inline]
            fn add(self, rhs: usize) -> Self::Output {
                Self(self.0 + rhs)
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

impl_page_number_common!(
    FrameNumber,
    "A physical frame number. Frame `n` starts at physical address `n * PAGE_SIZE`."
);

impl FrameNumber {
    /// Returns the physical address at the start of this frame.
    #[inline]
    pub const fn start(self) -> PhysicalAddress {
        PhysicalAddress::new(self.0 * arch::PAGE_SIZE)
    }
}

impl_page_number_common!(
    PageNumber,
    "A virtual page number. Page `n` starts at virtual address `n * PAGE_SIZE`."
);

impl PageNumber {
    /// Returns the virtual address at the start of this page.
    #[inline]
    pub const fn start(self) -> VirtualAddress {
        VirtualAddress::new(self.0 * arch::PAGE_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_start_scales_by_page_size() {
        assert_eq!(FrameNumber::new(3).start(), PhysicalAddress::new(3 * arch::PAGE_SIZE));
        assert_eq!(PageNumber::new(0x40).start(), VirtualAddress::new(0x0400));
    }

    #[test]
    fn arithmetic_and_formatting() {
        let frame = FrameNumber::new(7);
        assert_eq!(frame + 3, FrameNumber::new(10));
        assert_eq!(FrameNumber::new(10) - frame, 3);
        assert_eq!(format!("{frame:?}"), "FrameNumber(7)");
        assert_eq!(format!("{frame}"), "7");
    }
}

//! Byte-level access to physical frames.
//!
//! Supports two modes:
//! - Direct map: all of physical memory is mapped at a fixed kernel virtual offset.
//! - Emulated: physical memory is a host buffer (testing mode).

use crate::PhysicalAddress;

#[cfg(any(test, feature = "software-emulation"))]
use crate::arch::EmulatedMemory;

/// Kernel access path to physical memory.
pub enum PhysicalMemory {
    /// Physical address `p` is readable at kernel virtual address `p + offset`.
    DirectMap { offset: usize },
    /// Emulated physical memory.
    #[cfg(any(test, feature = "software-emulation"))]
    Emulated(EmulatedMemory),
}

impl PhysicalMemory {
    /// Creates an accessor for a direct map at `offset`.
    ///
    /// # Safety
    ///
    /// Every usable physical frame must be mapped read-write at `offset` for as long as
    /// this value is alive.
    pub const unsafe fn direct_map(offset: usize) -> Self {
        Self::DirectMap { offset }
    }

    /// Creates `size` bytes of zeroed emulated memory.
    #[cfg(any(test, feature = "software-emulation"))]
    pub fn emulated(size: usize) -> Self {
        Self::Emulated(EmulatedMemory::new(size))
    }

    fn pointer(&self, phys: PhysicalAddress, len: usize) -> *mut u8 {
        match self {
            Self::DirectMap { offset } => {
                let _ = len;
                phys.as_usize().wrapping_add(*offset) as *mut u8
            }
            #[cfg(any(test, feature = "software-emulation"))]
            Self::Emulated(memory) => memory.translate(phys.as_usize(), len),
        }
    }

    // The following accessors rely on the frame allocator: a caller only touches
    // frames it owns through a run, so no two callers alias the same bytes.

    /// Fills `len` bytes at `phys` with zeros.
    pub(crate) fn zero(&self, phys: PhysicalAddress, len: usize) {
        let ptr = self.pointer(phys, len);
        // SAFETY: the range is owned by the caller and mapped (see above).
        unsafe { core::ptr::write_bytes(ptr, 0, len) };
    }

    /// Copies `len` bytes from `from` to `to`. The ranges must not overlap.
    pub(crate) fn copy(&self, from: PhysicalAddress, to: PhysicalAddress, len: usize) {
        let src = self.pointer(from, len);
        let dst = self.pointer(to, len);
        // SAFETY: both ranges are owned by the caller, and distinct runs never overlap.
        unsafe { core::ptr::copy_nonoverlapping(src, dst, len) };
    }

    /// Reads `buf.len()` bytes starting at `phys`.
    ///
    /// The caller must own the frames through a [`FrameRun`](crate::FrameRun) or a
    /// committed address space.
    pub fn read(&self, phys: PhysicalAddress, buf: &mut [u8]) {
        let src = self.pointer(phys, buf.len());
        // SAFETY: the range is owned by the caller and mapped.
        unsafe { core::ptr::copy_nonoverlapping(src, buf.as_mut_ptr(), buf.len()) };
    }

    /// Writes `bytes` starting at `phys`. Same ownership rule as [`read`](Self::read).
    pub fn write(&self, phys: PhysicalAddress, bytes: &[u8]) {
        let dst = self.pointer(phys, bytes.len());
        // SAFETY: the range is owned by the caller and mapped.
        unsafe { core::ptr::copy_nonoverlapping(bytes.as_ptr(), dst, bytes.len()) };
    }
}

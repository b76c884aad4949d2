//! Boot-time memory map.
//!
//! To build a frame allocator, implement the [`BootMemoryRegion`] trait on your
//! bootloader's memory map entry type and pass the entries to
//! [`FrameAllocator::bootstrap`](crate::FrameAllocator::bootstrap):
//!
//! ```ignore
//! struct MyBootEntry { /* ... */ }
//!
//! impl BootMemoryRegion for MyBootEntry {
//!     fn base(&self) -> PhysicalAddress { /* ... */ }
//!     fn size(&self) -> usize { /* ... */ }
//!     fn is_usable(&self) -> bool { /* ... */ }
//! }
//!
//! let frames = FrameAllocator::bootstrap(boot_entries, memory);
//! ```

use crate::{FrameNumber, PhysicalAddress, arch};

/// Represents a single entry in a boot-time memory map.
pub trait BootMemoryRegion {
    /// Returns the base physical address of this region.
    fn base(&self) -> PhysicalAddress;

    /// Returns the size of this region in bytes.
    fn size(&self) -> usize;

    /// Returns whether this region contains usable memory.
    ///
    /// Usable memory can be freely handed out by the frame allocator. Memory occupied
    /// by the kernel image, firmware tables or devices must return `false`.
    fn is_usable(&self) -> bool;
}

/// Returns the usable frames of `region` as a half-open frame range, or `None` if the
/// region is not usable or empty.
///
/// # Panics
///
/// Panics if a usable region's base or size is not page-aligned.
pub(crate) fn usable_frames<R: BootMemoryRegion>(region: &R) -> Option<(FrameNumber, FrameNumber)> {
    if !region.is_usable() || region.size() == 0 {
        return None;
    }

    assert!(
        region.base().is_aligned(arch::PAGE_SIZE),
        "usable memory at {} is not page-aligned",
        region.base()
    );
    assert!(
        region.size() % arch::PAGE_SIZE == 0,
        "usable memory at {} has a size of {:#x}, which is not page-aligned",
        region.base(),
        region.size()
    );

    let start = region.base().frame_number();
    Some((start, start + region.size() / arch::PAGE_SIZE))
}

/// Returns the smallest frame range covering every usable region.
pub(crate) fn usable_span<R: BootMemoryRegion>(regions: &[R]) -> Option<(FrameNumber, FrameNumber)> {
    regions
        .iter()
        .filter_map(usable_frames)
        .reduce(|(lo, hi), (start, end)| (lo.min(start), hi.max(end)))
}

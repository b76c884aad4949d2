//! First-fit physical frame allocator.
//!
//! Hands out runs of physically contiguous frames from a flat table built once at
//! boot. A run is identified by its first frame, and releasing it frees (and zeroes)
//! every frame of the run at once; runs are never partially freed.

use alloc::sync::Arc;
use core::fmt;

use spin::Mutex;

use crate::frame::FrameTable;
use crate::{BootMemoryRegion, FrameNumber, FrameState, PhysicalAddress, PhysicalMemory, arch};

/// Errors that can occur during frame allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AllocError {
    /// No run of free, physically adjacent frames is long enough.
    #[error("out of physical memory")]
    OutOfMemory,
    /// A run of zero frames was requested.
    #[error("cannot allocate an empty run")]
    EmptyRun,
}

/// Errors that can occur when releasing a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ReleaseError {
    /// The address is not covered by the frame table.
    #[error("address is outside physical memory")]
    OutOfRange,
    /// The frame is not part of an allocated run.
    #[error("frame is not allocated")]
    NotAllocated,
    /// The frame belongs to a run but is not its first frame.
    #[error("frame is inside the run starting at frame {head}")]
    NotRunHead { head: FrameNumber },
}

/// The physical frame allocator.
pub struct FrameAllocator {
    table: Mutex<FrameTable>,
    memory: PhysicalMemory,
    total: usize,
}

impl FrameAllocator {
    /// Builds the frame table from the usable regions of a boot memory map.
    ///
    /// # Panics
    ///
    /// Panics if a usable region is not page-aligned.
    pub fn bootstrap<R: BootMemoryRegion>(regions: &[R], memory: PhysicalMemory) -> Self {
        let table = FrameTable::from_boot_map(regions);
        let total = table.managed();
        log::info!(
            "frame table: {} frames of {} bytes ({} slots)",
            total,
            arch::PAGE_SIZE,
            table.len()
        );
        Self {
            table: Mutex::new(table),
            memory,
            total,
        }
    }

    /// Allocates `frames` physically contiguous frames and returns the address of
    /// the first.
    ///
    /// The contents of the run are whatever the previous owner left behind, which
    /// is zero unless the frames have never been released.
    pub fn allocate(&self, frames: usize) -> Result<PhysicalAddress, AllocError> {
        if frames == 0 {
            return Err(AllocError::EmptyRun);
        }

        let head = self.table.lock().allocate_first_fit(frames);
        match head {
            Some(head) => {
                log::trace!("allocated {} frames at {}", frames, head.start());
                Ok(head.start())
            }
            None => {
                log::warn!("unable to allocate a run of {} frames", frames);
                Err(AllocError::OutOfMemory)
            }
        }
    }

    /// Releases the run beginning at `start`, zeroing it first. Returns the number of
    /// frames freed.
    pub fn release(&self, start: PhysicalAddress) -> Result<usize, ReleaseError> {
        if !start.is_aligned(arch::PAGE_SIZE) {
            return Err(ReleaseError::NotAllocated);
        }

        let mut table = self.table.lock();
        let frames = table.run_length(start.frame_number())?;
        self.memory.zero(start, frames * arch::PAGE_SIZE);
        let freed = table.release(start.frame_number())?;
        log::trace!("released {} frames at {}", freed, start);
        Ok(freed)
    }

    /// Allocates a run that is released when the returned handle is dropped.
    pub fn allocate_run(self: &Arc<Self>, frames: usize) -> Result<FrameRun, AllocError> {
        let start = self.allocate(frames)?;
        Ok(FrameRun {
            allocator: Arc::clone(self),
            start,
            frames,
        })
    }

    /// Returns the number of frames managed by the allocator.
    pub fn total_frames(&self) -> usize {
        self.total
    }

    /// Returns the number of frames currently free.
    pub fn free_frames(&self) -> usize {
        self.table.lock().free()
    }

    /// Returns whether the frame containing `addr` is free.
    pub fn is_free(&self, addr: PhysicalAddress) -> bool {
        self.table.lock().state(addr.frame_number()) == Some(FrameState::Free)
    }

    /// Returns the physical memory the frames live in.
    pub fn memory(&self) -> &PhysicalMemory {
        &self.memory
    }
}

/// An owned run of physically contiguous frames.
pub struct FrameRun {
    allocator: Arc<FrameAllocator>,
    start: PhysicalAddress,
    frames: usize,
}

impl FrameRun {
    /// Returns the physical address of the first frame.
    pub fn start(&self) -> PhysicalAddress {
        self.start
    }

    /// Returns the number of frames in the run.
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Returns the size of the run in bytes.
    pub fn len_bytes(&self) -> usize {
        self.frames * arch::PAGE_SIZE
    }

    pub(crate) fn memory(&self) -> &PhysicalMemory {
        &self.allocator.memory
    }
}

impl fmt::Debug for FrameRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameRun")
            .field("start", &self.start)
            .field("frames", &self.frames)
            .finish()
    }
}

impl Drop for FrameRun {
    fn drop(&mut self) {
        if let Err(err) = self.allocator.release(self.start) {
            log::error!("failed to release run at {}: {}", self.start, err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::PAGE_SIZE;
    use crate::memmap::tests::TestRegion;

    fn allocator(frames: usize) -> Arc<FrameAllocator> {
        Arc::new(FrameAllocator::bootstrap(
            &[TestRegion::usable(0, frames * PAGE_SIZE)],
            PhysicalMemory::emulated(frames * PAGE_SIZE),
        ))
    }

    #[test]
    fn allocate_returns_distinct_contiguous_runs() {
        let frames = allocator(16);
        let a = frames.allocate(4).unwrap();
        let b = frames.allocate(3).unwrap();
        assert_eq!(a, PhysicalAddress::new(0));
        assert_eq!(b, PhysicalAddress::new(4 * PAGE_SIZE));
        assert_eq!(frames.free_frames(), 9);
        assert!(!frames.is_free(a + 3 * PAGE_SIZE));
        assert!(frames.is_free(b + 3 * PAGE_SIZE));
    }

    #[test]
    fn allocate_rejects_empty_and_oversized_runs() {
        let frames = allocator(4);
        assert_eq!(frames.allocate(0), Err(AllocError::EmptyRun));
        assert_eq!(frames.allocate(5), Err(AllocError::OutOfMemory));
        assert_eq!(frames.free_frames(), 4);
    }

    #[test]
    fn release_zeroes_and_frees_the_run() {
        let frames = allocator(8);
        let start = frames.allocate(2).unwrap();
        frames.memory().write(start, &[0x5A; 2 * PAGE_SIZE]);

        assert_eq!(frames.release(start), Ok(2));
        assert_eq!(frames.free_frames(), 8);

        let again = frames.allocate(2).unwrap();
        assert_eq!(again, start);
        let mut buf = [0xFFu8; 2 * PAGE_SIZE];
        frames.memory().read(again, &mut buf);
        assert!(buf.iter().all(|b| *b == 0));
    }

    #[test]
    fn release_inside_run_is_rejected() {
        let frames = allocator(8);
        let start = frames.allocate(3).unwrap();
        assert_eq!(
            frames.release(start + PAGE_SIZE),
            Err(ReleaseError::NotRunHead {
                head: start.frame_number()
            })
        );
        assert_eq!(frames.release(start + 1), Err(ReleaseError::NotAllocated));
        assert_eq!(frames.free_frames(), 5);
    }

    #[test]
    fn freed_runs_coalesce_for_first_fit() {
        let frames = allocator(6);
        let a = frames.allocate(2).unwrap();
        let b = frames.allocate(2).unwrap();
        let _c = frames.allocate(2).unwrap();
        assert_eq!(frames.allocate(4), Err(AllocError::OutOfMemory));

        frames.release(a).unwrap();
        frames.release(b).unwrap();
        assert_eq!(frames.allocate(4), Ok(a));
    }

    #[test]
    fn frame_run_releases_on_drop() {
        let frames = allocator(8);
        let run = frames.allocate_run(5).unwrap();
        assert_eq!(run.frames(), 5);
        assert_eq!(run.len_bytes(), 5 * PAGE_SIZE);
        assert_eq!(frames.free_frames(), 3);
        drop(run);
        assert_eq!(frames.free_frames(), 8);
    }

    #[test]
    fn regions_only_join_when_adjacent() {
        let frames = Arc::new(FrameAllocator::bootstrap(
            &[
                TestRegion::usable(0, 2 * PAGE_SIZE),
                TestRegion::reserved(2 * PAGE_SIZE, PAGE_SIZE),
                TestRegion::usable(3 * PAGE_SIZE, 2 * PAGE_SIZE),
                TestRegion::usable(5 * PAGE_SIZE, PAGE_SIZE),
            ],
            PhysicalMemory::emulated(6 * PAGE_SIZE),
        ));
        assert_eq!(frames.total_frames(), 5);
        assert_eq!(frames.allocate(3), Ok(PhysicalAddress::new(3 * PAGE_SIZE)));
        assert_eq!(frames.allocate(3), Err(AllocError::OutOfMemory));
        assert_eq!(frames.allocate(2), Ok(PhysicalAddress::new(0)));
    }

    #[test]
    #[should_panic(expected = "is not page-aligned")]
    fn bootstrap_rejects_misaligned_ram() {
        FrameAllocator::bootstrap(
            &[TestRegion::usable(8, 4 * PAGE_SIZE)],
            PhysicalMemory::emulated(8 * PAGE_SIZE),
        );
    }
}

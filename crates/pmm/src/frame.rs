//! The flat frame table.
//!
//! One [`FrameState`] per frame between the lowest and highest usable address of the
//! boot memory map. Holes between usable regions are [`FrameState::Reserved`] and
//! are never handed out, so a run never spans a hole.

use alloc::boxed::Box;
use alloc::vec;

use crate::memmap::{self, BootMemoryRegion};
use crate::{FrameNumber, ReleaseError};

/// State of a single physical frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    /// Not usable RAM.
    Reserved,
    /// Available for allocation.
    Free,
    /// First frame of an allocated run of `frames` frames.
    Head { frames: usize },
    /// A later frame of the run starting at `head`.
    Member { head: FrameNumber },
}

pub(crate) struct FrameTable {
    base: FrameNumber,
    states: Box<[FrameState]>,
    free: usize,
}

impl FrameTable {
    pub(crate) fn from_boot_map<R: BootMemoryRegion>(regions: &[R]) -> Self {
        let Some((base, end)) = memmap::usable_span(regions) else {
            return Self {
                base: FrameNumber::new(0),
                states: Box::new([]),
                free: 0,
            };
        };

        let mut states = vec![FrameState::Reserved; end - base].into_boxed_slice();
        let mut free = 0;
        for (start, end) in regions.iter().filter_map(memmap::usable_frames) {
            for state in &mut states[start - base..end - base] {
                if *state == FrameState::Reserved {
                    *state = FrameState::Free;
                    free += 1;
                }
            }
        }

        Self { base, states, free }
    }

    pub(crate) fn len(&self) -> usize {
        self.states.len()
    }

    pub(crate) fn free(&self) -> usize {
        self.free
    }

    /// Frames that are either free or allocated.
    pub(crate) fn managed(&self) -> usize {
        self.states
            .iter()
            .filter(|state| **state != FrameState::Reserved)
            .count()
    }

    fn index(&self, frame: FrameNumber) -> Option<usize> {
        let index = frame.as_usize().checked_sub(self.base.as_usize())?;
        (index < self.states.len()).then_some(index)
    }

    pub(crate) fn state(&self, frame: FrameNumber) -> Option<FrameState> {
        self.index(frame).map(|index| self.states[index])
    }

    /// Finds the first run of `count` free, physically adjacent frames and marks it
    /// allocated.
    pub(crate) fn allocate_first_fit(&mut self, count: usize) -> Option<FrameNumber> {
        debug_assert!(count > 0);
        if count > self.free {
            return None;
        }

        let mut run_start = 0;
        let mut run_len = 0;
        for (index, state) in self.states.iter().enumerate() {
            if *state != FrameState::Free {
                run_len = 0;
                continue;
            }
            if run_len == 0 {
                run_start = index;
            }
            run_len += 1;
            if run_len == count {
                break;
            }
        }
        if run_len < count {
            return None;
        }

        let head = self.base + run_start;
        self.states[run_start] = FrameState::Head { frames: count };
        for state in &mut self.states[run_start + 1..run_start + count] {
            *state = FrameState::Member { head };
        }
        self.free -= count;
        Some(head)
    }

    /// Validates that `head` starts an allocated run and returns its length.
    pub(crate) fn run_length(&self, head: FrameNumber) -> Result<usize, ReleaseError> {
        let index = self.index(head).ok_or(ReleaseError::OutOfRange)?;
        match self.states[index] {
            FrameState::Head { frames } => Ok(frames),
            FrameState::Member { head } => Err(ReleaseError::NotRunHead { head }),
            FrameState::Free | FrameState::Reserved => Err(ReleaseError::NotAllocated),
        }
    }

    /// Marks every frame of the run starting at `head` free.
    pub(crate) fn release(&mut self, head: FrameNumber) -> Result<usize, ReleaseError> {
        let frames = self.run_length(head)?;
        let index = head - self.base;
        for state in &mut self.states[index..index + frames] {
            *state = FrameState::Free;
        }
        self.free += frames;
        Ok(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memmap::tests::TestRegion;
    use crate::arch::PAGE_SIZE;

    fn table(regions: &[TestRegion]) -> FrameTable {
        FrameTable::from_boot_map(regions)
    }

    #[test]
    fn holes_between_regions_are_reserved() {
        let t = table(&[
            TestRegion::usable(0, 4 * PAGE_SIZE),
            TestRegion::usable(6 * PAGE_SIZE, 2 * PAGE_SIZE),
        ]);
        assert_eq!(t.len(), 8);
        assert_eq!(t.free(), 6);
        assert_eq!(t.managed(), 6);
        assert_eq!(t.state(FrameNumber::new(4)), Some(FrameState::Reserved));
        assert_eq!(t.state(FrameNumber::new(6)), Some(FrameState::Free));
        assert_eq!(t.state(FrameNumber::new(8)), None);
    }

    #[test]
    fn first_fit_skips_runs_that_are_too_short() {
        let mut t = table(&[
            TestRegion::usable(0, 2 * PAGE_SIZE),
            TestRegion::usable(3 * PAGE_SIZE, 4 * PAGE_SIZE),
        ]);
        assert_eq!(t.allocate_first_fit(3), Some(FrameNumber::new(3)));
        assert_eq!(t.allocate_first_fit(2), Some(FrameNumber::new(0)));
        assert_eq!(t.allocate_first_fit(2), None);
        assert_eq!(t.allocate_first_fit(1), Some(FrameNumber::new(6)));
        assert_eq!(t.free(), 0);
    }

    #[test]
    fn run_members_record_their_head() {
        let mut t = table(&[TestRegion::usable(0, 8 * PAGE_SIZE)]);
        let head = t.allocate_first_fit(3).unwrap();
        assert_eq!(t.state(head), Some(FrameState::Head { frames: 3 }));
        assert_eq!(t.state(head + 2), Some(FrameState::Member { head }));
        assert_eq!(t.state(head + 3), Some(FrameState::Free));
    }

    #[test]
    fn release_frees_whole_run() {
        let mut t = table(&[TestRegion::usable(0, 8 * PAGE_SIZE)]);
        let head = t.allocate_first_fit(5).unwrap();
        assert_eq!(t.release(head), Ok(5));
        assert_eq!(t.free(), 8);
        assert!(
            (0..8).all(|i| t.state(FrameNumber::new(i)) == Some(FrameState::Free))
        );
    }

    #[test]
    fn release_rejects_invalid_targets() {
        let mut t = table(&[TestRegion::usable(PAGE_SIZE, 8 * PAGE_SIZE)]);
        let head = t.allocate_first_fit(2).unwrap();
        assert_eq!(
            t.release(head + 1),
            Err(ReleaseError::NotRunHead { head })
        );
        assert_eq!(t.release(head + 2), Err(ReleaseError::NotAllocated));
        assert_eq!(t.release(FrameNumber::new(0)), Err(ReleaseError::OutOfRange));
        assert_eq!(t.release(FrameNumber::new(9)), Err(ReleaseError::OutOfRange));
        assert_eq!(t.free(), 6);
    }

    #[test]
    fn empty_boot_map_has_no_frames() {
        let mut t = table(&[]);
        assert_eq!(t.len(), 0);
        assert_eq!(t.allocate_first_fit(1), None);
    }
}

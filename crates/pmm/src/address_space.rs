//! Per-process address spaces.
//!
//! An address space has up to two data segments (typically text and data) plus a
//! fixed-size stack ending at [`USER_STACK_TOP`](crate::arch::USER_STACK_TOP). Each
//! region is backed by a single run of physically contiguous frames committed up
//! front by [`AddressSpace::prepare_load`]; nothing is mapped lazily, so the fault
//! handler only ever looks translations up.
//!
//! While the loader is populating the space it is *incomplete* and every page is
//! writable. [`AddressSpace::complete_load`] switches on the segments' write
//! protection.

use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::tlb::{self, Tlb};
use crate::{AllocError, FrameAllocator, FrameRun, PhysicalAddress, VirtualAddress, arch};

/// Number of data segments an address space can hold.
pub const MAX_SEGMENTS: usize = 2;

/// Errors from [`AddressSpace::define_region`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RegionError {
    /// Both segment slots are already taken.
    #[error("address space already has two segments")]
    TooManyRegions,
    /// The region extends past the end of the user address space.
    #[error("region does not fit in the address space")]
    OutOfRange,
}

/// Errors from kernel accesses to user memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AccessError {
    /// Part of the range is not inside any region.
    #[error("bad user address {0:#x}")]
    BadAddress(usize),
    /// A write hit a read-only segment of a complete space.
    #[error("user address {0:#x} is read-only")]
    ReadOnly(usize),
    /// The space is complete and no longer accepts loader writes.
    #[error("address space is no longer loading")]
    NotLoading,
    /// No NUL terminator within the permitted length.
    #[error("string exceeds {0} bytes")]
    TooLong(usize),
}

/// Which region of an address space an address falls in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    /// Data segment 0 or 1.
    Segment(usize),
    /// The user stack.
    Stack,
}

/// Result of looking up an address in an address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Translation {
    /// The region containing the address.
    pub region: RegionKind,
    /// Physical frame backing the page.
    pub frame: PhysicalAddress,
    /// Whether user writes to the page are allowed right now.
    pub writable: bool,
}

/// One data segment.
#[derive(Debug)]
pub struct Segment {
    base: VirtualAddress,
    pages: usize,
    writable: bool,
    frames: Option<FrameRun>,
}

impl Segment {
    /// Returns the first virtual address of the segment.
    pub fn base(&self) -> VirtualAddress {
        self.base
    }

    /// Returns the number of pages in the segment.
    pub fn pages(&self) -> usize {
        self.pages
    }

    /// Returns whether the segment is writable once loading completes.
    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// Returns the physical base of the segment, if committed.
    pub fn frame_base(&self) -> Option<PhysicalAddress> {
        self.frames.as_ref().map(FrameRun::start)
    }

    fn contains(&self, page: VirtualAddress) -> bool {
        let offset = page.as_usize().wrapping_sub(self.base.as_usize());
        page >= self.base && offset < self.pages * arch::PAGE_SIZE
    }
}

/// A user address space.
pub struct AddressSpace {
    frames: Arc<FrameAllocator>,
    segments: [Option<Segment>; MAX_SEGMENTS],
    stack: Option<FrameRun>,
    committed: bool,
    complete: bool,
}

impl AddressSpace {
    /// Creates an empty space drawing its frames from `frames`.
    pub fn new(frames: Arc<FrameAllocator>) -> Self {
        Self {
            frames,
            segments: [None, None],
            stack: None,
            committed: false,
            complete: false,
        }
    }

    /// Declares a segment covering `[vaddr, vaddr + size)`, rounded outward to page
    /// boundaries.
    ///
    /// # Panics
    ///
    /// Panics if frames were already committed.
    pub fn define_region(
        &mut self,
        vaddr: VirtualAddress,
        size: usize,
        writable: bool,
    ) -> Result<(), RegionError> {
        assert!(!self.committed, "region defined after frames were committed");

        let base = vaddr.align_down(arch::PAGE_SIZE);
        let end = vaddr
            .as_usize()
            .checked_add(size)
            .and_then(|end| end.checked_add(arch::PAGE_SIZE - 1))
            .map(|end| end & !(arch::PAGE_SIZE - 1))
            .ok_or(RegionError::OutOfRange)?;
        if end > base.as_usize() && VirtualAddress::try_new(end - 1).is_none() {
            return Err(RegionError::OutOfRange);
        }

        let slot = self
            .segments
            .iter_mut()
            .find(|slot| slot.is_none())
            .ok_or(RegionError::TooManyRegions)?;
        let pages = (end - base.as_usize()) / arch::PAGE_SIZE;
        log::trace!(
            "region {} +{} pages ({})",
            base,
            pages,
            if writable { "rw" } else { "ro" }
        );
        *slot = Some(Segment {
            base,
            pages,
            writable,
            frames: None,
        });
        Ok(())
    }

    /// Commits and zero-fills frames for every segment and the stack.
    ///
    /// On failure the runs committed so far stay owned by the space and are released
    /// when it is dropped.
    ///
    /// # Panics
    ///
    /// Panics if called a second time.
    pub fn prepare_load(&mut self) -> Result<(), AllocError> {
        assert!(!self.committed, "address space committed twice");
        self.committed = true;

        for segment in self.segments.iter_mut().flatten() {
            if segment.pages > 0 {
                let run = self.frames.allocate_run(segment.pages)?;
                self.frames.memory().zero(run.start(), run.len_bytes());
                segment.frames = Some(run);
            }
        }

        let stack = self.frames.allocate_run(arch::STACK_PAGES)?;
        self.frames.memory().zero(stack.start(), stack.len_bytes());
        self.stack = Some(stack);
        Ok(())
    }

    /// Ends loading; segment write protection applies from now on.
    pub fn complete_load(&mut self) {
        self.complete = true;
    }

    /// Returns whether loading has completed.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Returns the initial user stack pointer.
    pub fn define_stack(&self) -> VirtualAddress {
        VirtualAddress::new(arch::USER_STACK_TOP)
    }

    /// Returns the segment in `slot`, if defined.
    pub fn segment(&self, slot: usize) -> Option<&Segment> {
        self.segments.get(slot).and_then(Option::as_ref)
    }

    /// Returns the physical base of the stack, if committed.
    pub fn stack_base(&self) -> Option<PhysicalAddress> {
        self.stack.as_ref().map(FrameRun::start)
    }

    /// Creates a deep copy with the same layout and contents, already complete.
    pub fn duplicate(&self) -> Result<AddressSpace, AllocError> {
        let mut copy = AddressSpace::new(Arc::clone(&self.frames));
        for (slot, segment) in copy.segments.iter_mut().zip(&self.segments) {
            *slot = segment.as_ref().map(|segment| Segment {
                base: segment.base,
                pages: segment.pages,
                writable: segment.writable,
                frames: None,
            });
        }
        copy.prepare_load()?;

        let memory = self.frames.memory();
        for (to, from) in copy.segments.iter().zip(&self.segments) {
            if let (Some(to), Some(from)) = (
                to.as_ref().and_then(|s| s.frames.as_ref()),
                from.as_ref().and_then(|s| s.frames.as_ref()),
            ) {
                memory.copy(from.start(), to.start(), from.len_bytes());
            }
        }
        if let (Some(to), Some(from)) = (&copy.stack, &self.stack) {
            memory.copy(from.start(), to.start(), from.len_bytes());
        }

        copy.complete = true;
        Ok(copy)
    }

    /// Looks up the page containing `vaddr`.
    ///
    /// Segments are searched before the stack. Returns `None` for an address outside
    /// every committed region.
    pub fn translate(&self, vaddr: VirtualAddress) -> Option<Translation> {
        let page = vaddr.align_down(arch::PAGE_SIZE);

        for (index, segment) in self.segments.iter().enumerate() {
            let Some(segment) = segment else { continue };
            if !segment.contains(page) {
                continue;
            }
            let run = segment.frames.as_ref()?;
            return Some(Translation {
                region: RegionKind::Segment(index),
                frame: run.start() + (page - segment.base),
                writable: !self.complete || segment.writable,
            });
        }

        let stack_base = VirtualAddress::new(arch::USER_STACK_BASE);
        if page >= stack_base && page.as_usize() < arch::USER_STACK_TOP {
            let run = self.stack.as_ref()?;
            return Some(Translation {
                region: RegionKind::Stack,
                frame: run.start() + (page - stack_base),
                writable: true,
            });
        }

        None
    }

    /// Splits `[vaddr, vaddr + len)` into page-bounded chunks and resolves each.
    fn walk(
        &self,
        vaddr: usize,
        len: usize,
        write: bool,
        mut f: impl FnMut(PhysicalAddress, usize, usize),
    ) -> Result<(), AccessError> {
        let mut done = 0;
        while done < len {
            let addr = vaddr.checked_add(done).ok_or(AccessError::BadAddress(vaddr))?;
            let user = VirtualAddress::try_new(addr).ok_or(AccessError::BadAddress(addr))?;
            let translation = self.translate(user).ok_or(AccessError::BadAddress(addr))?;
            if write && !translation.writable {
                return Err(AccessError::ReadOnly(addr));
            }

            let chunk = (arch::PAGE_SIZE - user.page_offset()).min(len - done);
            f(translation.frame + user.page_offset(), done, chunk);
            done += chunk;
        }
        Ok(())
    }

    /// Copies `buf.len()` bytes of user memory starting at `vaddr` into `buf`.
    pub fn copy_in(&self, vaddr: usize, buf: &mut [u8]) -> Result<(), AccessError> {
        let memory = self.frames.memory();
        self.walk(vaddr, buf.len(), false, |phys, offset, len| {
            memory.read(phys, &mut buf[offset..offset + len]);
        })
    }

    /// Copies a NUL-terminated string from user memory.
    ///
    /// At most `max` bytes, terminator included, are examined. The returned bytes
    /// exclude the terminator.
    pub fn copy_in_str(&self, vaddr: usize, max: usize) -> Result<Vec<u8>, AccessError> {
        let mut bytes = Vec::new();
        let mut chunk = [0u8; arch::PAGE_SIZE];

        while bytes.len() < max {
            let addr = vaddr
                .checked_add(bytes.len())
                .ok_or(AccessError::BadAddress(vaddr))?;
            let page_left = arch::PAGE_SIZE - (addr & (arch::PAGE_SIZE - 1));
            let len = page_left.min(max - bytes.len());
            self.copy_in(addr, &mut chunk[..len])?;

            if let Some(nul) = chunk[..len].iter().position(|b| *b == 0) {
                bytes.extend_from_slice(&chunk[..nul]);
                return Ok(bytes);
            }
            bytes.extend_from_slice(&chunk[..len]);
        }

        Err(AccessError::TooLong(max))
    }

    /// Copies `bytes` into user memory at `vaddr`, honoring write protection.
    pub fn copy_out(&mut self, vaddr: usize, bytes: &[u8]) -> Result<(), AccessError> {
        let memory = self.frames.memory();
        self.walk(vaddr, bytes.len(), true, |phys, offset, len| {
            memory.write(phys, &bytes[offset..offset + len]);
        })
    }

    /// Writes program contents while the space is still loading.
    pub fn load(&mut self, vaddr: VirtualAddress, bytes: &[u8]) -> Result<(), AccessError> {
        if self.complete {
            return Err(AccessError::NotLoading);
        }
        self.copy_out(vaddr.as_usize(), bytes)
    }

    /// Switches this space in on the current CPU.
    ///
    /// TLB entries carry no address-space tag, so every slot is invalidated.
    pub fn activate(&self, tlb: &mut dyn Tlb) {
        tlb::invalidate_all(tlb);
    }

    /// Returns the number of frames committed to this space.
    pub fn committed_frames(&self) -> usize {
        self.segments
            .iter()
            .flatten()
            .filter_map(|segment| segment.frames.as_ref())
            .chain(self.stack.as_ref())
            .map(FrameRun::frames)
            .sum()
    }
}

impl Drop for AddressSpace {
    fn drop(&mut self) {
        if self.committed {
            log::trace!("destroying address space ({} frames)", self.committed_frames());
        }
    }
}

impl core::fmt::Debug for AddressSpace {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AddressSpace")
            .field("segments", &self.segments)
            .field("stack", &self.stack)
            .field("complete", &self.complete)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::{PAGE_SIZE, STACK_PAGES, USER_STACK_BASE, USER_STACK_TOP};
    use crate::memmap::tests::TestRegion;
    use crate::{PhysicalMemory, SoftwareTlb, TlbEntry};

    const TEXT: usize = 0x0400;
    const DATA: usize = 0x1000;

    fn frames(count: usize) -> Arc<FrameAllocator> {
        Arc::new(FrameAllocator::bootstrap(
            &[TestRegion::usable(0, count * PAGE_SIZE)],
            PhysicalMemory::emulated(count * PAGE_SIZE),
        ))
    }

    fn loaded_space(frames: &Arc<FrameAllocator>) -> AddressSpace {
        let mut space = AddressSpace::new(Arc::clone(frames));
        space
            .define_region(VirtualAddress::new(TEXT), 2 * PAGE_SIZE, false)
            .unwrap();
        space
            .define_region(VirtualAddress::new(DATA), PAGE_SIZE, true)
            .unwrap();
        space.prepare_load().unwrap();
        space
    }

    #[test]
    fn define_region_rounds_outward() {
        let mut space = AddressSpace::new(frames(64));
        space
            .define_region(VirtualAddress::new(TEXT + 4), PAGE_SIZE, false)
            .unwrap();
        let segment = space.segment(0).unwrap();
        assert_eq!(segment.base(), VirtualAddress::new(TEXT));
        assert_eq!(segment.pages(), 2);
    }

    #[test]
    fn third_region_is_rejected() {
        let mut space = AddressSpace::new(frames(64));
        space.define_region(VirtualAddress::new(TEXT), 1, false).unwrap();
        space.define_region(VirtualAddress::new(DATA), 1, true).unwrap();
        assert_eq!(
            space.define_region(VirtualAddress::new(0x2000), 1, true),
            Err(RegionError::TooManyRegions)
        );
    }

    #[test]
    fn region_past_end_of_address_space_is_rejected() {
        let mut space = AddressSpace::new(frames(64));
        assert_eq!(
            space.define_region(VirtualAddress::new(0xFFF0), 2 * PAGE_SIZE, true),
            Err(RegionError::OutOfRange)
        );
    }

    #[test]
    fn prepare_load_commits_segments_and_stack() {
        let frames = frames(64);
        let space = loaded_space(&frames);
        assert_eq!(space.committed_frames(), 3 + STACK_PAGES);
        assert_eq!(frames.free_frames(), 64 - 3 - STACK_PAGES);
        assert_eq!(space.define_stack(), VirtualAddress::new(USER_STACK_TOP));
    }

    #[test]
    #[should_panic(expected = "address space committed twice")]
    fn prepare_load_twice_is_fatal() {
        let frames = frames(64);
        let mut space = loaded_space(&frames);
        let _ = space.prepare_load();
    }

    #[test]
    fn failed_prepare_load_is_released_on_drop() {
        let frames = frames(STACK_PAGES);
        let mut space = AddressSpace::new(Arc::clone(&frames));
        space.define_region(VirtualAddress::new(TEXT), 4 * PAGE_SIZE, false).unwrap();
        assert_eq!(space.prepare_load(), Err(AllocError::OutOfMemory));
        assert_eq!(frames.free_frames(), STACK_PAGES - 4);
        drop(space);
        assert_eq!(frames.free_frames(), STACK_PAGES);
    }

    #[test]
    fn dropping_space_returns_every_frame() {
        let frames = frames(64);
        let space = loaded_space(&frames);
        drop(space);
        assert_eq!(frames.free_frames(), 64);
    }

    #[test]
    fn write_protection_applies_after_complete() {
        let frames = frames(64);
        let mut space = loaded_space(&frames);
        let text = VirtualAddress::new(TEXT + 3);
        assert!(space.translate(text).unwrap().writable);

        space.complete_load();
        let translation = space.translate(text).unwrap();
        assert_eq!(translation.region, RegionKind::Segment(0));
        assert!(!translation.writable);
        assert!(space.translate(VirtualAddress::new(DATA)).unwrap().writable);

        let stack = space.translate(VirtualAddress::new(USER_STACK_TOP - 1)).unwrap();
        assert_eq!(stack.region, RegionKind::Stack);
        assert!(stack.writable);
    }

    #[test]
    fn translate_outside_regions_is_none() {
        let frames = frames(64);
        let space = loaded_space(&frames);
        assert!(space.translate(VirtualAddress::new(TEXT + 2 * PAGE_SIZE)).is_none());
        assert!(space.translate(VirtualAddress::new(USER_STACK_BASE - 1)).is_none());
        assert!(space.translate(VirtualAddress::new(USER_STACK_TOP)).is_none());
    }

    #[test]
    fn uncommitted_space_translates_nothing() {
        let mut space = AddressSpace::new(frames(64));
        space.define_region(VirtualAddress::new(TEXT), PAGE_SIZE, true).unwrap();
        assert!(space.translate(VirtualAddress::new(TEXT)).is_none());
    }

    #[test]
    fn copies_cross_page_boundaries() {
        let frames = frames(64);
        let mut space = loaded_space(&frames);
        let message = b"crosses a page edge!";
        space.copy_out(TEXT + 5, message).unwrap();

        let mut buf = [0u8; 20];
        space.copy_in(TEXT + 5, &mut buf).unwrap();
        assert_eq!(&buf, message);
    }

    #[test]
    fn copy_out_respects_write_protection() {
        let frames = frames(64);
        let mut space = loaded_space(&frames);
        space.load(VirtualAddress::new(TEXT), b"code").unwrap();
        space.complete_load();

        assert_eq!(space.copy_out(TEXT, b"x"), Err(AccessError::ReadOnly(TEXT)));
        assert_eq!(
            space.load(VirtualAddress::new(TEXT), b"x"),
            Err(AccessError::NotLoading)
        );
        assert_eq!(
            space.copy_out(0x3000, b"x"),
            Err(AccessError::BadAddress(0x3000))
        );
    }

    #[test]
    fn copy_in_str_stops_at_nul() {
        let frames = frames(64);
        let mut space = loaded_space(&frames);
        space.copy_out(DATA + 2, b"/bin/true\0junk").unwrap();
        assert_eq!(space.copy_in_str(DATA + 2, 64).unwrap(), b"/bin/true");
        assert_eq!(space.copy_in_str(DATA + 2, 9), Err(AccessError::TooLong(9)));
        assert_eq!(space.copy_in_str(DATA + 2, 10).unwrap(), b"/bin/true");
    }

    #[test]
    fn copy_in_rejects_unrepresentable_addresses() {
        let frames = frames(64);
        let space = loaded_space(&frames);
        let mut buf = [0u8; 4];
        assert!(matches!(
            space.copy_in(usize::MAX - 1, &mut buf),
            Err(AccessError::BadAddress(_))
        ));
    }

    #[test]
    fn duplicate_is_a_deep_copy() {
        let frames = frames(128);
        let mut original = loaded_space(&frames);
        original.copy_out(TEXT, b"text").unwrap();
        original.copy_out(DATA, b"data").unwrap();
        original.copy_out(USER_STACK_TOP - 5, b"stack").unwrap();
        original.complete_load();

        let mut copy = original.duplicate().unwrap();
        assert!(copy.is_complete());
        assert_eq!(copy.committed_frames(), original.committed_frames());
        assert_ne!(
            copy.segment(0).unwrap().frame_base(),
            original.segment(0).unwrap().frame_base()
        );

        let mut buf = [0u8; 5];
        copy.copy_in(USER_STACK_TOP - 5, &mut buf).unwrap();
        assert_eq!(&buf, b"stack");
        copy.copy_in(TEXT, &mut buf[..4]).unwrap();
        assert_eq!(&buf[..4], b"text");

        copy.copy_out(DATA, b"DATA").unwrap();
        original.copy_in(DATA, &mut buf[..4]).unwrap();
        assert_eq!(&buf[..4], b"data");
    }

    #[test]
    fn activate_flushes_tlb() {
        let frames = frames(64);
        let space = loaded_space(&frames);
        let mut tlb = SoftwareTlb::new();
        tlb::install(
            &mut tlb,
            TlbEntry::new(VirtualAddress::new(TEXT), PhysicalAddress::new(0), true),
        );
        space.activate(&mut tlb);
        assert!(tlb.probe(VirtualAddress::new(TEXT)).is_none());
    }
}

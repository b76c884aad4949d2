//! A 64-slot software-managed TLB, modeled after the MIPS R3000.

use crate::{PhysicalAddress, Tlb, TlbEntry, VirtualAddress};

use super::{PAGE_SIZE, interrupts_enabled};
use crate::arch::TLB_ENTRIES;

/// Outcome of a lookup that the emulated MMU could not satisfy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlbException {
    /// No valid entry for the page. Raised as a read or write fault.
    Miss,
    /// A valid entry exists but its dirty bit is clear and the access was a write.
    Modify,
}

/// The emulated TLB of one CPU.
pub struct SoftwareTlb {
    entries: [TlbEntry; TLB_ENTRIES],
    /// Replacement cursor, stepped down on every random write.
    random: usize,
}

impl SoftwareTlb {
    /// Creates a TLB with every slot invalid.
    pub const fn new() -> Self {
        Self {
            entries: [TlbEntry::INVALID; TLB_ENTRIES],
            random: TLB_ENTRIES - 1,
        }
    }

    /// Looks up `vaddr` the way the MMU would on a user access.
    pub fn translate(
        &self,
        vaddr: VirtualAddress,
        write: bool,
    ) -> Result<PhysicalAddress, TlbException> {
        let page = vaddr.align_down(PAGE_SIZE);
        let entry = self
            .entries
            .iter()
            .find(|entry| entry.is_valid() && entry.page() == page)
            .ok_or(TlbException::Miss)?;

        if write && !entry.is_writable() {
            return Err(TlbException::Modify);
        }
        Ok(entry.frame() + vaddr.page_offset())
    }
}

impl Default for SoftwareTlb {
    fn default() -> Self {
        Self::new()
    }
}

impl Tlb for SoftwareTlb {
    fn len(&self) -> usize {
        TLB_ENTRIES
    }

    fn read(&self, index: usize) -> TlbEntry {
        self.entries[index]
    }

    fn write(&mut self, index: usize, entry: TlbEntry) {
        assert!(!interrupts_enabled(), "TLB written with interrupts enabled");
        self.entries[index] = entry;
    }

    fn write_random(&mut self, entry: TlbEntry) {
        let index = self.random;
        self.random = if index == 0 { TLB_ENTRIES - 1 } else { index - 1 };
        self.write(index, entry);
    }
}

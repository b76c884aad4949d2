//! Translation lookaside buffer management.
//!
//! The TLB is software-managed: every miss traps into the kernel, which resolves the
//! address against the faulting process's [`AddressSpace`](crate::AddressSpace) and
//! installs a translation here. Installation runs with interrupts masked on the
//! current CPU, which is the only critical section of the memory subsystem that is
//! not a lock.
//!
//! This design assumes a single CPU. A multi-core port needs real shoot-downs in
//! [`shootdown_all`] and [`shootdown`] and a lock around installation.

use crate::{PhysicalAddress, VirtualAddress, arch};

/// Flags of a TLB entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TlbFlags(u8);

impl TlbFlags {
    /// The entry holds a live translation.
    const VALID: u8 = 1 << 0;

    /// Writes through the entry are permitted.
    const DIRTY: u8 = 1 << 1;

    /// Creates empty flags (entry invalid).
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Returns whether the valid bit is set.
    pub const fn is_valid(self) -> bool {
        (self.0 & Self::VALID) != 0
    }

    /// Returns whether the dirty (write-enable) bit is set.
    pub const fn is_dirty(self) -> bool {
        (self.0 & Self::DIRTY) != 0
    }

    /// Sets or clears the valid bit.
    pub fn set_valid(&mut self, valid: bool) {
        if valid {
            self.0 |= Self::VALID;
        } else {
            self.0 &= !Self::VALID;
        }
    }

    /// Sets or clears the dirty bit.
    pub fn set_dirty(&mut self, dirty: bool) {
        if dirty {
            self.0 |= Self::DIRTY;
        } else {
            self.0 &= !Self::DIRTY;
        }
    }
}

/// A single virtual page to physical frame translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlbEntry {
    page: VirtualAddress,
    frame: PhysicalAddress,
    flags: TlbFlags,
}

impl TlbEntry {
    /// An unused slot.
    pub const INVALID: Self = Self {
        page: VirtualAddress::zero(),
        frame: PhysicalAddress::zero(),
        flags: TlbFlags::empty(),
    };

    /// Creates a valid entry mapping `page` to `frame`.
    ///
    /// # Panics
    ///
    /// Panics if either address is not page-aligned.
    pub fn new(page: VirtualAddress, frame: PhysicalAddress, writable: bool) -> Self {
        assert!(page.is_aligned(arch::PAGE_SIZE), "TLB page must be page-aligned");
        assert!(frame.is_aligned(arch::PAGE_SIZE), "TLB frame must be page-aligned");

        let mut flags = TlbFlags::empty();
        flags.set_valid(true);
        flags.set_dirty(writable);
        Self { page, frame, flags }
    }

    /// Returns the virtual page of this entry.
    pub const fn page(&self) -> VirtualAddress {
        self.page
    }

    /// Returns the physical frame of this entry.
    pub const fn frame(&self) -> PhysicalAddress {
        self.frame
    }

    /// Returns the flags of this entry.
    pub const fn flags(&self) -> TlbFlags {
        self.flags
    }

    /// Returns whether the entry holds a live translation.
    pub const fn is_valid(&self) -> bool {
        self.flags.is_valid()
    }

    /// Returns whether writes through the entry are permitted.
    pub const fn is_writable(&self) -> bool {
        self.flags.is_dirty()
    }
}

/// A software-managed translation cache.
///
/// Implementations are per-CPU. Writers must hold an [`InterruptGuard`].
pub trait Tlb {
    /// Returns the number of slots.
    fn len(&self) -> usize;

    /// Reads the entry in slot `index`.
    fn read(&self, index: usize) -> TlbEntry;

    /// Writes `entry` into slot `index`.
    fn write(&mut self, index: usize, entry: TlbEntry);

    /// Writes `entry` into a slot chosen by the hardware replacement policy.
    fn write_random(&mut self, entry: TlbEntry);

    /// Returns the slot holding a valid translation for `page`, if any.
    fn probe(&self, page: VirtualAddress) -> Option<usize> {
        (0..self.len()).find(|&index| {
            let entry = self.read(index);
            entry.is_valid() && entry.page() == page
        })
    }
}

/// RAII guard that masks interrupts on creation and restores them on drop.
///
/// Interrupts are re-enabled on drop **only** if they were enabled when the guard
/// was created, so guards nest.
pub struct InterruptGuard {
    /// Whether interrupts were enabled when the guard was created.
    were_enabled: bool,
}

impl InterruptGuard {
    /// Masks interrupts if they are currently enabled and remembers the state.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        let enabled = arch::interrupts_enabled();
        if enabled {
            arch::disable_interrupts();
        }
        Self {
            were_enabled: enabled,
        }
    }
}

impl Default for InterruptGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        if self.were_enabled {
            arch::enable_interrupts();
        }
    }
}

/// Installs `entry`, returning the slot it landed in.
///
/// An existing translation for the same page is overwritten in place. Otherwise the
/// first invalid slot is used, and if every slot is valid the TLB picks a victim.
pub fn install(tlb: &mut dyn Tlb, entry: TlbEntry) -> Option<usize> {
    let _guard = InterruptGuard::new();

    let slot = tlb
        .probe(entry.page())
        .or_else(|| (0..tlb.len()).find(|&index| !tlb.read(index).is_valid()));

    match slot {
        Some(index) => {
            tlb.write(index, entry);
            log::trace!(
                "tlb[{}]: {} -> {} ({})",
                index,
                entry.page(),
                entry.frame(),
                if entry.is_writable() { "rw" } else { "ro" }
            );
            Some(index)
        }
        None => {
            tlb.write_random(entry);
            log::trace!(
                "tlb[random]: {} -> {} ({})",
                entry.page(),
                entry.frame(),
                if entry.is_writable() { "rw" } else { "ro" }
            );
            None
        }
    }
}

/// Invalidates every slot.
///
/// Called whenever a different address space is switched in, since entries carry no
/// address-space identifier.
pub fn invalidate_all(tlb: &mut dyn Tlb) {
    let _guard = InterruptGuard::new();
    for index in 0..tlb.len() {
        tlb.write(index, TlbEntry::INVALID);
    }
}

/// A request to drop one translation from other CPUs' TLBs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shootdown {
    /// The page whose translation is stale.
    pub page: VirtualAddress,
}

/// Drops every translation on every other CPU. No-op on a single CPU.
pub fn shootdown_all() {}

/// Drops one translation on every other CPU. No-op on a single CPU.
pub fn shootdown(request: &Shootdown) {
    let _ = request;
}

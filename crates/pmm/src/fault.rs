//! TLB fault resolution.
//!
//! Frames are committed when an address space is loaded, so a fault never
//! allocates: it looks the page up in the faulting space and installs a TLB entry
//! whose write permission reflects the space's loading state.

use crate::tlb::{self, Tlb, TlbEntry};
use crate::{AddressSpace, VirtualAddress, arch};

/// Kind of access that faulted, as reported by the trap handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum FaultKind {
    /// A load missed in the TLB.
    Read = 0,
    /// A store missed in the TLB.
    Write = 1,
    /// A store hit a TLB entry without write permission.
    ReadOnly = 2,
}

impl TryFrom<u32> for FaultKind {
    type Error = FaultError;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Self::Read),
            1 => Ok(Self::Write),
            2 => Ok(Self::ReadOnly),
            other => Err(FaultError::InvalidKind(other)),
        }
    }
}

/// Faults that cannot be resolved by installing a translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FaultError {
    /// The address is not inside any region of the space.
    #[error("access to unmapped address {0:#x}")]
    BadAddress(usize),
    /// A store to a read-only page.
    #[error("write to read-only address {0:#x}")]
    ReadOnly(usize),
    /// The trap handler reported an unknown fault code.
    #[error("unknown fault kind {0}")]
    InvalidKind(u32),
}

/// Computes the TLB entry that satisfies a fault at `addr`.
pub fn resolve(
    space: &AddressSpace,
    kind: FaultKind,
    addr: VirtualAddress,
) -> Result<TlbEntry, FaultError> {
    if kind == FaultKind::ReadOnly {
        return Err(FaultError::ReadOnly(addr.as_usize()));
    }

    let page = addr.align_down(arch::PAGE_SIZE);
    let translation = space
        .translate(page)
        .ok_or(FaultError::BadAddress(addr.as_usize()))?;
    Ok(TlbEntry::new(page, translation.frame, translation.writable))
}

/// Resolves a fault and installs the resulting entry in `tlb`.
///
/// Nothing is installed when resolution fails.
pub fn handle(
    space: &AddressSpace,
    tlb: &mut dyn Tlb,
    kind: FaultKind,
    addr: VirtualAddress,
) -> Result<TlbEntry, FaultError> {
    let entry = resolve(space, kind, addr)?;
    tlb::install(tlb, entry);
    Ok(entry)
}

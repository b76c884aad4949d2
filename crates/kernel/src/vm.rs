//! The page-fault path.

use pmm::fault::{self, FaultKind};
use pmm::{FaultError, VirtualAddress};

use crate::process::Process;
use crate::{Errno, Kernel, SIGSEGV};

impl Kernel {
    /// Handles a TLB fault of kind `code` at `addr` raised by `process`.
    ///
    /// A store to a read-only page of a process with an address space terminates
    /// the process and does not return.
    /// Otherwise the translation is installed in the current CPU's TLB, or an error
    /// is returned and nothing is installed.
    pub fn handle_fault(
        &self,
        process: Option<&Process>,
        code: u32,
        addr: usize,
    ) -> Result<(), Errno> {
        let kind = FaultKind::try_from(code)?;
        let Some(process) = process else {
            log::warn!("{:?} fault at {:#x} with no current process", kind, addr);
            return Err(Errno::BadAddress);
        };

        if process.space().is_none() {
            log::warn!(
                "pid {}: {:?} fault at {:#x} with no address space",
                process.pid(),
                kind,
                addr
            );
            return Err(Errno::BadAddress);
        }

        if kind == FaultKind::ReadOnly {
            log::debug!("pid {}: write to read-only page {:#x}", process.pid(), addr);
            self.terminate(process, SIGSEGV);
        }

        let vaddr = VirtualAddress::try_new(addr).ok_or(Errno::BadAddress)?;
        let space = process.space();
        let Some(space) = space.as_ref() else {
            return Err(Errno::BadAddress);
        };

        let mut result = Err(FaultError::BadAddress(addr));
        self.platform
            .with_tlb(&mut |tlb| result = fault::handle(space, tlb, kind, vaddr));
        match result {
            Ok(entry) => {
                log::trace!(
                    "pid {}: {:?} fault at {:#x} -> {}",
                    process.pid(),
                    kind,
                    addr,
                    entry.frame()
                );
                Ok(())
            }
            Err(err) => {
                log::debug!("pid {}: {}", process.pid(), err);
                Err(err.into())
            }
        }
    }
}

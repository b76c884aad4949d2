//! The process registry.
//!
//! Maps process identifiers to the state a parent needs to observe a child's exit.
//! An entry exists from the moment an identifier is handed out until the exit status
//! has been consumed by the parent, or, for orphans, until both the parent and the
//! child are gone.
//!
//! Lock order: the registry table lock is only held for reservation, lookup and
//! release, and never while an entry lock is held.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use core::fmt;

use spin::Mutex;

use crate::sync::CondVar;
use crate::{Errno, WaitStatus};

/// Lowest identifier handed to a process.
pub const PID_MIN: i32 = 2;

/// Highest identifier handed to a process.
pub const PID_MAX: i32 = 32767;

/// A process identifier.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Pid(i32);

impl Pid {
    pub const fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    pub const fn as_raw(self) -> i32 {
        self.0
    }
}

impl fmt::Debug for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pid({})", self.0)
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Exit bookkeeping of one process, guarded by its entry lock.
#[derive(Debug, Default)]
pub struct ExitState {
    /// `None` until the process exits.
    pub status: Option<WaitStatus>,
    /// The parent is blocked in `waitpid` on this entry.
    pub waiting: bool,
    /// The parent has read the status and the child may finish exiting.
    pub acknowledged: bool,
    /// The parent exited first; the child releases the entry itself.
    pub orphaned: bool,
}

/// A registry entry.
pub struct RegistryEntry {
    pid: Pid,
    state: Mutex<ExitState>,
    cv: CondVar,
}

impl RegistryEntry {
    fn new(pid: Pid) -> Self {
        Self {
            pid,
            state: Mutex::new(ExitState::default()),
            cv: CondVar::new(),
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn state(&self) -> &Mutex<ExitState> {
        &self.state
    }

    pub fn cv(&self) -> &CondVar {
        &self.cv
    }
}

impl fmt::Debug for RegistryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryEntry")
            .field("pid", &self.pid)
            .field("state", &*self.state.lock())
            .finish()
    }
}

struct Table {
    entries: BTreeMap<Pid, Arc<RegistryEntry>>,
    next: i32,
}

/// Identifier allocator and pid-to-entry map.
pub struct ProcessRegistry {
    table: Mutex<Table>,
    capacity: usize,
}

impl ProcessRegistry {
    /// Creates a registry holding at most `capacity` live identifiers.
    pub fn new(capacity: usize) -> Self {
        Self {
            table: Mutex::new(Table {
                entries: BTreeMap::new(),
                next: PID_MIN,
            }),
            capacity: capacity.min((PID_MAX - PID_MIN + 1) as usize),
        }
    }

    /// Assigns a fresh identifier and creates its entry.
    ///
    /// The entry is released again if the reservation is dropped without being
    /// [committed](PidReservation::commit).
    pub fn reserve(&self) -> Result<PidReservation<'_>, Errno> {
        let mut table = self.table.lock();
        if table.entries.len() >= self.capacity {
            log::warn!("process table full ({} entries)", table.entries.len());
            return Err(Errno::TooManyProcesses);
        }

        let mut candidate = table.next;
        while table.entries.contains_key(&Pid(candidate)) {
            candidate = if candidate == PID_MAX { PID_MIN } else { candidate + 1 };
        }
        table.next = if candidate == PID_MAX { PID_MIN } else { candidate + 1 };

        let entry = Arc::new(RegistryEntry::new(Pid(candidate)));
        table.entries.insert(Pid(candidate), Arc::clone(&entry));
        Ok(PidReservation {
            registry: self,
            entry: Some(entry),
        })
    }

    pub fn lookup(&self, pid: Pid) -> Option<Arc<RegistryEntry>> {
        self.table.lock().entries.get(&pid).cloned()
    }

    /// Removes `entry`, unless its identifier has already been reused.
    pub fn release(&self, entry: &Arc<RegistryEntry>) {
        let mut table = self.table.lock();
        if table
            .entries
            .get(&entry.pid)
            .is_some_and(|current| Arc::ptr_eq(current, entry))
        {
            table.entries.remove(&entry.pid);
            log::trace!("released pid {}", entry.pid);
        }
    }

    /// Returns the number of live identifiers.
    pub fn len(&self) -> usize {
        self.table.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A reserved identifier that is given back on drop unless committed.
pub struct PidReservation<'a> {
    registry: &'a ProcessRegistry,
    entry: Option<Arc<RegistryEntry>>,
}

impl PidReservation<'_> {
    pub fn pid(&self) -> Pid {
        self.entry().pid
    }

    pub fn entry(&self) -> &Arc<RegistryEntry> {
        match &self.entry {
            Some(entry) => entry,
            None => unreachable!("reservation used after commit"),
        }
    }

    /// Keeps the identifier.
    pub fn commit(mut self) -> Arc<RegistryEntry> {
        match self.entry.take() {
            Some(entry) => entry,
            None => unreachable!("reservation committed twice"),
        }
    }
}

impl Drop for PidReservation<'_> {
    fn drop(&mut self) {
        if let Some(entry) = self.entry.take() {
            log::debug!("unwinding reservation of pid {}", entry.pid);
            self.registry.release(&entry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_start_at_pid_min() {
        let registry = ProcessRegistry::new(8);
        let first = registry.reserve().unwrap().commit();
        let second = registry.reserve().unwrap().commit();
        assert_eq!(first.pid(), Pid::from_raw(PID_MIN));
        assert_eq!(second.pid(), Pid::from_raw(PID_MIN + 1));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn dropped_reservation_is_released() {
        let registry = ProcessRegistry::new(8);
        let pid = {
            let reservation = registry.reserve().unwrap();
            assert!(registry.lookup(reservation.pid()).is_some());
            reservation.pid()
        };
        assert!(registry.lookup(pid).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn full_table_reports_too_many_processes() {
        let registry = ProcessRegistry::new(2);
        let _a = registry.reserve().unwrap().commit();
        let _b = registry.reserve().unwrap().commit();
        assert!(matches!(registry.reserve(), Err(Errno::TooManyProcesses)));
    }

    #[test]
    fn released_identifiers_are_reused_after_wrapping() {
        let registry = ProcessRegistry::new(2);
        let a = registry.reserve().unwrap().commit();
        let _b = registry.reserve().unwrap().commit();
        registry.release(&a);

        let c = registry.reserve().unwrap().commit();
        assert_ne!(c.pid(), a.pid());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn release_ignores_stale_entries() {
        let registry = ProcessRegistry::new(4);
        let entry = registry.reserve().unwrap().commit();
        let stale = Arc::new(RegistryEntry::new(entry.pid()));
        registry.release(&stale);
        assert!(registry.lookup(entry.pid()).is_some());
        registry.release(&entry);
        assert!(registry.lookup(entry.pid()).is_none());
    }
}

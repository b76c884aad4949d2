//! Processes and their bookkeeping.

mod registry;

pub use registry::{
    ExitState, PID_MAX, PID_MIN, Pid, PidReservation, ProcessRegistry, RegistryEntry,
};

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};

use pmm::AddressSpace;
use spin::{Mutex, MutexGuard};

/// A process: one address space and one thread of control.
pub struct Process {
    pid: Pid,
    parent: Option<Pid>,
    name: Mutex<String>,
    /// `None` for kernel processes and after exit.
    space: Mutex<Option<AddressSpace>>,
    /// Direct children that have not been reaped yet.
    children: Mutex<Vec<Pid>>,
    entry: Arc<RegistryEntry>,
    exited: AtomicBool,
}

impl Process {
    pub(crate) fn new(
        entry: Arc<RegistryEntry>,
        parent: Option<Pid>,
        name: String,
        space: Option<AddressSpace>,
    ) -> Self {
        Self {
            pid: entry.pid(),
            parent,
            name: Mutex::new(name),
            space: Mutex::new(space),
            children: Mutex::new(Vec::new()),
            entry,
            exited: AtomicBool::new(false),
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn parent(&self) -> Option<Pid> {
        self.parent
    }

    pub fn name(&self) -> String {
        self.name.lock().clone()
    }

    pub(crate) fn rename(&self, name: String) {
        *self.name.lock() = name;
    }

    /// Locks the process's address space.
    pub fn space(&self) -> MutexGuard<'_, Option<AddressSpace>> {
        self.space.lock()
    }

    /// Returns the identifiers of the unreaped children.
    pub fn children(&self) -> Vec<Pid> {
        self.children.lock().clone()
    }

    pub(crate) fn add_child(&self, pid: Pid) {
        self.children.lock().push(pid);
    }

    /// Unlinks `pid`. Returns false if it was not a child.
    pub(crate) fn remove_child(&self, pid: Pid) -> bool {
        let mut children = self.children.lock();
        match children.iter().position(|child| *child == pid) {
            Some(index) => {
                children.swap_remove(index);
                true
            }
            None => false,
        }
    }

    pub(crate) fn has_child(&self, pid: Pid) -> bool {
        self.children.lock().contains(&pid)
    }

    pub(crate) fn take_children(&self) -> Vec<Pid> {
        core::mem::take(&mut *self.children.lock())
    }

    pub fn registry_entry(&self) -> &Arc<RegistryEntry> {
        &self.entry
    }

    pub fn has_exited(&self) -> bool {
        self.exited.load(Ordering::Acquire)
    }

    /// Marks the process as exiting. Returns false if it already was.
    pub(crate) fn mark_exited(&self) -> bool {
        !self.exited.swap(true, Ordering::AcqRel)
    }
}

impl fmt::Debug for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Process")
            .field("pid", &self.pid)
            .field("parent", &self.parent)
            .field("name", &*self.name.lock())
            .field("children", &*self.children.lock())
            .field("exited", &self.has_exited())
            .finish()
    }
}

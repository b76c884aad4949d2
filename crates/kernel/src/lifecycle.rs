//! Process creation, image replacement, termination and reaping.
//!
//! # Exit handshake
//!
//! A child's exit status lives in its registry entry. Both sides take the entry
//! lock:
//!
//! 1. The exiting child records its status. If the parent is already blocked in
//!    `waitpid`, the child wakes it and waits until the parent acknowledges.
//! 2. The parent, on finding a status, sets the acknowledgement, wakes the child,
//!    unlinks it and releases the entry.
//!
//! A parent that exits first marks its live children orphaned. An orphan releases
//! its own entry when it exits; a child that had already exited is released by the
//! parent on the spot.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;

use pmm::AddressSpace;

use crate::args::{self, ArgumentVector};
use crate::process::{Pid, Process};
use crate::{Errno, Kernel, TrapFrame, WaitStatus};

impl Kernel {
    /// Creates a kernel process: no address space and no parent.
    pub fn bootstrap(&self, name: &str) -> Result<Arc<Process>, Errno> {
        let entry = self.registry.reserve()?.commit();
        log::debug!("bootstrapped kernel process {} ({})", entry.pid(), name);
        Ok(Arc::new(Process::new(entry, None, String::from(name), None)))
    }

    /// Starts the program at `path` as a child of `parent`, with `args` as its
    /// argument vector.
    pub fn run_program(
        self: &Arc<Self>,
        parent: &Arc<Process>,
        path: &str,
        args: &[&str],
    ) -> Result<Pid, Errno> {
        let reservation = self.registry.reserve()?;
        let pid = reservation.pid();

        let (args, space, frame) = {
            let _permit = self.exec_gate.acquire(&*self.platform);
            let args = ArgumentVector::from_kernel(args, args::ceiling(self.config.arg_max))?;
            let (space, frame) = self.load_image(path, &args)?;
            (args, space, frame)
        };

        let name = args.program_name().unwrap_or_else(|| String::from(path));
        let child = Arc::new(Process::new(
            Arc::clone(reservation.entry()),
            Some(parent.pid()),
            name,
            Some(space),
        ));

        parent.add_child(pid);
        if let Err(err) = self.start(child, frame) {
            parent.remove_child(pid);
            return Err(err);
        }
        reservation.commit();
        log::debug!("pid {} started {} as pid {}", parent.pid(), path, pid);
        Ok(pid)
    }

    /// Duplicates `parent` into a new child that resumes from `frame`.
    ///
    /// Returns the child's identifier. Nothing of the child survives a failure.
    pub fn fork(self: &Arc<Self>, parent: &Arc<Process>, frame: &TrapFrame) -> Result<Pid, Errno> {
        let reservation = self.registry.reserve()?;
        let pid = reservation.pid();

        let space = {
            let space = parent.space();
            let source = space.as_ref().ok_or(Errno::InvalidArgument)?;
            source.duplicate()?
        };

        let child = Arc::new(Process::new(
            Arc::clone(reservation.entry()),
            Some(parent.pid()),
            parent.name(),
            Some(space),
        ));

        parent.add_child(pid);
        if let Err(err) = self.start(child, frame.fork_child()) {
            log::warn!("pid {}: could not schedule forked child: {}", parent.pid(), err);
            parent.remove_child(pid);
            return Err(err);
        }
        reservation.commit();
        log::debug!("pid {} forked pid {}", parent.pid(), pid);
        Ok(pid)
    }

    /// Replaces the image of `process` with the program whose path is at user
    /// address `path`, passing the argument vector at user address `argv`.
    ///
    /// Only returns on failure, in which case the caller's image is untouched.
    pub fn execv(self: &Arc<Self>, process: &Arc<Process>, path: usize, argv: usize) -> Errno {
        match self.replace_image(process, path, argv) {
            Ok(frame) => self.platform.enter_user(self, Arc::clone(process), frame),
            Err(err) => {
                log::debug!("pid {}: exec failed: {}", process.pid(), err);
                err
            }
        }
    }

    fn replace_image(&self, process: &Process, path: usize, argv: usize) -> Result<TrapFrame, Errno> {
        let _permit = self.exec_gate.acquire(&*self.platform);

        let (path, args) = {
            let space = process.space();
            let space = space.as_ref().ok_or(Errno::BadAddress)?;
            let path = copy_in_path(space, path, self.config.path_max)?;
            let args = ArgumentVector::copy_in(space, argv, args::ceiling(self.config.arg_max))?;
            (path, args)
        };

        let (space, frame) = self.load_image(&path, &args)?;

        // The old space goes away only once the new one is fully built.
        let old = process.space().replace(space);
        drop(old);
        process.rename(args.program_name().unwrap_or(path));
        self.activate(process);
        Ok(frame)
    }

    /// Opens `path`, loads it into a fresh address space and pushes `args` onto its
    /// stack. Returns the space and the frame the program starts from.
    fn load_image(
        &self,
        path: &str,
        args: &ArgumentVector,
    ) -> Result<(AddressSpace, TrapFrame), Errno> {
        let image = self.platform.open(path)?;
        let mut space = AddressSpace::new(Arc::clone(&self.frames));
        let entry = image.load(&mut space)?;

        let stack_top = space.define_stack();
        let (argv, sp) = args.push(&mut space, stack_top)?;
        Ok((
            space,
            TrapFrame::new_user(entry.as_usize(), sp, args.argc(), argv),
        ))
    }

    /// Schedules a context that switches to `process` and enters user mode.
    fn start(self: &Arc<Self>, process: Arc<Process>, frame: TrapFrame) -> Result<(), Errno> {
        let kernel = Arc::clone(self);
        let name = process.name();
        self.platform
            .spawn(&name, Box::new(move || kernel.enter(process, frame)))
    }

    fn enter(self: Arc<Self>, process: Arc<Process>, frame: TrapFrame) {
        self.activate(&process);
        self.platform.enter_user(&self, process, frame)
    }

    /// Ends `process` with exit code `code`.
    pub fn exit(&self, process: &Process, code: i32) -> ! {
        self.finish(process, WaitStatus::exited(code))
    }

    /// Ends `process` as if killed by `signal`.
    pub fn terminate(&self, process: &Process, signal: i32) -> ! {
        log::debug!("pid {} terminated by signal {}", process.pid(), signal);
        self.finish(process, WaitStatus::signaled(signal))
    }

    fn finish(&self, process: &Process, status: WaitStatus) -> ! {
        assert!(process.mark_exited(), "pid {} exited twice", process.pid());
        let entry = process.registry_entry();

        let orphaned = {
            let mut state = entry.state().lock();
            state.status = Some(status);
            if state.waiting {
                entry.cv().notify_all();
                while !state.acknowledged {
                    state = entry.cv().wait(state, entry.state(), &*self.platform);
                }
            }
            state.orphaned
        };

        for child in process.take_children() {
            self.orphan(child);
        }

        drop(process.space().take());

        if orphaned || process.parent().is_none() {
            self.registry.release(entry);
        }
        log::debug!("pid {} exited: {:?}", process.pid(), status);
        self.platform.exit_context()
    }

    fn orphan(&self, pid: Pid) {
        let Some(entry) = self.registry.lookup(pid) else {
            return;
        };
        let exited = {
            let mut state = entry.state().lock();
            state.orphaned = true;
            state.status.is_some()
        };
        if exited {
            self.registry.release(&entry);
        }
    }

    /// Waits for the child `pid` of `process` to exit and reaps it.
    pub fn waitpid(
        &self,
        process: &Process,
        pid: Pid,
        options: usize,
    ) -> Result<(Pid, WaitStatus), Errno> {
        if options != 0 {
            return Err(Errno::InvalidArgument);
        }
        if !process.has_child(pid) {
            return Err(Errno::NoChild);
        }
        let Some(entry) = self.registry.lookup(pid) else {
            log::error!("pid {}: child {} has no registry entry", process.pid(), pid);
            process.remove_child(pid);
            return Err(Errno::NoSuchProcess);
        };

        let status = {
            let mut state = entry.state().lock();
            let status = loop {
                if let Some(status) = state.status {
                    break status;
                }
                state.waiting = true;
                state = entry.cv().wait(state, entry.state(), &*self.platform);
            };
            state.waiting = false;
            state.acknowledged = true;
            entry.cv().notify_all();
            status
        };

        process.remove_child(pid);
        self.registry.release(&entry);
        log::trace!("pid {} reaped pid {}: {:?}", process.pid(), pid, status);
        Ok((pid, status))
    }

    pub fn getpid(&self, process: &Process) -> Pid {
        process.pid()
    }
}

/// Copies a program path out of user memory.
fn copy_in_path(space: &AddressSpace, path: usize, path_max: usize) -> Result<String, Errno> {
    let bytes = space.copy_in_str(path, path_max)?;
    if bytes.is_empty() {
        return Err(Errno::InvalidArgument);
    }
    String::from_utf8(bytes).map_err(|_| Errno::NotFound)
}

//! A platform that runs the process subsystem on a host operating system.
//!
//! Every kernel context is a host thread with its own emulated TLB and interrupt
//! flag. User programs are Rust closures registered at entry addresses; they touch
//! user memory only through [`UserContext`], which goes through the TLB and takes
//! faults exactly like user code would.

use std::boxed::Box;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::string::{String, ToString};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::JoinHandle;
use std::vec::Vec;

use pmm::arch::USER_POINTER_SIZE;
use pmm::{
    BootMemoryRegion, FaultKind, FrameAllocator, PAGE_SIZE, PhysicalAddress, PhysicalMemory,
    SoftwareTlb, Tlb, TlbException, VirtualAddress,
};
use spin::Mutex;

use crate::process::{Pid, Process};
use crate::syscall::{self, SYS_EXECV, SYS_EXIT, SYS_FORK, SYS_GETPID, SYS_WAITPID};
use crate::{
    Console, Errno, INSTRUCTION_SIZE, ImageTable, Kernel, KernelConfig, Loader, MemoryImage,
    Platform, ProgramImage, SIGSEGV, Scheduler, TrapFrame, WaitStatus,
};

/// Base of the read-only text segment of installed programs.
pub const TEXT_BASE: usize = 0x0400;

/// Base of the writable data segment of installed programs.
pub const DATA_BASE: usize = 0x1000;

/// Size of the data segment of installed programs.
pub const DATA_SIZE: usize = 32 * PAGE_SIZE;

/// Where [`UserContext::execv`] stages its path and argument vector.
const EXEC_SCRATCH: usize = DATA_BASE + DATA_SIZE / 2;

/// Contents of every text segment.
pub const TEXT: &[u8] = b"kestrel!";

/// Signal recorded for a user program that panicked.
pub const SIGABRT: i32 = 6;

/// A user program.
pub type UserProgram = Arc<dyn Fn(&mut UserContext) + Send + Sync>;

type ForkedChild = Box<dyn FnOnce(&mut UserContext) + Send>;

enum EntryPoint {
    Program(UserProgram),
    /// Runs once, in the child of the fork whose syscall sits just before it.
    Forked(ForkedChild),
}

/// Unwinds a context out of [`Scheduler::exit_context`].
struct ContextExit;

thread_local! {
    static TLB: RefCell<SoftwareTlb> = const { RefCell::new(SoftwareTlb::new()) };
}

struct HostRam(usize);

impl BootMemoryRegion for HostRam {
    fn base(&self) -> PhysicalAddress {
        PhysicalAddress::new(0)
    }

    fn size(&self) -> usize {
        self.0
    }

    fn is_usable(&self) -> bool {
        true
    }
}

struct Shared {
    images: ImageTable,
    entries: Mutex<BTreeMap<usize, EntryPoint>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    panics: Mutex<Vec<String>>,
    next_pc: AtomicUsize,
}

impl Shared {
    /// Hands out a fresh instruction address, leaving room for the instruction
    /// after it.
    fn next_pc(&self) -> usize {
        self.next_pc.fetch_add(2 * INSTRUCTION_SIZE, Ordering::Relaxed)
    }
}

struct HostStderr;

impl core::fmt::Write for HostStderr {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        std::eprint!("{s}");
        Ok(())
    }
}

/// The hosted platform. Clones share state.
#[derive(Clone)]
pub struct HostedPlatform {
    shared: Arc<Shared>,
}

impl HostedPlatform {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                images: ImageTable::new(),
                entries: Mutex::new(BTreeMap::new()),
                threads: Mutex::new(Vec::new()),
                panics: Mutex::new(Vec::new()),
                next_pc: AtomicUsize::new(TEXT_BASE),
            }),
        }
    }

    /// Builds a kernel over `ram_frames` frames of emulated memory.
    ///
    /// The first boot in a host process also installs the default [`Console`]
    /// as the logger, writing to standard error.
    pub fn boot(ram_frames: usize, config: KernelConfig) -> (Arc<Kernel>, Self) {
        if let Ok(console) = Console::init() {
            console.attach(HostStderr);
        }

        let size = ram_frames * PAGE_SIZE;
        let frames = Arc::new(FrameAllocator::bootstrap(
            &[HostRam(size)],
            PhysicalMemory::emulated(size),
        ));
        let platform = Self::new();
        let kernel = Kernel::new(Arc::new(platform.clone()), frames, config);
        (kernel, platform)
    }

    /// Installs `program` at `path`.
    pub fn install<F>(&self, path: &str, program: F)
    where
        F: Fn(&mut UserContext) + Send + Sync + 'static,
    {
        self.install_with_data(path, &[], program);
    }

    /// Installs `program` at `path` with `data` at the start of its data segment.
    pub fn install_with_data<F>(&self, path: &str, data: &[u8], program: F)
    where
        F: Fn(&mut UserContext) + Send + Sync + 'static,
    {
        let entry = self.shared.next_pc();
        self.shared
            .entries
            .lock()
            .insert(entry, EntryPoint::Program(Arc::new(program)));

        let image = MemoryImage::new(VirtualAddress::new(entry))
            .with_segment(VirtualAddress::new(TEXT_BASE), TEXT, PAGE_SIZE, false)
            .with_segment(VirtualAddress::new(DATA_BASE), data, DATA_SIZE, true);
        self.install_image(path, Arc::new(image));
    }

    /// Installs an arbitrary image at `path`.
    pub fn install_image(&self, path: &str, image: Arc<dyn ProgramImage>) {
        self.shared.images.insert(path, image);
    }

    /// Waits for every context spawned so far, including ones spawned while
    /// waiting.
    pub fn join_all(&self) {
        loop {
            let handle = self.shared.threads.lock().pop();
            match handle {
                Some(handle) => {
                    let _ = handle.join();
                }
                None => break,
            }
        }
    }

    /// Returns the messages of user programs that panicked.
    pub fn panics(&self) -> Vec<String> {
        self.shared.panics.lock().clone()
    }

    fn take_entry(&self, pc: usize) -> Option<EntryPoint> {
        let mut entries = self.shared.entries.lock();
        match entries.get(&pc)? {
            EntryPoint::Program(program) => Some(EntryPoint::Program(Arc::clone(program))),
            EntryPoint::Forked(_) => entries.remove(&pc),
        }
    }
}

impl Default for HostedPlatform {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        String::from("unknown panic")
    }
}

impl Scheduler for HostedPlatform {
    fn spawn(&self, name: &str, entry: Box<dyn FnOnce() + Send + 'static>) -> Result<(), Errno> {
        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(entry)) {
                    if !payload.is::<ContextExit>() {
                        log::error!("kernel context panicked: {}", panic_message(&*payload));
                    }
                }
            })
            .map_err(|err| {
                log::warn!("could not spawn {}: {}", name, err);
                Errno::OutOfMemory
            })?;
        self.shared.threads.lock().push(handle);
        Ok(())
    }

    fn yield_now(&self) {
        std::thread::yield_now();
    }

    fn exit_context(&self) -> ! {
        panic::resume_unwind(Box::new(ContextExit))
    }
}

impl Loader for HostedPlatform {
    fn open(&self, path: &str) -> Result<Arc<dyn ProgramImage>, Errno> {
        self.shared.images.open(path)
    }
}

impl Platform for HostedPlatform {
    fn enter_user(&self, kernel: &Arc<Kernel>, process: Arc<Process>, frame: TrapFrame) -> ! {
        let Some(entry) = self.take_entry(frame.pc) else {
            log::warn!("pid {}: no code at {:#x}", process.pid(), frame.pc);
            kernel.terminate(&process, SIGSEGV)
        };

        let mut context = UserContext {
            kernel: Arc::clone(kernel),
            process,
            frame,
            platform: self.clone(),
        };
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| match entry {
            EntryPoint::Program(program) => program(&mut context),
            EntryPoint::Forked(child) => child(&mut context),
        }));

        match outcome {
            Ok(()) => context.exit(0),
            Err(payload) if payload.is::<ContextExit>() => panic::resume_unwind(payload),
            Err(payload) => {
                let message = panic_message(&*payload);
                log::error!("pid {} panicked: {}", context.pid(), message);
                self.shared.panics.lock().push(message);
                kernel.terminate(&context.process, SIGABRT)
            }
        }
    }

    fn with_tlb(&self, f: &mut dyn FnMut(&mut dyn Tlb)) {
        TLB.with(|tlb| f(&mut *tlb.borrow_mut()));
    }
}

/// The user-mode view of a running process.
pub struct UserContext {
    kernel: Arc<Kernel>,
    process: Arc<Process>,
    /// Registers the program was entered with.
    frame: TrapFrame,
    platform: HostedPlatform,
}

impl UserContext {
    pub fn pid(&self) -> Pid {
        self.process.pid()
    }

    pub fn process(&self) -> &Arc<Process> {
        &self.process
    }

    pub fn kernel(&self) -> &Arc<Kernel> {
        &self.kernel
    }

    /// Registers the program was entered with. A forked child sees the parent's
    /// registers at the fork, with a return value of zero.
    pub fn frame(&self) -> &TrapFrame {
        &self.frame
    }

    /// Reads the argument vector the program was started with.
    pub fn args(&mut self) -> Vec<String> {
        let [argc, argv, ..] = self.frame.args;
        (0..argc)
            .map(|index| {
                let pointer = self.load_pointer(argv + index * USER_POINTER_SIZE);
                self.load_str(pointer)
            })
            .collect()
    }

    /// Resolves `addr` through the TLB, taking faults until it translates.
    fn translate(&mut self, addr: usize, write: bool) -> PhysicalAddress {
        loop {
            let Some(vaddr) = VirtualAddress::try_new(addr) else {
                self.kernel.terminate(&self.process, SIGSEGV)
            };
            let kind = match TLB.with(|tlb| tlb.borrow().translate(vaddr, write)) {
                Ok(phys) => return phys,
                Err(TlbException::Miss) if write => FaultKind::Write,
                Err(TlbException::Miss) => FaultKind::Read,
                Err(TlbException::Modify) => FaultKind::ReadOnly,
            };
            if let Err(err) = self
                .kernel
                .handle_fault(Some(&*self.process), kind as u32, addr)
            {
                log::debug!("pid {}: fatal fault at {:#x}: {}", self.pid(), addr, err);
                self.kernel.terminate(&self.process, SIGSEGV);
            }
        }
    }

    pub fn load(&mut self, addr: usize) -> u8 {
        let phys = self.translate(addr, false);
        let mut byte = [0u8];
        self.kernel.frames().memory().read(phys, &mut byte);
        byte[0]
    }

    pub fn store(&mut self, addr: usize, value: u8) {
        let phys = self.translate(addr, true);
        self.kernel.frames().memory().write(phys, &[value]);
    }

    pub fn load_bytes(&mut self, addr: usize, len: usize) -> Vec<u8> {
        (addr..addr + len).map(|byte| self.load(byte)).collect()
    }

    pub fn store_bytes(&mut self, addr: usize, bytes: &[u8]) {
        for (offset, byte) in bytes.iter().enumerate() {
            self.store(addr + offset, *byte);
        }
    }

    fn load_pointer(&mut self, addr: usize) -> usize {
        let mut bytes = [0u8; core::mem::size_of::<usize>()];
        for (offset, byte) in bytes[..USER_POINTER_SIZE].iter_mut().enumerate() {
            *byte = self.load(addr + offset);
        }
        usize::from_le_bytes(bytes)
    }

    fn store_pointer(&mut self, addr: usize, value: usize) {
        self.store_bytes(addr, &value.to_le_bytes()[..USER_POINTER_SIZE]);
    }

    fn load_str(&mut self, addr: usize) -> String {
        let mut bytes = Vec::new();
        loop {
            match self.load(addr + bytes.len()) {
                0 => break,
                byte => bytes.push(byte),
            }
        }
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// Writes `s` and its terminator at `*cursor` and moves the cursor past them.
    fn push_str(&mut self, cursor: &mut usize, s: &str) -> usize {
        let start = *cursor;
        self.store_bytes(start, s.as_bytes());
        self.store(start + s.len(), 0);
        *cursor += s.len() + 1;
        start
    }

    fn trap(&mut self, pc: usize, number: usize, args: [usize; 4]) -> Result<usize, i32> {
        let mut frame = TrapFrame {
            pc,
            sp: self.frame.sp,
            syscall: number,
            args,
            ..TrapFrame::default()
        };
        syscall::dispatch(&self.kernel, &self.process, &mut frame);
        debug_assert_eq!(frame.pc, pc + INSTRUCTION_SIZE);
        frame.result()
    }

    /// Issues system call `number`.
    pub fn syscall(&mut self, number: usize, args: [usize; 4]) -> Result<usize, i32> {
        let pc = self.platform.shared.next_pc();
        self.trap(pc, number, args)
    }

    /// Forks. The child runs `child` and then exits with code 0 unless it exits
    /// first.
    pub fn fork<F>(&mut self, child: F) -> Result<Pid, i32>
    where
        F: FnOnce(&mut UserContext) + Send + 'static,
    {
        let pc = self.platform.shared.next_pc();
        let resume = pc + INSTRUCTION_SIZE;
        self.platform
            .shared
            .entries
            .lock()
            .insert(resume, EntryPoint::Forked(Box::new(child)));

        let result = self.trap(pc, SYS_FORK, [0; 4]);
        if result.is_err() {
            self.platform.shared.entries.lock().remove(&resume);
        }
        result.map(|pid| Pid::from_raw(pid as i32))
    }

    /// Replaces the program. Returns the error code if that fails.
    pub fn execv(&mut self, path: &str, args: &[&str]) -> i32 {
        let mut cursor = EXEC_SCRATCH;
        let path = self.push_str(&mut cursor, path);
        let pointers: Vec<usize> = args
            .iter()
            .map(|arg| self.push_str(&mut cursor, arg))
            .collect();

        let argv = cursor.next_multiple_of(USER_POINTER_SIZE);
        for (index, pointer) in pointers.iter().chain([&0]).enumerate() {
            self.store_pointer(argv + index * USER_POINTER_SIZE, *pointer);
        }

        match self.syscall(SYS_EXECV, [path, argv, 0, 0]) {
            Ok(_) => unreachable!("execv returned success"),
            Err(code) => code,
        }
    }

    /// Waits for `pid`. The status travels through user memory below the stack
    /// pointer.
    pub fn waitpid(&mut self, pid: Pid, options: usize) -> Result<(Pid, WaitStatus), i32> {
        let slot = self.frame.sp - 8;
        let reaped = self.syscall(SYS_WAITPID, [pid.as_raw() as usize, slot, options, 0])?;

        let mut raw = [0u8; 4];
        for (offset, byte) in raw.iter_mut().enumerate() {
            *byte = self.load(slot + offset);
        }
        Ok((
            Pid::from_raw(reaped as i32),
            WaitStatus::from_raw(i32::from_le_bytes(raw)),
        ))
    }

    pub fn getpid(&mut self) -> Pid {
        match self.syscall(SYS_GETPID, [0; 4]) {
            Ok(pid) => Pid::from_raw(pid as i32),
            Err(code) => unreachable!("getpid failed with {}", code),
        }
    }

    pub fn exit(&mut self, code: i32) -> ! {
        let _ = self.syscall(SYS_EXIT, [code as usize, 0, 0, 0]);
        unreachable!("_exit returned")
    }
}

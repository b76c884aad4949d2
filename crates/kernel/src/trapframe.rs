//! Saved user register state.

use crate::Errno;

/// Size in bytes of one user instruction.
pub const INSTRUCTION_SIZE: usize = 4;

/// User registers saved on entry to the kernel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrapFrame {
    /// Address of the trapping instruction.
    pub pc: usize,
    /// User stack pointer.
    pub sp: usize,
    /// System call number.
    pub syscall: usize,
    /// Argument registers.
    pub args: [usize; 4],
    /// Return value register.
    pub retval: usize,
    /// Set when `retval` holds an error code.
    pub error: bool,
}

impl TrapFrame {
    /// Creates the frame a freshly loaded program starts from.
    pub fn new_user(entry: usize, sp: usize, argc: usize, argv: usize) -> Self {
        Self {
            pc: entry,
            sp,
            args: [argc, argv, 0, 0],
            ..Self::default()
        }
    }

    /// Moves past the trapping instruction.
    pub fn advance(&mut self) {
        self.pc += INSTRUCTION_SIZE;
    }

    /// Stores a system call result.
    pub fn set_result(&mut self, result: Result<usize, Errno>) {
        match result {
            Ok(value) => {
                self.retval = value;
                self.error = false;
            }
            Err(errno) => {
                self.retval = errno.code() as usize;
                self.error = true;
            }
        }
    }

    /// Reads the result stored by [`set_result`](Self::set_result).
    pub fn result(&self) -> Result<usize, i32> {
        if self.error {
            Err(self.retval as i32)
        } else {
            Ok(self.retval)
        }
    }

    /// Returns the frame a forked child resumes from: one instruction past the
    /// `fork` call, with a successful return value of zero.
    pub fn fork_child(&self) -> Self {
        let mut child = *self;
        child.set_result(Ok(0));
        child.advance();
        child
    }
}

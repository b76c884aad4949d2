//! System call dispatch.

use alloc::sync::Arc;

use crate::process::{Pid, Process};
use crate::{Errno, Kernel, TrapFrame};

pub const SYS_FORK: usize = 0;
pub const SYS_EXECV: usize = 2;
pub const SYS_EXIT: usize = 3;
pub const SYS_WAITPID: usize = 4;
pub const SYS_GETPID: usize = 5;

/// Runs the system call described by `frame` on behalf of `process`.
///
/// The result is written back into `frame` and the program counter is moved past
/// the syscall instruction. `_exit`, and `execv` on success, do not return.
pub fn dispatch(kernel: &Arc<Kernel>, process: &Arc<Process>, frame: &mut TrapFrame) {
    let [a0, a1, a2, _] = frame.args;

    let result = match frame.syscall {
        SYS_FORK => kernel
            .fork(process, frame)
            .map(|pid| pid.as_raw() as usize),
        SYS_EXECV => Err(kernel.execv(process, a0, a1)),
        SYS_EXIT => kernel.exit(process, a0 as i32),
        SYS_WAITPID => waitpid(kernel, process, a0 as i32, a1, a2),
        SYS_GETPID => Ok(kernel.getpid(process).as_raw() as usize),
        unknown => {
            log::warn!("pid {}: unknown syscall {}", process.pid(), unknown);
            Err(Errno::NotImplemented)
        }
    };

    frame.set_result(result);
    frame.advance();
}

fn waitpid(
    kernel: &Kernel,
    process: &Process,
    pid: i32,
    status: usize,
    options: usize,
) -> Result<usize, Errno> {
    let (pid, reaped) = kernel.waitpid(process, Pid::from_raw(pid), options)?;
    if status != 0 {
        let mut space = process.space();
        let space = space.as_mut().ok_or(Errno::BadAddress)?;
        space.copy_out(status, &reaped.raw().to_le_bytes())?;
    }
    Ok(pid.as_raw() as usize)
}

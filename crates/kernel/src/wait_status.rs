//! Encoded wait statuses.
//!
//! The low two bits hold a tag, the payload (exit code or signal number) sits above
//! them. This is the value user programs receive through `waitpid`.

use core::fmt;

const TAG_MASK: i32 = 0b11;
const TAG_EXITED: i32 = 0;
const TAG_SIGNALED: i32 = 1;
const TAG_CORE: i32 = 2;
const TAG_STOPPED: i32 = 3;

/// Signal delivered for invalid memory accesses.
pub const SIGSEGV: i32 = 11;

/// An encoded wait status.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct WaitStatus(i32);

/// Why a process stopped running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// Called `_exit` with this code.
    Exited(i32),
    /// Killed by a signal.
    Signaled { signal: i32, core_dumped: bool },
    /// Stopped by a signal.
    Stopped(i32),
}

impl WaitStatus {
    pub const fn exited(code: i32) -> Self {
        Self((code << 2) | TAG_EXITED)
    }

    pub const fn signaled(signal: i32) -> Self {
        Self((signal << 2) | TAG_SIGNALED)
    }

    pub const fn core_dumped(signal: i32) -> Self {
        Self((signal << 2) | TAG_CORE)
    }

    pub const fn stopped(signal: i32) -> Self {
        Self((signal << 2) | TAG_STOPPED)
    }

    pub const fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> i32 {
        self.0
    }

    pub const fn reason(self) -> ExitReason {
        let payload = self.0 >> 2;
        match self.0 & TAG_MASK {
            TAG_EXITED => ExitReason::Exited(payload),
            TAG_SIGNALED => ExitReason::Signaled {
                signal: payload,
                core_dumped: false,
            },
            TAG_CORE => ExitReason::Signaled {
                signal: payload,
                core_dumped: true,
            },
            _ => ExitReason::Stopped(payload),
        }
    }

    /// Returns the exit code, if the process exited normally.
    pub const fn exit_code(self) -> Option<i32> {
        match self.reason() {
            ExitReason::Exited(code) => Some(code),
            _ => None,
        }
    }
}

impl fmt::Debug for WaitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WaitStatus({:?})", self.reason())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_occupy_low_bits() {
        assert_eq!(WaitStatus::exited(5).raw(), 20);
        assert_eq!(WaitStatus::signaled(SIGSEGV).raw(), 45);
        assert_eq!(WaitStatus::core_dumped(6).raw() & TAG_MASK, TAG_CORE);
        assert_eq!(WaitStatus::stopped(17).raw() & TAG_MASK, TAG_STOPPED);
    }

    #[test]
    fn reasons() {
        assert_eq!(WaitStatus::exited(0).reason(), ExitReason::Exited(0));
        assert_eq!(WaitStatus::exited(-1).reason(), ExitReason::Exited(-1));
        assert_eq!(
            WaitStatus::signaled(SIGSEGV).reason(),
            ExitReason::Signaled {
                signal: SIGSEGV,
                core_dumped: false
            }
        );
        assert_eq!(WaitStatus::stopped(19).reason(), ExitReason::Stopped(19));
        assert_eq!(WaitStatus::from_raw(20).exit_code(), Some(5));
        assert_eq!(WaitStatus::signaled(9).exit_code(), None);
    }
}

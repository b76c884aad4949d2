//! Errors visible to user programs.

use pmm::{AccessError, AllocError, FaultError, RegionError};

/// A system call error, carried back to user mode as a numeric code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
#[repr(i32)]
pub enum Errno {
    #[error("function not implemented")]
    NotImplemented = 1,
    #[error("out of memory")]
    OutOfMemory = 3,
    #[error("bad memory reference")]
    BadAddress = 6,
    #[error("string too long")]
    NameTooLong = 7,
    #[error("invalid argument")]
    InvalidArgument = 8,
    #[error("too many processes in system")]
    TooManyProcesses = 12,
    #[error("file is not executable")]
    NotExecutable = 13,
    #[error("argument list too long")]
    ArgumentListTooLong = 14,
    #[error("no such process")]
    NoSuchProcess = 15,
    #[error("no child processes")]
    NoChild = 16,
    #[error("no such file or directory")]
    NotFound = 19,
}

impl Errno {
    /// Returns the numeric code user programs see.
    pub const fn code(self) -> i32 {
        self as i32
    }
}

impl From<AllocError> for Errno {
    fn from(_: AllocError) -> Self {
        Self::OutOfMemory
    }
}

impl From<AccessError> for Errno {
    fn from(err: AccessError) -> Self {
        match err {
            AccessError::BadAddress(_) | AccessError::ReadOnly(_) => Self::BadAddress,
            AccessError::NotLoading => Self::InvalidArgument,
            AccessError::TooLong(_) => Self::NameTooLong,
        }
    }
}

impl From<RegionError> for Errno {
    fn from(_: RegionError) -> Self {
        Self::NotExecutable
    }
}

impl From<FaultError> for Errno {
    fn from(err: FaultError) -> Self {
        match err {
            FaultError::BadAddress(_) | FaultError::ReadOnly(_) => Self::BadAddress,
            FaultError::InvalidKind(_) => Self::InvalidArgument,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(Errno::NotImplemented.code(), 1);
        assert_eq!(Errno::OutOfMemory.code(), 3);
        assert_eq!(Errno::BadAddress.code(), 6);
        assert_eq!(Errno::InvalidArgument.code(), 8);
        assert_eq!(Errno::TooManyProcesses.code(), 12);
        assert_eq!(Errno::ArgumentListTooLong.code(), 14);
        assert_eq!(Errno::NoSuchProcess.code(), 15);
        assert_eq!(Errno::NoChild.code(), 16);
        assert_eq!(Errno::NotFound.code(), 19);
    }

    #[test]
    fn memory_errors_map_to_errno() {
        assert_eq!(Errno::from(AllocError::OutOfMemory), Errno::OutOfMemory);
        assert_eq!(Errno::from(AccessError::ReadOnly(0x400)), Errno::BadAddress);
        assert_eq!(Errno::from(AccessError::TooLong(8)), Errno::NameTooLong);
        assert_eq!(Errno::from(FaultError::InvalidKind(9)), Errno::InvalidArgument);
        assert_eq!(Errno::from(RegionError::TooManyRegions), Errno::NotExecutable);
    }

    #[test]
    fn messages() {
        assert_eq!(Errno::NoChild.to_string(), "no child processes");
    }
}

//! Error types for the call-handling interface.
//!
//! A call either fails with an [`Errno`], which is an ordinary result the
//! guest observes (and which is recorded and replayed like any other), or
//! with a fatal error that terminates the session.

use std::error::Error;
use std::fmt;

/// A WASI error number returned to the guest.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Errno(pub u16);

#[allow(missing_docs)]
impl Errno {
    pub const SUCCESS: Errno = Errno(0);
    pub const TOOBIG: Errno = Errno(1);
    pub const ACCES: Errno = Errno(2);
    pub const ADDRINUSE: Errno = Errno(3);
    pub const AGAIN: Errno = Errno(6);
    pub const BADF: Errno = Errno(8);
    pub const CONNREFUSED: Errno = Errno(14);
    pub const EXIST: Errno = Errno(20);
    pub const INTR: Errno = Errno(27);
    pub const INVAL: Errno = Errno(28);
    pub const IO: Errno = Errno(29);
    pub const ISDIR: Errno = Errno(31);
    pub const NOENT: Errno = Errno(44);
    pub const NOSYS: Errno = Errno(52);
    pub const NOTCONN: Errno = Errno(53);
    pub const NOTDIR: Errno = Errno(54);
    pub const NOTSUP: Errno = Errno(58);
    pub const PIPE: Errno = Errno(64);
    pub const SPIPE: Errno = Errno(70);
    pub const NOTCAPABLE: Errno = Errno(76);

    /// Symbolic name, if this is one of the well-known codes.
    pub fn name(self) -> Option<&'static str> {
        Some(match self.0 {
            0 => "ESUCCESS",
            1 => "E2BIG",
            2 => "EACCES",
            3 => "EADDRINUSE",
            6 => "EAGAIN",
            8 => "EBADF",
            14 => "ECONNREFUSED",
            20 => "EEXIST",
            27 => "EINTR",
            28 => "EINVAL",
            29 => "EIO",
            31 => "EISDIR",
            44 => "ENOENT",
            52 => "ENOSYS",
            53 => "ENOTCONN",
            54 => "ENOTDIR",
            58 => "ENOTSUP",
            64 => "EPIPE",
            70 => "ESPIPE",
            76 => "ENOTCAPABLE",
            _ => return None,
        })
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "errno {}", self.0),
        }
    }
}

impl Error for Errno {}

/// Result type of every [`System`](crate::System) method.
pub type SyscallResult<T> = Result<T, SyscallError>;

/// Why a call did not produce a value.
#[derive(Debug, thiserror::Error)]
pub enum SyscallError {
    /// The operation failed with an error code the guest sees.
    #[error("{0}")]
    Errno(#[from] Errno),
    /// The session cannot continue: the log could not be written, the
    /// replay diverged, or the recording is corrupt. The host-call
    /// dispatch loop must stop the guest when it sees this.
    #[error("fatal: {0}")]
    Fatal(#[source] Box<dyn Error + Send + Sync + 'static>),
}

impl SyscallError {
    /// Wrap an error as fatal.
    pub fn fatal(err: impl Into<Box<dyn Error + Send + Sync + 'static>>) -> Self {
        Self::Fatal(err.into())
    }

    /// The guest-visible error code, if this is not fatal.
    pub fn errno(&self) -> Option<Errno> {
        match self {
            Self::Errno(e) => Some(*e),
            Self::Fatal(_) => None,
        }
    }

    /// Whether the session must terminate.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }

    /// Borrow the fatal cause as a concrete error type.
    pub fn fatal_cause<E: Error + 'static>(&self) -> Option<&E> {
        match self {
            Self::Fatal(e) => (**e).downcast_ref::<E>(),
            Self::Errno(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("log broke")]
    struct LogBroke;

    #[test]
    fn errno_display_uses_name_when_known() {
        assert_eq!(Errno::BADF.to_string(), "EBADF");
        assert_eq!(Errno(999).to_string(), "errno 999");
    }

    #[test]
    fn errno_converts_into_syscall_error() {
        let err: SyscallError = Errno::NOENT.into();
        assert_eq!(err.errno(), Some(Errno::NOENT));
        assert!(!err.is_fatal());
    }

    #[test]
    fn fatal_cause_downcasts() {
        let err = SyscallError::fatal(LogBroke);
        assert!(err.is_fatal());
        assert!(err.fatal_cause::<LogBroke>().is_some());
        assert!(err.fatal_cause::<Errno>().is_none());
        assert_eq!(err.errno(), None);
    }
}

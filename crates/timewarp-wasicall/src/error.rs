//! Fatal conditions raised by the recorder and the replay engine.
//!
//! Both surface to the guest as [`SyscallError::Fatal`] wrapping one of
//! these types; callers that need the detail use
//! [`SyscallError::fatal_cause`].
//!
//! [`SyscallError::Fatal`]: timewarp_core::SyscallError::Fatal
//! [`SyscallError::fatal_cause`]: timewarp_core::SyscallError::fatal_cause

use timewarp_core::Syscall;
use timewarp_log::LogError;

use crate::call::DecodeError;

/// A call could not be persisted. The rest of the run is not reproducible.
#[derive(Debug, thiserror::Error)]
#[error("failed to record {syscall}")]
pub struct RecordError {
    /// The call being recorded.
    pub syscall: Syscall,
    /// Why the log write failed.
    #[source]
    pub source: LogError,
}

/// Replay cannot continue deterministically.
///
/// `record` is the zero-based position of the offending record in the
/// replayed stream, or the number of records consumed when the stream had
/// already ended.
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    /// The guest called a different function than the one recorded.
    #[error("replay diverged at record {record}: recorded {recorded}, guest called {requested}")]
    Divergence {
        /// Position of the record.
        record: u64,
        /// Function found in the log.
        recorded: Syscall,
        /// Function the guest called.
        requested: Syscall,
    },

    /// The guest called the recorded function with different arguments.
    #[error("replay diverged at record {record}: {syscall} called with different parameters")]
    ParamsMismatch {
        /// Position of the record.
        record: u64,
        /// The call.
        syscall: Syscall,
    },

    /// The log ended and no fallback system is configured.
    #[error("unexpected {syscall} after the end of the recording ({records} records replayed)")]
    UnexpectedCallAfterEof {
        /// The call made past the end.
        syscall: Syscall,
        /// Records replayed before the end.
        records: u64,
    },

    /// The log holds a function id this build does not know.
    #[error("record {record} has unknown function id {function_id}")]
    UnknownFunction {
        /// Position of the record.
        record: u64,
        /// The unknown id.
        function_id: u32,
    },

    /// A recorded call payload could not be decoded.
    #[error("record {record} ({syscall}) has a malformed call payload")]
    Decode {
        /// Position of the record.
        record: u64,
        /// The call.
        syscall: Syscall,
        /// Decoding failure.
        #[source]
        source: DecodeError,
    },

    /// The log could not be read.
    #[error("failed to read record {record}")]
    Log {
        /// Position of the record.
        record: u64,
        /// Underlying log error.
        #[source]
        source: LogError,
    },

    /// An earlier call already failed fatally; the session is over.
    #[error("replay already failed at record {record}: {reason}")]
    Failed {
        /// Position of the record that failed.
        record: u64,
        /// The original failure.
        reason: String,
    },
}

impl ReplayError {
    /// Whether this is a divergence between the recorded and the live
    /// call sequence, as opposed to a damaged recording.
    pub fn is_divergence(&self) -> bool {
        matches!(
            self,
            Self::Divergence { .. } | Self::ParamsMismatch { .. } | Self::UnexpectedCallAfterEof { .. }
        )
    }
}

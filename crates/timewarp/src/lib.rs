//! Timewarp: deterministic recording and replay of WebAssembly system calls.
//!
//! This is the top-level facade crate that re-exports the public API from all
//! Timewarp sub-crates. For most users, adding `timewarp` as a single
//! dependency is sufficient.
//!
//! # Quick start
//!
//! ```rust
//! use std::io::IoSlice;
//!
//! use timewarp::prelude::*;
//! use timewarp_test_utils::{segment, MockSystem};
//!
//! // Record a guest's calls against a live system.
//! let writer = LogWriter::new(Vec::new(), segment(), WriterConfig::default()).unwrap();
//! let mut recorder = Recorder::new(MockSystem::new(7), writer);
//! let now = recorder.clock_time_get(1, 1).unwrap();
//! recorder.fd_write(Fd::STDOUT, &[IoSlice::new(b"hi\n")]).unwrap();
//! recorder.close().unwrap();
//! let (_, writer) = recorder.into_parts();
//! let (bytes, index) = writer.finish().unwrap();
//!
//! // Replay answers the same calls from the log, without the live system.
//! let mut replay = Replay::new(LogReader::with_index(bytes.as_slice(), index));
//! assert_eq!(replay.clock_time_get(1, 1).unwrap(), now);
//! assert_eq!(replay.fd_write(Fd::STDOUT, &[IoSlice::new(b"hi\n")]).unwrap(), 3);
//! ```
//!
//! # Modules
//!
//! Each module corresponds to a sub-crate. Use them for types not in the prelude:
//!
//! | Module | Sub-crate | Contents |
//! |--------|-----------|----------|
//! | [`types`] | `timewarp-core` | Identifiers, errno values, WASI types, the `System` trait |
//! | [`log`] | `timewarp-log` | Segment writer and reader, compression, record index |
//! | [`wasicall`] | `timewarp-wasicall` | Call codec, recorder, replay, stdio and exchange readers |

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

/// Identifiers, WASI types and the host interface (`timewarp-core`).
///
/// The [`types::System`] trait is the seam every recorder, replayer and
/// live host implements.
pub use timewarp_core as types;

/// Append-only call log segments (`timewarp-log`).
///
/// Write batches with [`log::LogWriter`], stream them back with
/// [`log::LogReader`], and seek through a [`log::RecordIndex`].
pub use timewarp_log as log;

/// Recording and replaying system calls (`timewarp-wasicall`).
///
/// [`wasicall::Recorder`] captures a live run; [`wasicall::Replay`]
/// answers the same calls from the capture.
pub use timewarp_wasicall as wasicall;

/// Common imports for typical Timewarp usage.
///
/// ```rust
/// use timewarp::prelude::*;
/// ```
pub mod prelude {
    // Core types and traits
    pub use timewarp_core::{Errno, Fd, ProcessId, SegmentId, Syscall, SyscallError, System};

    // Log
    pub use timewarp_log::{
        open_reader, open_writer, Compression, LogError, LogReader, LogWriter, Record,
        RecordIndex, WriterConfig,
    };

    // Recording and replay
    pub use timewarp_wasicall::{
        Recorder, Replay, ReplayError, ReplayState, StdioReader,
    };
}

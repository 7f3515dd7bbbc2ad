//! Core types and traits for the Timewarp recording engine.
//!
//! This is the leaf crate with zero internal dependencies. It defines
//! the abstractions shared by the log format and the call interceptors:
//! process and segment identifiers, the stable [`Syscall`] enumeration,
//! WASI value types, and the [`System`] call-handling interface.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod error;
pub mod id;
pub mod syscall;
pub mod system;
pub mod wasi;

pub use error::{Errno, SyscallError, SyscallResult};
pub use id::{Fd, ProcessId, SegmentId};
pub use syscall::Syscall;
pub use system::System;
pub use wasi::{Event, FdStat, FileStat, PreStat, SocketAddress, Subscription, SubscriptionKind};

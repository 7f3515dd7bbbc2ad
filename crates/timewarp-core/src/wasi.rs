//! WASI value types exchanged between the guest and the host.
//!
//! Scalar flag and enum types are kept as plain aliases over their wire
//! width; only compound values get structs.

use crate::error::Errno;
use crate::id::Fd;

/// Nanoseconds, as used by clocks and file times.
pub type Timestamp = u64;
#[allow(missing_docs)]
pub type ClockId = u32;
#[allow(missing_docs)]
pub type Rights = u64;
#[allow(missing_docs)]
pub type FdFlags = u16;
#[allow(missing_docs)]
pub type FstFlags = u16;
#[allow(missing_docs)]
pub type LookupFlags = u32;
#[allow(missing_docs)]
pub type OpenFlags = u16;
#[allow(missing_docs)]
pub type Advice = u8;
#[allow(missing_docs)]
pub type Whence = u8;
#[allow(missing_docs)]
pub type FileSize = u64;
#[allow(missing_docs)]
pub type FileDelta = i64;
#[allow(missing_docs)]
pub type DirCookie = u64;
#[allow(missing_docs)]
pub type ExitCode = u32;
#[allow(missing_docs)]
pub type Signal = u8;
#[allow(missing_docs)]
pub type RiFlags = u16;
#[allow(missing_docs)]
pub type RoFlags = u16;
#[allow(missing_docs)]
pub type SiFlags = u16;
#[allow(missing_docs)]
pub type SdFlags = u8;
#[allow(missing_docs)]
pub type ProtocolFamily = u8;
#[allow(missing_docs)]
pub type SocketType = u8;
#[allow(missing_docs)]
pub type Protocol = u32;
#[allow(missing_docs)]
pub type SocketOption = u32;
#[allow(missing_docs)]
pub type FileType = u8;

/// Descriptor attributes returned by `fd_fdstat_get`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct FdStat {
    pub file_type: FileType,
    pub flags: FdFlags,
    pub rights_base: Rights,
    pub rights_inheriting: Rights,
}

/// File attributes returned by `fd_filestat_get` and `path_filestat_get`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct FileStat {
    pub device: u64,
    pub ino: u64,
    pub file_type: FileType,
    pub nlink: u64,
    pub size: FileSize,
    pub access_time: Timestamp,
    pub modify_time: Timestamp,
    pub change_time: Timestamp,
}

/// A preopened directory description.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PreStat {
    /// Length of the directory name, in bytes.
    pub dir_name_len: u32,
}

/// One entry of a `poll_oneoff` request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Subscription {
    /// Opaque value echoed back in the matching [`Event`].
    pub user_data: u64,
    /// What the subscription waits for.
    pub kind: SubscriptionKind,
}

/// The condition a [`Subscription`] waits for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum SubscriptionKind {
    Clock {
        id: ClockId,
        timeout: Timestamp,
        precision: Timestamp,
        flags: u16,
    },
    FdRead(Fd),
    FdWrite(Fd),
}

impl SubscriptionKind {
    /// The WASI event type code for this kind.
    pub fn event_type(&self) -> u8 {
        match self {
            Self::Clock { .. } => 0,
            Self::FdRead(_) => 1,
            Self::FdWrite(_) => 2,
        }
    }
}

/// One result of a `poll_oneoff` call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct Event {
    pub user_data: u64,
    pub errno: Errno,
    pub event_type: u8,
    pub nbytes: u64,
    pub flags: u16,
}

/// A socket endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum SocketAddress {
    Inet { addr: [u8; 4], port: u16 },
    Inet6 { addr: [u8; 16], port: u16 },
    Unix { path: String },
}

impl Default for SocketAddress {
    fn default() -> Self {
        Self::Inet {
            addr: [0; 4],
            port: 0,
        }
    }
}

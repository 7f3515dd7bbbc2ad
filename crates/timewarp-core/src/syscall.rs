//! The stable enumeration of host operations a guest can invoke.
//!
//! The discriminant of each variant is the `function_id` persisted in
//! log records, so the order below is part of the on-disk format:
//! WASI preview 1 first, then the sockets extension. New operations may
//! only be appended.

use std::fmt;

/// A host operation (system call) invoked by the guest.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u32)]
#[allow(missing_docs)]
pub enum Syscall {
    // WASI preview 1.
    ArgsGet = 0,
    EnvironGet,
    ClockResGet,
    ClockTimeGet,
    FdAdvise,
    FdAllocate,
    FdClose,
    FdDataSync,
    FdStatGet,
    FdStatSetFlags,
    FdStatSetRights,
    FdFileStatGet,
    FdFileStatSetSize,
    FdFileStatSetTimes,
    FdPread,
    FdPreStatGet,
    FdPreStatDirName,
    FdPwrite,
    FdRead,
    FdReadDir,
    FdRenumber,
    FdSeek,
    FdSync,
    FdTell,
    FdWrite,
    PathCreateDirectory,
    PathFileStatGet,
    PathFileStatSetTimes,
    PathLink,
    PathOpen,
    PathReadLink,
    PathRemoveDirectory,
    PathRename,
    PathSymlink,
    PathUnlinkFile,
    PollOneOff,
    ProcExit,
    ProcRaise,
    SchedYield,
    RandomGet,
    SockAccept,
    SockRecv,
    SockSend,
    SockShutdown,

    // Sockets extension.
    SockOpen,
    SockBind,
    SockConnect,
    SockListen,
    SockSendTo,
    SockRecvFrom,
    SockGetOptInt,
    SockSetOptInt,
    SockLocalAddress,
    SockPeerAddress,
}

impl Syscall {
    /// Every operation, indexed by its function id.
    pub const ALL: [Syscall; 54] = [
        Syscall::ArgsGet,
        Syscall::EnvironGet,
        Syscall::ClockResGet,
        Syscall::ClockTimeGet,
        Syscall::FdAdvise,
        Syscall::FdAllocate,
        Syscall::FdClose,
        Syscall::FdDataSync,
        Syscall::FdStatGet,
        Syscall::FdStatSetFlags,
        Syscall::FdStatSetRights,
        Syscall::FdFileStatGet,
        Syscall::FdFileStatSetSize,
        Syscall::FdFileStatSetTimes,
        Syscall::FdPread,
        Syscall::FdPreStatGet,
        Syscall::FdPreStatDirName,
        Syscall::FdPwrite,
        Syscall::FdRead,
        Syscall::FdReadDir,
        Syscall::FdRenumber,
        Syscall::FdSeek,
        Syscall::FdSync,
        Syscall::FdTell,
        Syscall::FdWrite,
        Syscall::PathCreateDirectory,
        Syscall::PathFileStatGet,
        Syscall::PathFileStatSetTimes,
        Syscall::PathLink,
        Syscall::PathOpen,
        Syscall::PathReadLink,
        Syscall::PathRemoveDirectory,
        Syscall::PathRename,
        Syscall::PathSymlink,
        Syscall::PathUnlinkFile,
        Syscall::PollOneOff,
        Syscall::ProcExit,
        Syscall::ProcRaise,
        Syscall::SchedYield,
        Syscall::RandomGet,
        Syscall::SockAccept,
        Syscall::SockRecv,
        Syscall::SockSend,
        Syscall::SockShutdown,
        Syscall::SockOpen,
        Syscall::SockBind,
        Syscall::SockConnect,
        Syscall::SockListen,
        Syscall::SockSendTo,
        Syscall::SockRecvFrom,
        Syscall::SockGetOptInt,
        Syscall::SockSetOptInt,
        Syscall::SockLocalAddress,
        Syscall::SockPeerAddress,
    ];

    /// The persisted function id.
    pub fn id(self) -> u32 {
        self as u32
    }

    /// Look up an operation by its persisted function id.
    ///
    /// Returns `None` for ids written by a newer build.
    pub fn from_id(id: u32) -> Option<Self> {
        Self::ALL.get(id as usize).copied()
    }

    /// The canonical name, as shown in traces and error messages.
    pub fn name(self) -> &'static str {
        match self {
            Self::ArgsGet => "ArgsGet",
            Self::EnvironGet => "EnvironGet",
            Self::ClockResGet => "ClockResGet",
            Self::ClockTimeGet => "ClockTimeGet",
            Self::FdAdvise => "FDAdvise",
            Self::FdAllocate => "FDAllocate",
            Self::FdClose => "FDClose",
            Self::FdDataSync => "FDDataSync",
            Self::FdStatGet => "FDStatGet",
            Self::FdStatSetFlags => "FDStatSetFlags",
            Self::FdStatSetRights => "FDStatSetRights",
            Self::FdFileStatGet => "FDFileStatGet",
            Self::FdFileStatSetSize => "FDFileStatSetSize",
            Self::FdFileStatSetTimes => "FDFileStatSetTimes",
            Self::FdPread => "FDPread",
            Self::FdPreStatGet => "FDPreStatGet",
            Self::FdPreStatDirName => "FDPreStatDirName",
            Self::FdPwrite => "FDPwrite",
            Self::FdRead => "FDRead",
            Self::FdReadDir => "FDReadDir",
            Self::FdRenumber => "FDRenumber",
            Self::FdSeek => "FDSeek",
            Self::FdSync => "FDSync",
            Self::FdTell => "FDTell",
            Self::FdWrite => "FDWrite",
            Self::PathCreateDirectory => "PathCreateDirectory",
            Self::PathFileStatGet => "PathFileStatGet",
            Self::PathFileStatSetTimes => "PathFileStatSetTimes",
            Self::PathLink => "PathLink",
            Self::PathOpen => "PathOpen",
            Self::PathReadLink => "PathReadLink",
            Self::PathRemoveDirectory => "PathRemoveDirectory",
            Self::PathRename => "PathRename",
            Self::PathSymlink => "PathSymlink",
            Self::PathUnlinkFile => "PathUnlinkFile",
            Self::PollOneOff => "PollOneOff",
            Self::ProcExit => "ProcExit",
            Self::ProcRaise => "ProcRaise",
            Self::SchedYield => "SchedYield",
            Self::RandomGet => "RandomGet",
            Self::SockAccept => "SockAccept",
            Self::SockRecv => "SockRecv",
            Self::SockSend => "SockSend",
            Self::SockShutdown => "SockShutdown",
            Self::SockOpen => "SockOpen",
            Self::SockBind => "SockBind",
            Self::SockConnect => "SockConnect",
            Self::SockListen => "SockListen",
            Self::SockSendTo => "SockSendTo",
            Self::SockRecvFrom => "SockRecvFrom",
            Self::SockGetOptInt => "SockGetOptInt",
            Self::SockSetOptInt => "SockSetOptInt",
            Self::SockLocalAddress => "SockLocalAddress",
            Self::SockPeerAddress => "SockPeerAddress",
        }
    }
}

impl fmt::Display for Syscall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn ids_match_table_position() {
        for (i, s) in Syscall::ALL.iter().enumerate() {
            assert_eq!(s.id() as usize, i, "{s} is out of place");
            assert_eq!(Syscall::from_id(i as u32), Some(*s));
        }
    }

    #[test]
    fn frozen_ids() {
        assert_eq!(Syscall::ArgsGet.id(), 0);
        assert_eq!(Syscall::FdWrite.id(), 24);
        assert_eq!(Syscall::ProcExit.id(), 36);
        assert_eq!(Syscall::SockShutdown.id(), 43);
        assert_eq!(Syscall::SockOpen.id(), 44);
        assert_eq!(Syscall::SockPeerAddress.id(), 53);
    }

    #[test]
    fn unknown_id_is_none() {
        assert_eq!(Syscall::from_id(54), None);
        assert_eq!(Syscall::from_id(u32::MAX), None);
    }

    #[test]
    fn names_are_unique() {
        let mut names: Vec<_> = Syscall::ALL.iter().map(|s| s.name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), Syscall::ALL.len());
    }

    proptest! {
        #[test]
        fn from_id_inverts_id(id in any::<u32>()) {
            match Syscall::from_id(id) {
                Some(s) => prop_assert_eq!(s.id(), id),
                None => prop_assert!(id as usize >= Syscall::ALL.len()),
            }
        }
    }
}

//! Replay engine: a [`System`] answered from recorded calls.
//!
//! Each call consumes the next record. The record must name the same
//! function and carry the same encoded parameters as the live call;
//! anything else is a fatal [`ReplayError`] that ends the session: the
//! engine moves to [`Failed`](ReplayState::Failed) and refuses every later
//! call without touching the records again. Once the records run out the
//! engine is [`Exhausted`](ReplayState::Exhausted) for good and forwards
//! every call to its fallback system, if it has one.

use std::io::{IoSlice, IoSliceMut};

use timewarp_core::wasi::{
    Advice, ClockId, DirCookie, ExitCode, FdFlags, FileDelta, FileSize, FstFlags, LookupFlags,
    OpenFlags, Protocol, ProtocolFamily, RiFlags, Rights, RoFlags, SdFlags, SiFlags, Signal,
    SocketOption, SocketType, Timestamp, Whence,
};
use timewarp_core::{
    Errno, Event, Fd, FdStat, FileStat, PreStat, SocketAddress, Subscription, Syscall, SyscallError,
    SyscallResult, System,
};
use timewarp_log::RecordSource;
use tracing::{error, info, trace};

use crate::call::{capacity, decode_outcome, scatter, split_call, Decode, Encode, Gather};
use crate::error::ReplayError;

/// Where a [`Replay`] is in its recording.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplayState {
    /// Calls are answered from records.
    Active,
    /// The records ran out. Calls go to the fallback.
    Exhausted,
    /// A call diverged or the recording was unreadable. Every later call
    /// is fatal.
    Failed,
}

/// One recorded call that matched the live call.
struct Recorded {
    record: u64,
    syscall: Syscall,
    call: Vec<u8>,
    outcome_at: usize,
}

impl Recorded {
    fn outcome<T: Decode>(&self) -> Result<Result<T, Errno>, ReplayError> {
        decode_outcome(&self.call[self.outcome_at..]).map_err(|source| ReplayError::Decode {
            record: self.record,
            syscall: self.syscall,
            source,
        })
    }
}

/// A [`System`] that replays a recording.
///
/// # Examples
///
/// ```
/// use timewarp_core::{Fd, Syscall, System};
/// use timewarp_log::Record;
/// use timewarp_wasicall::{call, Replay};
///
/// let mut payload = Vec::new();
/// call::encode_call(&mut payload, &Fd(3), Ok(&()));
/// let records = vec![Record::new(0, Syscall::FdClose.id(), payload)];
///
/// let mut replay = Replay::new(records.into_iter());
/// replay.fd_close(Fd(3)).unwrap();
/// // Nothing left and no fallback.
/// assert!(replay.fd_close(Fd(3)).unwrap_err().is_fatal());
/// ```
pub struct Replay<R> {
    records: R,
    fallback: Option<Box<dyn System>>,
    state: ReplayState,
    failure: Option<(u64, String)>,
    replayed: u64,
    params: Vec<u8>,
}

impl<R: RecordSource> Replay<R> {
    /// Replay `records` with no fallback: any call past the end is fatal.
    pub fn new(records: R) -> Self {
        Self {
            records,
            fallback: None,
            state: ReplayState::Active,
            failure: None,
            replayed: 0,
            params: Vec::new(),
        }
    }

    /// Forward calls past the end of the recording to `fallback`.
    pub fn with_fallback(mut self, fallback: Box<dyn System>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Current state.
    pub fn state(&self) -> ReplayState {
        self.state
    }

    /// Calls answered from records so far.
    pub fn replayed(&self) -> u64 {
        self.replayed
    }

    /// Unwrap into the record source and the fallback.
    pub fn into_inner(self) -> (R, Option<Box<dyn System>>) {
        (self.records, self.fallback)
    }

    /// End the session with `err`. Later calls get [`ReplayError::Failed`].
    fn fail(&mut self, err: ReplayError) -> SyscallError {
        error!(error = %err, "replay failed");
        let record = match &err {
            ReplayError::Divergence { record, .. }
            | ReplayError::ParamsMismatch { record, .. }
            | ReplayError::UnknownFunction { record, .. }
            | ReplayError::Decode { record, .. }
            | ReplayError::Log { record, .. }
            | ReplayError::Failed { record, .. } => *record,
            ReplayError::UnexpectedCallAfterEof { records, .. } => *records,
        };
        self.state = ReplayState::Failed;
        self.failure = Some((record, err.to_string()));
        SyscallError::fatal(err)
    }

    fn failed(&self) -> Option<SyscallError> {
        let (record, reason) = self.failure.as_ref()?;
        Some(SyscallError::fatal(ReplayError::Failed {
            record: *record,
            reason: reason.clone(),
        }))
    }

    /// Decode a recorded result; a malformed one ends the session.
    fn result<T: Decode>(&mut self, call: &Recorded) -> SyscallResult<T> {
        match call.outcome() {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(errno)) => Err(SyscallError::Errno(errno)),
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Take the next record and check it against the live call. `None`
    /// means the recording is exhausted.
    fn next_call<P: Encode + ?Sized>(
        &mut self,
        syscall: Syscall,
        params: &P,
    ) -> SyscallResult<Option<Recorded>> {
        if let Some(err) = self.failed() {
            return Err(err);
        }
        if self.state == ReplayState::Exhausted {
            return Ok(None);
        }
        let index = self.replayed;
        let record = match self.records.next_record() {
            Ok(Some(record)) => record,
            Ok(None) => {
                info!(records = index, "recording exhausted");
                self.state = ReplayState::Exhausted;
                return Ok(None);
            }
            Err(source) => {
                return Err(self.fail(ReplayError::Log {
                    record: index,
                    source,
                }))
            }
        };

        let Some(recorded) = record.syscall() else {
            return Err(self.fail(ReplayError::UnknownFunction {
                record: index,
                function_id: record.function_id,
            }));
        };
        if recorded != syscall {
            return Err(self.fail(ReplayError::Divergence {
                record: index,
                recorded,
                requested: syscall,
            }));
        }

        let recorded_params = match split_call(&record.function_call) {
            Ok((params, _)) => params,
            Err(source) => {
                return Err(self.fail(ReplayError::Decode {
                    record: index,
                    syscall,
                    source,
                }))
            }
        };
        self.params.clear();
        params.encode(&mut self.params);
        if recorded_params != self.params.as_slice() {
            return Err(self.fail(ReplayError::ParamsMismatch {
                record: index,
                syscall,
            }));
        }
        let outcome_at = 4 + recorded_params.len();

        self.replayed += 1;
        trace!(record = index, %syscall, "replayed call");
        Ok(Some(Recorded {
            record: index,
            syscall,
            call: record.function_call,
            outcome_at,
        }))
    }

    fn fallback(&mut self, syscall: Syscall) -> SyscallResult<&mut (dyn System + 'static)> {
        let records = self.replayed;
        match self.fallback.as_deref_mut() {
            Some(system) => {
                trace!(%syscall, "forwarding to fallback");
                Ok(system)
            }
            None => {
                let err = ReplayError::UnexpectedCallAfterEof { syscall, records };
                error!(error = %err, "replay failed");
                Err(SyscallError::fatal(err))
            }
        }
    }

    fn replay<P, T>(
        &mut self,
        syscall: Syscall,
        params: &P,
        live: impl FnOnce(&mut dyn System) -> SyscallResult<T>,
    ) -> SyscallResult<T>
    where
        P: Encode + ?Sized,
        T: Decode,
    {
        match self.next_call(syscall, params)? {
            Some(call) => self.result(&call),
            None => live(self.fallback(syscall)?),
        }
    }
}

impl<R: RecordSource> System for Replay<R> {
    fn args_get(&mut self) -> SyscallResult<Vec<String>> {
        self.replay(Syscall::ArgsGet, &(), |s| s.args_get())
    }

    fn environ_get(&mut self) -> SyscallResult<Vec<String>> {
        self.replay(Syscall::EnvironGet, &(), |s| s.environ_get())
    }

    fn clock_res_get(&mut self, id: ClockId) -> SyscallResult<Timestamp> {
        self.replay(Syscall::ClockResGet, &id, |s| s.clock_res_get(id))
    }

    fn clock_time_get(&mut self, id: ClockId, precision: Timestamp) -> SyscallResult<Timestamp> {
        self.replay(Syscall::ClockTimeGet, &(id, precision), |s| {
            s.clock_time_get(id, precision)
        })
    }

    fn fd_advise(
        &mut self,
        fd: Fd,
        offset: FileSize,
        length: FileSize,
        advice: Advice,
    ) -> SyscallResult<()> {
        self.replay(Syscall::FdAdvise, &(fd, offset, length, advice), |s| {
            s.fd_advise(fd, offset, length, advice)
        })
    }

    fn fd_allocate(&mut self, fd: Fd, offset: FileSize, length: FileSize) -> SyscallResult<()> {
        self.replay(Syscall::FdAllocate, &(fd, offset, length), |s| {
            s.fd_allocate(fd, offset, length)
        })
    }

    fn fd_close(&mut self, fd: Fd) -> SyscallResult<()> {
        self.replay(Syscall::FdClose, &fd, |s| s.fd_close(fd))
    }

    fn fd_data_sync(&mut self, fd: Fd) -> SyscallResult<()> {
        self.replay(Syscall::FdDataSync, &fd, |s| s.fd_data_sync(fd))
    }

    fn fd_stat_get(&mut self, fd: Fd) -> SyscallResult<FdStat> {
        self.replay(Syscall::FdStatGet, &fd, |s| s.fd_stat_get(fd))
    }

    fn fd_stat_set_flags(&mut self, fd: Fd, flags: FdFlags) -> SyscallResult<()> {
        self.replay(Syscall::FdStatSetFlags, &(fd, flags), |s| {
            s.fd_stat_set_flags(fd, flags)
        })
    }

    fn fd_stat_set_rights(
        &mut self,
        fd: Fd,
        rights_base: Rights,
        rights_inheriting: Rights,
    ) -> SyscallResult<()> {
        self.replay(
            Syscall::FdStatSetRights,
            &(fd, rights_base, rights_inheriting),
            |s| s.fd_stat_set_rights(fd, rights_base, rights_inheriting),
        )
    }

    fn fd_file_stat_get(&mut self, fd: Fd) -> SyscallResult<FileStat> {
        self.replay(Syscall::FdFileStatGet, &fd, |s| s.fd_file_stat_get(fd))
    }

    fn fd_file_stat_set_size(&mut self, fd: Fd, size: FileSize) -> SyscallResult<()> {
        self.replay(Syscall::FdFileStatSetSize, &(fd, size), |s| {
            s.fd_file_stat_set_size(fd, size)
        })
    }

    fn fd_file_stat_set_times(
        &mut self,
        fd: Fd,
        access_time: Timestamp,
        modify_time: Timestamp,
        flags: FstFlags,
    ) -> SyscallResult<()> {
        self.replay(
            Syscall::FdFileStatSetTimes,
            &(fd, access_time, modify_time, flags),
            |s| s.fd_file_stat_set_times(fd, access_time, modify_time, flags),
        )
    }

    fn fd_pread(
        &mut self,
        fd: Fd,
        iovs: &mut [IoSliceMut<'_>],
        offset: FileSize,
    ) -> SyscallResult<usize> {
        let params = (fd, capacity(iovs) as u64, offset);
        match self.next_call(Syscall::FdPread, &params)? {
            Some(call) => Ok(scatter(&self.result::<Vec<u8>>(&call)?, iovs)),
            None => self.fallback(Syscall::FdPread)?.fd_pread(fd, iovs, offset),
        }
    }

    fn fd_pre_stat_get(&mut self, fd: Fd) -> SyscallResult<PreStat> {
        self.replay(Syscall::FdPreStatGet, &fd, |s| s.fd_pre_stat_get(fd))
    }

    fn fd_pre_stat_dir_name(&mut self, fd: Fd) -> SyscallResult<String> {
        self.replay(Syscall::FdPreStatDirName, &fd, |s| s.fd_pre_stat_dir_name(fd))
    }

    fn fd_pwrite(
        &mut self,
        fd: Fd,
        iovs: &[IoSlice<'_>],
        offset: FileSize,
    ) -> SyscallResult<usize> {
        self.replay(Syscall::FdPwrite, &(fd, Gather(iovs), offset), |s| {
            s.fd_pwrite(fd, iovs, offset)
        })
    }

    fn fd_read(&mut self, fd: Fd, iovs: &mut [IoSliceMut<'_>]) -> SyscallResult<usize> {
        let params = (fd, capacity(iovs) as u64);
        match self.next_call(Syscall::FdRead, &params)? {
            Some(call) => Ok(scatter(&self.result::<Vec<u8>>(&call)?, iovs)),
            None => self.fallback(Syscall::FdRead)?.fd_read(fd, iovs),
        }
    }

    fn fd_read_dir(&mut self, fd: Fd, buf: &mut [u8], cookie: DirCookie) -> SyscallResult<usize> {
        let params = (fd, buf.len() as u64, cookie);
        match self.next_call(Syscall::FdReadDir, &params)? {
            Some(call) => {
                let data = self.result::<Vec<u8>>(&call)?;
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                Ok(n)
            }
            None => self.fallback(Syscall::FdReadDir)?.fd_read_dir(fd, buf, cookie),
        }
    }

    fn fd_renumber(&mut self, from: Fd, to: Fd) -> SyscallResult<()> {
        self.replay(Syscall::FdRenumber, &(from, to), |s| s.fd_renumber(from, to))
    }

    fn fd_seek(&mut self, fd: Fd, offset: FileDelta, whence: Whence) -> SyscallResult<FileSize> {
        self.replay(Syscall::FdSeek, &(fd, offset, whence), |s| {
            s.fd_seek(fd, offset, whence)
        })
    }

    fn fd_sync(&mut self, fd: Fd) -> SyscallResult<()> {
        self.replay(Syscall::FdSync, &fd, |s| s.fd_sync(fd))
    }

    fn fd_tell(&mut self, fd: Fd) -> SyscallResult<FileSize> {
        self.replay(Syscall::FdTell, &fd, |s| s.fd_tell(fd))
    }

    fn fd_write(&mut self, fd: Fd, iovs: &[IoSlice<'_>]) -> SyscallResult<usize> {
        self.replay(Syscall::FdWrite, &(fd, Gather(iovs)), |s| s.fd_write(fd, iovs))
    }

    fn path_create_directory(&mut self, fd: Fd, path: &str) -> SyscallResult<()> {
        self.replay(Syscall::PathCreateDirectory, &(fd, path), |s| {
            s.path_create_directory(fd, path)
        })
    }

    fn path_file_stat_get(
        &mut self,
        fd: Fd,
        flags: LookupFlags,
        path: &str,
    ) -> SyscallResult<FileStat> {
        self.replay(Syscall::PathFileStatGet, &(fd, flags, path), |s| {
            s.path_file_stat_get(fd, flags, path)
        })
    }

    fn path_file_stat_set_times(
        &mut self,
        fd: Fd,
        flags: LookupFlags,
        path: &str,
        access_time: Timestamp,
        modify_time: Timestamp,
        fst_flags: FstFlags,
    ) -> SyscallResult<()> {
        self.replay(
            Syscall::PathFileStatSetTimes,
            &(fd, flags, path, access_time, modify_time, fst_flags),
            |s| s.path_file_stat_set_times(fd, flags, path, access_time, modify_time, fst_flags),
        )
    }

    fn path_link(
        &mut self,
        old_fd: Fd,
        old_flags: LookupFlags,
        old_path: &str,
        new_fd: Fd,
        new_path: &str,
    ) -> SyscallResult<()> {
        self.replay(
            Syscall::PathLink,
            &(old_fd, old_flags, old_path, new_fd, new_path),
            |s| s.path_link(old_fd, old_flags, old_path, new_fd, new_path),
        )
    }

    fn path_open(
        &mut self,
        fd: Fd,
        dir_flags: LookupFlags,
        path: &str,
        open_flags: OpenFlags,
        rights_base: Rights,
        rights_inheriting: Rights,
        fd_flags: FdFlags,
    ) -> SyscallResult<Fd> {
        self.replay(
            Syscall::PathOpen,
            &(
                fd,
                dir_flags,
                path,
                open_flags,
                rights_base,
                rights_inheriting,
                fd_flags,
            ),
            |s| {
                s.path_open(
                    fd,
                    dir_flags,
                    path,
                    open_flags,
                    rights_base,
                    rights_inheriting,
                    fd_flags,
                )
            },
        )
    }

    fn path_read_link(&mut self, fd: Fd, path: &str) -> SyscallResult<String> {
        self.replay(Syscall::PathReadLink, &(fd, path), |s| s.path_read_link(fd, path))
    }

    fn path_remove_directory(&mut self, fd: Fd, path: &str) -> SyscallResult<()> {
        self.replay(Syscall::PathRemoveDirectory, &(fd, path), |s| {
            s.path_remove_directory(fd, path)
        })
    }

    fn path_rename(
        &mut self,
        fd: Fd,
        old_path: &str,
        new_fd: Fd,
        new_path: &str,
    ) -> SyscallResult<()> {
        self.replay(Syscall::PathRename, &(fd, old_path, new_fd, new_path), |s| {
            s.path_rename(fd, old_path, new_fd, new_path)
        })
    }

    fn path_symlink(&mut self, old_path: &str, fd: Fd, new_path: &str) -> SyscallResult<()> {
        self.replay(Syscall::PathSymlink, &(old_path, fd, new_path), |s| {
            s.path_symlink(old_path, fd, new_path)
        })
    }

    fn path_unlink_file(&mut self, fd: Fd, path: &str) -> SyscallResult<()> {
        self.replay(Syscall::PathUnlinkFile, &(fd, path), |s| {
            s.path_unlink_file(fd, path)
        })
    }

    fn poll_oneoff(&mut self, subscriptions: &[Subscription]) -> SyscallResult<Vec<Event>> {
        self.replay(Syscall::PollOneOff, subscriptions, |s| {
            s.poll_oneoff(subscriptions)
        })
    }

    fn proc_exit(&mut self, code: ExitCode) -> SyscallResult<()> {
        self.replay(Syscall::ProcExit, &code, |s| s.proc_exit(code))
    }

    fn proc_raise(&mut self, signal: Signal) -> SyscallResult<()> {
        self.replay(Syscall::ProcRaise, &signal, |s| s.proc_raise(signal))
    }

    fn sched_yield(&mut self) -> SyscallResult<()> {
        self.replay(Syscall::SchedYield, &(), |s| s.sched_yield())
    }

    fn random_get(&mut self, buf: &mut [u8]) -> SyscallResult<()> {
        let params = buf.len() as u64;
        match self.next_call(Syscall::RandomGet, &params)? {
            Some(call) => {
                let data = self.result::<Vec<u8>>(&call)?;
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                Ok(())
            }
            None => self.fallback(Syscall::RandomGet)?.random_get(buf),
        }
    }

    fn sock_accept(&mut self, fd: Fd, flags: FdFlags) -> SyscallResult<Fd> {
        self.replay(Syscall::SockAccept, &(fd, flags), |s| s.sock_accept(fd, flags))
    }

    fn sock_recv(
        &mut self,
        fd: Fd,
        iovs: &mut [IoSliceMut<'_>],
        flags: RiFlags,
    ) -> SyscallResult<(usize, RoFlags)> {
        let params = (fd, capacity(iovs) as u64, flags);
        match self.next_call(Syscall::SockRecv, &params)? {
            Some(call) => {
                let (data, ro_flags) = self.result::<(Vec<u8>, RoFlags)>(&call)?;
                Ok((scatter(&data, iovs), ro_flags))
            }
            None => self.fallback(Syscall::SockRecv)?.sock_recv(fd, iovs, flags),
        }
    }

    fn sock_send(&mut self, fd: Fd, iovs: &[IoSlice<'_>], flags: SiFlags) -> SyscallResult<usize> {
        self.replay(Syscall::SockSend, &(fd, Gather(iovs), flags), |s| {
            s.sock_send(fd, iovs, flags)
        })
    }

    fn sock_shutdown(&mut self, fd: Fd, flags: SdFlags) -> SyscallResult<()> {
        self.replay(Syscall::SockShutdown, &(fd, flags), |s| s.sock_shutdown(fd, flags))
    }

    fn sock_open(
        &mut self,
        family: ProtocolFamily,
        socket_type: SocketType,
        protocol: Protocol,
        rights_base: Rights,
        rights_inheriting: Rights,
    ) -> SyscallResult<Fd> {
        self.replay(
            Syscall::SockOpen,
            &(family, socket_type, protocol, rights_base, rights_inheriting),
            |s| s.sock_open(family, socket_type, protocol, rights_base, rights_inheriting),
        )
    }

    fn sock_bind(&mut self, fd: Fd, addr: &SocketAddress) -> SyscallResult<SocketAddress> {
        self.replay(Syscall::SockBind, &(fd, addr), |s| s.sock_bind(fd, addr))
    }

    fn sock_connect(&mut self, fd: Fd, addr: &SocketAddress) -> SyscallResult<SocketAddress> {
        self.replay(Syscall::SockConnect, &(fd, addr), |s| s.sock_connect(fd, addr))
    }

    fn sock_listen(&mut self, fd: Fd, backlog: u32) -> SyscallResult<()> {
        self.replay(Syscall::SockListen, &(fd, backlog), |s| s.sock_listen(fd, backlog))
    }

    fn sock_send_to(
        &mut self,
        fd: Fd,
        iovs: &[IoSlice<'_>],
        flags: SiFlags,
        addr: &SocketAddress,
    ) -> SyscallResult<usize> {
        self.replay(Syscall::SockSendTo, &(fd, Gather(iovs), flags, addr), |s| {
            s.sock_send_to(fd, iovs, flags, addr)
        })
    }

    fn sock_recv_from(
        &mut self,
        fd: Fd,
        iovs: &mut [IoSliceMut<'_>],
        flags: RiFlags,
    ) -> SyscallResult<(usize, RoFlags, SocketAddress)> {
        let params = (fd, capacity(iovs) as u64, flags);
        match self.next_call(Syscall::SockRecvFrom, &params)? {
            Some(call) => {
                let (data, ro_flags, addr) =
                    self.result::<(Vec<u8>, RoFlags, SocketAddress)>(&call)?;
                Ok((scatter(&data, iovs), ro_flags, addr))
            }
            None => self.fallback(Syscall::SockRecvFrom)?.sock_recv_from(fd, iovs, flags),
        }
    }

    fn sock_get_opt_int(
        &mut self,
        fd: Fd,
        level: u32,
        option: SocketOption,
    ) -> SyscallResult<i32> {
        self.replay(Syscall::SockGetOptInt, &(fd, level, option), |s| {
            s.sock_get_opt_int(fd, level, option)
        })
    }

    fn sock_set_opt_int(
        &mut self,
        fd: Fd,
        level: u32,
        option: SocketOption,
        value: i32,
    ) -> SyscallResult<()> {
        self.replay(Syscall::SockSetOptInt, &(fd, level, option, value), |s| {
            s.sock_set_opt_int(fd, level, option, value)
        })
    }

    fn sock_local_address(&mut self, fd: Fd) -> SyscallResult<SocketAddress> {
        self.replay(Syscall::SockLocalAddress, &fd, |s| s.sock_local_address(fd))
    }

    fn sock_peer_address(&mut self, fd: Fd) -> SyscallResult<SocketAddress> {
        self.replay(Syscall::SockPeerAddress, &fd, |s| s.sock_peer_address(fd))
    }

    fn close(&mut self) -> SyscallResult<()> {
        if let Some(system) = self.fallback.as_deref_mut() {
            system.close()?;
        }
        match self.failed() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::encode_call;
    use timewarp_core::Errno;
    use timewarp_log::{LogError, Record};

    fn record<P: Encode + ?Sized, T: Encode + ?Sized>(
        timestamp: i64,
        syscall: Syscall,
        params: &P,
        outcome: Result<&T, Errno>,
    ) -> Record {
        let mut call = Vec::new();
        encode_call(&mut call, params, outcome);
        Record::new(timestamp, syscall.id(), call)
    }

    fn replay(records: Vec<Record>) -> Replay<std::vec::IntoIter<Record>> {
        Replay::new(records.into_iter())
    }

    fn cause(err: &SyscallError) -> &ReplayError {
        err.fatal_cause::<ReplayError>().unwrap()
    }

    #[test]
    fn answers_from_records_in_order() {
        let mut r = replay(vec![
            record(0, Syscall::ClockTimeGet, &(1u32, 0u64), Ok(&77u64)),
            record(1, Syscall::FdClose, &Fd(4), Err::<&(), _>(Errno::BADF)),
        ]);
        assert_eq!(r.clock_time_get(1, 0).unwrap(), 77);
        assert_eq!(r.fd_close(Fd(4)).unwrap_err().errno(), Some(Errno::BADF));
        assert_eq!(r.replayed(), 2);
        assert_eq!(r.state(), ReplayState::Active);
    }

    #[test]
    fn read_scatters_recorded_bytes() {
        let mut r = replay(vec![record(
            0,
            Syscall::FdRead,
            &(Fd(0), 6u64),
            Ok(b"hello".as_slice()),
        )]);
        let mut a = [0u8; 2];
        let mut b = [0u8; 4];
        let mut iovs = [IoSliceMut::new(&mut a), IoSliceMut::new(&mut b)];
        assert_eq!(r.fd_read(Fd(0), &mut iovs).unwrap(), 5);
        assert_eq!(&a, b"he");
        assert_eq!(&b, b"llo\0");
    }

    #[test]
    fn random_get_restores_recorded_bytes() {
        let mut r = replay(vec![record(0, Syscall::RandomGet, &4u64, Ok([9u8, 8, 7, 6].as_slice()))]);
        let mut buf = [0u8; 4];
        r.random_get(&mut buf).unwrap();
        assert_eq!(buf, [9, 8, 7, 6]);
    }

    #[test]
    fn different_function_is_divergence() {
        let mut r = replay(vec![record(0, Syscall::FdClose, &Fd(3), Ok(&()))]);
        let err = r.fd_sync(Fd(3)).unwrap_err();
        assert!(matches!(
            cause(&err),
            ReplayError::Divergence {
                record: 0,
                recorded: Syscall::FdClose,
                requested: Syscall::FdSync,
            }
        ));
    }

    #[test]
    fn different_parameters_are_divergence() {
        let mut r = replay(vec![record(0, Syscall::FdClose, &Fd(3), Ok(&()))]);
        let err = r.fd_close(Fd(4)).unwrap_err();
        assert!(matches!(
            cause(&err),
            ReplayError::ParamsMismatch {
                record: 0,
                syscall: Syscall::FdClose,
            }
        ));
    }

    #[test]
    fn unknown_function_id_is_fatal() {
        let mut r = replay(vec![Record::new(0, 999, Vec::new())]);
        let err = r.sched_yield().unwrap_err();
        assert!(matches!(
            cause(&err),
            ReplayError::UnknownFunction {
                function_id: 999,
                ..
            }
        ));
    }

    #[test]
    fn malformed_outcome_is_fatal() {
        let mut call = Vec::new();
        encode_call(&mut call, &Fd(1), Ok(&7u64));
        call.truncate(call.len() - 1);
        let mut r = replay(vec![Record::new(0, Syscall::FdTell.id(), call)]);
        let err = r.fd_tell(Fd(1)).unwrap_err();
        assert!(matches!(cause(&err), ReplayError::Decode { .. }));
    }

    #[test]
    fn call_after_end_without_fallback_is_fatal() {
        let mut r = replay(vec![record(0, Syscall::SchedYield, &(), Ok(&()))]);
        r.sched_yield().unwrap();
        let err = r.args_get().unwrap_err();
        assert!(matches!(
            cause(&err),
            ReplayError::UnexpectedCallAfterEof {
                syscall: Syscall::ArgsGet,
                records: 1,
            }
        ));
        assert_eq!(r.state(), ReplayState::Exhausted);
        // Still exhausted; the error repeats.
        assert!(r.sched_yield().unwrap_err().is_fatal());
    }

    struct BrokenSource;

    impl RecordSource for BrokenSource {
        fn next_record(&mut self) -> Result<Option<Record>, LogError> {
            Err(LogError::CorruptSegment {
                offset: 0,
                detail: "checksum mismatch".into(),
            })
        }
    }

    #[test]
    fn log_error_is_fatal() {
        let mut r = Replay::new(BrokenSource);
        let err = r.sched_yield().unwrap_err();
        assert!(matches!(
            cause(&err),
            ReplayError::Log {
                record: 0,
                source: LogError::CorruptSegment { .. },
            }
        ));
        assert_eq!(r.state(), ReplayState::Failed);
    }

    /// Yields an error first, then records, as a reader that skipped a
    /// damaged batch would.
    struct SkippingSource(Vec<Record>, bool);

    impl RecordSource for SkippingSource {
        fn next_record(&mut self) -> Result<Option<Record>, LogError> {
            if !self.1 {
                self.1 = true;
                return Err(LogError::CorruptSegment {
                    offset: 0,
                    detail: "checksum mismatch".into(),
                });
            }
            Ok((!self.0.is_empty()).then(|| self.0.remove(0)))
        }
    }

    fn two_writes() -> Vec<Record> {
        vec![
            record(0, Syscall::FdWrite, &(Fd(1), b"A".as_slice()), Ok(&1usize)),
            record(1, Syscall::FdWrite, &(Fd(1), b"B".as_slice()), Ok(&1usize)),
        ]
    }

    #[test]
    fn divergence_ends_the_session() {
        let mut r = replay(two_writes());
        let err = r.sched_yield().unwrap_err();
        assert!(matches!(cause(&err), ReplayError::Divergence { record: 0, .. }));
        assert_eq!(r.state(), ReplayState::Failed);

        // The next record would match, but the session is over.
        let err = r.fd_write(Fd(1), &[IoSlice::new(b"B")]).unwrap_err();
        assert!(matches!(
            cause(&err),
            ReplayError::Failed { record: 0, reason } if reason.contains("diverged")
        ));
        assert_eq!(r.replayed(), 0);
        assert!(r.close().unwrap_err().is_fatal());

        let (mut rest, _) = r.into_inner();
        assert_eq!(rest.next().map(|rec| rec.timestamp), Some(1));
    }

    #[test]
    fn parameter_mismatch_ends_the_session() {
        let mut r = replay(two_writes());
        r.fd_write(Fd(1), &[IoSlice::new(b"X")]).unwrap_err();
        let err = r.fd_write(Fd(1), &[IoSlice::new(b"B")]).unwrap_err();
        assert!(matches!(cause(&err), ReplayError::Failed { record: 0, .. }));
    }

    #[test]
    fn malformed_outcome_ends_the_session() {
        let mut call = Vec::new();
        encode_call(&mut call, &Fd(1), Ok(&7u64));
        call.truncate(call.len() - 1);
        let mut r = replay(vec![
            Record::new(0, Syscall::FdTell.id(), call),
            record(1, Syscall::FdTell, &Fd(1), Ok(&0u64)),
        ]);
        r.fd_tell(Fd(1)).unwrap_err();
        assert_eq!(r.state(), ReplayState::Failed);
        let err = r.fd_tell(Fd(1)).unwrap_err();
        assert!(matches!(cause(&err), ReplayError::Failed { .. }));
    }

    #[test]
    fn unreadable_log_is_not_read_past() {
        let mut r = Replay::new(SkippingSource(two_writes(), false));
        let err = r.fd_write(Fd(1), &[IoSlice::new(b"A")]).unwrap_err();
        assert!(matches!(cause(&err), ReplayError::Log { .. }));
        let err = r.fd_write(Fd(1), &[IoSlice::new(b"A")]).unwrap_err();
        assert!(matches!(cause(&err), ReplayError::Failed { .. }));
        let (source, _) = r.into_inner();
        assert_eq!(source.0.len(), 2);
    }
}

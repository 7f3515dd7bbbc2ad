//! Recording proxy over a live [`System`].
//!
//! [`Recorder`] forwards every call to the wrapped system unchanged and
//! appends one record per call to a [`RecordSink`]. The guest sees exactly
//! what the wrapped system returned; the only difference is the write.

use std::io::{IoSlice, IoSliceMut, Write};
use std::time::Instant;

use timewarp_core::wasi::{
    Advice, ClockId, DirCookie, ExitCode, FdFlags, FileDelta, FileSize, FstFlags, LookupFlags,
    OpenFlags, Protocol, ProtocolFamily, RiFlags, Rights, RoFlags, SdFlags, SiFlags, Signal,
    SocketOption, SocketType, Timestamp, Whence,
};
use timewarp_core::{
    Errno, Event, Fd, FdStat, FileStat, PreStat, SocketAddress, Subscription, Syscall,
    SyscallError, SyscallResult, System,
};
use timewarp_log::{LogError, LogWriter, Record, RecordBuilder};
use tracing::{error, trace};

use crate::call::{capacity, encode_call, Encode, Filled, Gather};
use crate::error::RecordError;

/// Destination for recorded calls.
pub trait RecordSink {
    /// Append the record held by `builder`.
    fn write_record(&mut self, builder: &mut RecordBuilder) -> Result<(), LogError>;

    /// Make every appended record durable.
    fn flush(&mut self) -> Result<(), LogError>;
}

impl<W: Write> RecordSink for LogWriter<W> {
    fn write_record(&mut self, builder: &mut RecordBuilder) -> Result<(), LogError> {
        self.write_builder(builder)
    }

    fn flush(&mut self) -> Result<(), LogError> {
        LogWriter::flush(self)
    }
}

impl RecordSink for Vec<Record> {
    fn write_record(&mut self, builder: &mut RecordBuilder) -> Result<(), LogError> {
        self.push(builder.to_record());
        Ok(())
    }

    fn flush(&mut self) -> Result<(), LogError> {
        Ok(())
    }
}

impl<K: RecordSink + ?Sized> RecordSink for &mut K {
    fn write_record(&mut self, builder: &mut RecordBuilder) -> Result<(), LogError> {
        (**self).write_record(builder)
    }

    fn flush(&mut self) -> Result<(), LogError> {
        (**self).flush()
    }
}

/// A [`System`] that records every call made through it.
///
/// Timestamps are nanoseconds since the recorder was created, taken when
/// the call enters. Fatal errors from the wrapped system are passed
/// through without being recorded. A failed log write turns the call into
/// a fatal [`RecordError`]: the rest of the run could not be reproduced.
///
/// `proc_exit` is recorded and flushed before it is forwarded, because a
/// live exit does not return.
pub struct Recorder<S, K> {
    system: S,
    sink: K,
    builder: RecordBuilder,
    start: Instant,
    recorded: u64,
}

impl<S: System, K: RecordSink> Recorder<S, K> {
    /// Wrap `system`, writing records to `sink`.
    pub fn new(system: S, sink: K) -> Self {
        Self::with_start(system, sink, Instant::now())
    }

    /// Wrap `system` with an explicit process start time.
    pub fn with_start(system: S, sink: K, start: Instant) -> Self {
        Self {
            system,
            sink,
            builder: RecordBuilder::new(),
            start,
            recorded: 0,
        }
    }

    /// Calls recorded so far.
    pub fn recorded(&self) -> u64 {
        self.recorded
    }

    /// The wrapped system.
    pub fn system(&self) -> &S {
        &self.system
    }

    /// The record sink.
    pub fn sink(&self) -> &K {
        &self.sink
    }

    /// Unwrap into the system and the sink. Buffered records are not
    /// flushed; call [`System::close`] first to persist them.
    pub fn into_parts(self) -> (S, K) {
        (self.system, self.sink)
    }

    fn now(&self) -> i64 {
        i64::try_from(self.start.elapsed().as_nanos()).unwrap_or(i64::MAX)
    }

    fn write<P, T>(
        &mut self,
        syscall: Syscall,
        timestamp: i64,
        params: &P,
        outcome: Result<&T, Errno>,
    ) -> Result<(), LogError>
    where
        P: Encode + ?Sized,
        T: Encode + ?Sized,
    {
        self.builder.reset(timestamp);
        self.builder.set_function_id(syscall.id())?;
        encode_call(self.builder.function_call_mut()?, params, outcome);
        self.sink.write_record(&mut self.builder)
    }

    fn record<P, T>(
        &mut self,
        syscall: Syscall,
        timestamp: i64,
        params: &P,
        result: Result<&T, &SyscallError>,
    ) -> SyscallResult<()>
    where
        P: Encode + ?Sized,
        T: Encode + ?Sized,
    {
        let outcome = match result {
            Ok(value) => Ok(value),
            Err(SyscallError::Errno(errno)) => Err(*errno),
            Err(SyscallError::Fatal(_)) => return Ok(()),
        };
        match self.write(syscall, timestamp, params, outcome) {
            Ok(()) => {
                self.recorded += 1;
                trace!(%syscall, timestamp, "recorded call");
                Ok(())
            }
            Err(source) => {
                error!(%syscall, error = %source, "failed to record call");
                Err(SyscallError::fatal(RecordError { syscall, source }))
            }
        }
    }

    fn call<P, T>(
        &mut self,
        syscall: Syscall,
        params: &P,
        op: impl FnOnce(&mut S) -> SyscallResult<T>,
    ) -> SyscallResult<T>
    where
        P: Encode + ?Sized,
        T: Encode,
    {
        let timestamp = self.now();
        let result = op(&mut self.system);
        self.record(syscall, timestamp, params, result.as_ref())?;
        result
    }
}

impl<S: System, K: RecordSink> System for Recorder<S, K> {
    fn args_get(&mut self) -> SyscallResult<Vec<String>> {
        self.call(Syscall::ArgsGet, &(), |s| s.args_get())
    }

    fn environ_get(&mut self) -> SyscallResult<Vec<String>> {
        self.call(Syscall::EnvironGet, &(), |s| s.environ_get())
    }

    fn clock_res_get(&mut self, id: ClockId) -> SyscallResult<Timestamp> {
        self.call(Syscall::ClockResGet, &id, |s| s.clock_res_get(id))
    }

    fn clock_time_get(&mut self, id: ClockId, precision: Timestamp) -> SyscallResult<Timestamp> {
        self.call(Syscall::ClockTimeGet, &(id, precision), |s| {
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
        self.call(Syscall::FdAdvise, &(fd, offset, length, advice), |s| {
            s.fd_advise(fd, offset, length, advice)
        })
    }

    fn fd_allocate(&mut self, fd: Fd, offset: FileSize, length: FileSize) -> SyscallResult<()> {
        self.call(Syscall::FdAllocate, &(fd, offset, length), |s| {
            s.fd_allocate(fd, offset, length)
        })
    }

    fn fd_close(&mut self, fd: Fd) -> SyscallResult<()> {
        self.call(Syscall::FdClose, &fd, |s| s.fd_close(fd))
    }

    fn fd_data_sync(&mut self, fd: Fd) -> SyscallResult<()> {
        self.call(Syscall::FdDataSync, &fd, |s| s.fd_data_sync(fd))
    }

    fn fd_stat_get(&mut self, fd: Fd) -> SyscallResult<FdStat> {
        self.call(Syscall::FdStatGet, &fd, |s| s.fd_stat_get(fd))
    }

    fn fd_stat_set_flags(&mut self, fd: Fd, flags: FdFlags) -> SyscallResult<()> {
        self.call(Syscall::FdStatSetFlags, &(fd, flags), |s| {
            s.fd_stat_set_flags(fd, flags)
        })
    }

    fn fd_stat_set_rights(
        &mut self,
        fd: Fd,
        rights_base: Rights,
        rights_inheriting: Rights,
    ) -> SyscallResult<()> {
        self.call(
            Syscall::FdStatSetRights,
            &(fd, rights_base, rights_inheriting),
            |s| s.fd_stat_set_rights(fd, rights_base, rights_inheriting),
        )
    }

    fn fd_file_stat_get(&mut self, fd: Fd) -> SyscallResult<FileStat> {
        self.call(Syscall::FdFileStatGet, &fd, |s| s.fd_file_stat_get(fd))
    }

    fn fd_file_stat_set_size(&mut self, fd: Fd, size: FileSize) -> SyscallResult<()> {
        self.call(Syscall::FdFileStatSetSize, &(fd, size), |s| {
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
        self.call(
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
        let timestamp = self.now();
        let params = (fd, capacity(iovs) as u64, offset);
        let result = self.system.fd_pread(fd, iovs, offset);
        let filled = result.as_ref().map(|&n| Filled::new(iovs, n));
        self.record(
            Syscall::FdPread,
            timestamp,
            &params,
            filled.as_ref().map_err(|e| *e),
        )?;
        result
    }

    fn fd_pre_stat_get(&mut self, fd: Fd) -> SyscallResult<PreStat> {
        self.call(Syscall::FdPreStatGet, &fd, |s| s.fd_pre_stat_get(fd))
    }

    fn fd_pre_stat_dir_name(&mut self, fd: Fd) -> SyscallResult<String> {
        self.call(Syscall::FdPreStatDirName, &fd, |s| s.fd_pre_stat_dir_name(fd))
    }

    fn fd_pwrite(
        &mut self,
        fd: Fd,
        iovs: &[IoSlice<'_>],
        offset: FileSize,
    ) -> SyscallResult<usize> {
        self.call(Syscall::FdPwrite, &(fd, Gather(iovs), offset), |s| {
            s.fd_pwrite(fd, iovs, offset)
        })
    }

    fn fd_read(&mut self, fd: Fd, iovs: &mut [IoSliceMut<'_>]) -> SyscallResult<usize> {
        let timestamp = self.now();
        let params = (fd, capacity(iovs) as u64);
        let result = self.system.fd_read(fd, iovs);
        let filled = result.as_ref().map(|&n| Filled::new(iovs, n));
        self.record(
            Syscall::FdRead,
            timestamp,
            &params,
            filled.as_ref().map_err(|e| *e),
        )?;
        result
    }

    fn fd_read_dir(&mut self, fd: Fd, buf: &mut [u8], cookie: DirCookie) -> SyscallResult<usize> {
        let timestamp = self.now();
        let params = (fd, buf.len() as u64, cookie);
        let result = self.system.fd_read_dir(fd, buf, cookie);
        let filled = result.as_ref().map(|&n| &buf[..n.min(buf.len())]);
        self.record(Syscall::FdReadDir, timestamp, &params, filled)?;
        result
    }

    fn fd_renumber(&mut self, from: Fd, to: Fd) -> SyscallResult<()> {
        self.call(Syscall::FdRenumber, &(from, to), |s| s.fd_renumber(from, to))
    }

    fn fd_seek(&mut self, fd: Fd, offset: FileDelta, whence: Whence) -> SyscallResult<FileSize> {
        self.call(Syscall::FdSeek, &(fd, offset, whence), |s| {
            s.fd_seek(fd, offset, whence)
        })
    }

    fn fd_sync(&mut self, fd: Fd) -> SyscallResult<()> {
        self.call(Syscall::FdSync, &fd, |s| s.fd_sync(fd))
    }

    fn fd_tell(&mut self, fd: Fd) -> SyscallResult<FileSize> {
        self.call(Syscall::FdTell, &fd, |s| s.fd_tell(fd))
    }

    fn fd_write(&mut self, fd: Fd, iovs: &[IoSlice<'_>]) -> SyscallResult<usize> {
        self.call(Syscall::FdWrite, &(fd, Gather(iovs)), |s| s.fd_write(fd, iovs))
    }

    fn path_create_directory(&mut self, fd: Fd, path: &str) -> SyscallResult<()> {
        self.call(Syscall::PathCreateDirectory, &(fd, path), |s| {
            s.path_create_directory(fd, path)
        })
    }

    fn path_file_stat_get(
        &mut self,
        fd: Fd,
        flags: LookupFlags,
        path: &str,
    ) -> SyscallResult<FileStat> {
        self.call(Syscall::PathFileStatGet, &(fd, flags, path), |s| {
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
        self.call(
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
        self.call(
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
        self.call(
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
        self.call(Syscall::PathReadLink, &(fd, path), |s| s.path_read_link(fd, path))
    }

    fn path_remove_directory(&mut self, fd: Fd, path: &str) -> SyscallResult<()> {
        self.call(Syscall::PathRemoveDirectory, &(fd, path), |s| {
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
        self.call(Syscall::PathRename, &(fd, old_path, new_fd, new_path), |s| {
            s.path_rename(fd, old_path, new_fd, new_path)
        })
    }

    fn path_symlink(&mut self, old_path: &str, fd: Fd, new_path: &str) -> SyscallResult<()> {
        self.call(Syscall::PathSymlink, &(old_path, fd, new_path), |s| {
            s.path_symlink(old_path, fd, new_path)
        })
    }

    fn path_unlink_file(&mut self, fd: Fd, path: &str) -> SyscallResult<()> {
        self.call(Syscall::PathUnlinkFile, &(fd, path), |s| {
            s.path_unlink_file(fd, path)
        })
    }

    fn poll_oneoff(&mut self, subscriptions: &[Subscription]) -> SyscallResult<Vec<Event>> {
        self.call(Syscall::PollOneOff, subscriptions, |s| {
            s.poll_oneoff(subscriptions)
        })
    }

    fn proc_exit(&mut self, code: ExitCode) -> SyscallResult<()> {
        let timestamp = self.now();
        self.record(Syscall::ProcExit, timestamp, &code, Ok(&()))?;
        if let Err(source) = self.sink.flush() {
            error!(error = %source, "failed to flush log before exit");
            return Err(SyscallError::fatal(RecordError {
                syscall: Syscall::ProcExit,
                source,
            }));
        }
        self.system.proc_exit(code)
    }

    fn proc_raise(&mut self, signal: Signal) -> SyscallResult<()> {
        self.call(Syscall::ProcRaise, &signal, |s| s.proc_raise(signal))
    }

    fn sched_yield(&mut self) -> SyscallResult<()> {
        self.call(Syscall::SchedYield, &(), |s| s.sched_yield())
    }

    fn random_get(&mut self, buf: &mut [u8]) -> SyscallResult<()> {
        let timestamp = self.now();
        let params = buf.len() as u64;
        let result = self.system.random_get(buf);
        let filled = result.as_ref().map(|_| &*buf);
        self.record(Syscall::RandomGet, timestamp, &params, filled)?;
        result
    }

    fn sock_accept(&mut self, fd: Fd, flags: FdFlags) -> SyscallResult<Fd> {
        self.call(Syscall::SockAccept, &(fd, flags), |s| s.sock_accept(fd, flags))
    }

    fn sock_recv(
        &mut self,
        fd: Fd,
        iovs: &mut [IoSliceMut<'_>],
        flags: RiFlags,
    ) -> SyscallResult<(usize, RoFlags)> {
        let timestamp = self.now();
        let params = (fd, capacity(iovs) as u64, flags);
        let result = self.system.sock_recv(fd, iovs, flags);
        let filled = result
            .as_ref()
            .map(|&(n, ro_flags)| (Filled::new(iovs, n), ro_flags));
        self.record(
            Syscall::SockRecv,
            timestamp,
            &params,
            filled.as_ref().map_err(|e| *e),
        )?;
        result
    }

    fn sock_send(&mut self, fd: Fd, iovs: &[IoSlice<'_>], flags: SiFlags) -> SyscallResult<usize> {
        self.call(Syscall::SockSend, &(fd, Gather(iovs), flags), |s| {
            s.sock_send(fd, iovs, flags)
        })
    }

    fn sock_shutdown(&mut self, fd: Fd, flags: SdFlags) -> SyscallResult<()> {
        self.call(Syscall::SockShutdown, &(fd, flags), |s| s.sock_shutdown(fd, flags))
    }

    fn sock_open(
        &mut self,
        family: ProtocolFamily,
        socket_type: SocketType,
        protocol: Protocol,
        rights_base: Rights,
        rights_inheriting: Rights,
    ) -> SyscallResult<Fd> {
        self.call(
            Syscall::SockOpen,
            &(family, socket_type, protocol, rights_base, rights_inheriting),
            |s| s.sock_open(family, socket_type, protocol, rights_base, rights_inheriting),
        )
    }

    fn sock_bind(&mut self, fd: Fd, addr: &SocketAddress) -> SyscallResult<SocketAddress> {
        self.call(Syscall::SockBind, &(fd, addr), |s| s.sock_bind(fd, addr))
    }

    fn sock_connect(&mut self, fd: Fd, addr: &SocketAddress) -> SyscallResult<SocketAddress> {
        self.call(Syscall::SockConnect, &(fd, addr), |s| s.sock_connect(fd, addr))
    }

    fn sock_listen(&mut self, fd: Fd, backlog: u32) -> SyscallResult<()> {
        self.call(Syscall::SockListen, &(fd, backlog), |s| s.sock_listen(fd, backlog))
    }

    fn sock_send_to(
        &mut self,
        fd: Fd,
        iovs: &[IoSlice<'_>],
        flags: SiFlags,
        addr: &SocketAddress,
    ) -> SyscallResult<usize> {
        self.call(Syscall::SockSendTo, &(fd, Gather(iovs), flags, addr), |s| {
            s.sock_send_to(fd, iovs, flags, addr)
        })
    }

    fn sock_recv_from(
        &mut self,
        fd: Fd,
        iovs: &mut [IoSliceMut<'_>],
        flags: RiFlags,
    ) -> SyscallResult<(usize, RoFlags, SocketAddress)> {
        let timestamp = self.now();
        let params = (fd, capacity(iovs) as u64, flags);
        let result = self.system.sock_recv_from(fd, iovs, flags);
        let filled = result
            .as_ref()
            .map(|(n, ro_flags, addr)| (Filled::new(iovs, *n), *ro_flags, addr));
        self.record(
            Syscall::SockRecvFrom,
            timestamp,
            &params,
            filled.as_ref().map_err(|e| *e),
        )?;
        result
    }

    fn sock_get_opt_int(
        &mut self,
        fd: Fd,
        level: u32,
        option: SocketOption,
    ) -> SyscallResult<i32> {
        self.call(Syscall::SockGetOptInt, &(fd, level, option), |s| {
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
        self.call(Syscall::SockSetOptInt, &(fd, level, option, value), |s| {
            s.sock_set_opt_int(fd, level, option, value)
        })
    }

    fn sock_local_address(&mut self, fd: Fd) -> SyscallResult<SocketAddress> {
        self.call(Syscall::SockLocalAddress, &fd, |s| s.sock_local_address(fd))
    }

    fn sock_peer_address(&mut self, fd: Fd) -> SyscallResult<SocketAddress> {
        self.call(Syscall::SockPeerAddress, &fd, |s| s.sock_peer_address(fd))
    }

    fn close(&mut self) -> SyscallResult<()> {
        if let Err(source) = self.sink.flush() {
            error!(error = %source, "failed to flush log on close");
            return Err(SyscallError::fatal(source));
        }
        self.system.close()
    }
}

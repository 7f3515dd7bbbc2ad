//! An in-memory [`System`] with deterministic results.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::{IoSlice, IoSliceMut};

use rand_chacha::rand_core::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use timewarp_core::wasi::{
    Advice, ClockId, DirCookie, ExitCode, FdFlags, FileDelta, FileSize, FileType, FstFlags,
    LookupFlags, OpenFlags, Protocol, ProtocolFamily, RiFlags, Rights, RoFlags, SdFlags,
    SiFlags, Signal, SocketOption, SocketType, Timestamp, Whence,
};
use timewarp_core::{
    Errno, Event, Fd, FdStat, FileStat, PreStat, SocketAddress, Subscription, SubscriptionKind,
    Syscall, SyscallResult, System,
};

pub const FILETYPE_CHARACTER_DEVICE: FileType = 2;
pub const FILETYPE_DIRECTORY: FileType = 3;
pub const FILETYPE_REGULAR_FILE: FileType = 4;
pub const FILETYPE_SOCKET_STREAM: FileType = 6;

pub const OFLAGS_CREAT: OpenFlags = 1;
pub const OFLAGS_DIRECTORY: OpenFlags = 2;
pub const OFLAGS_EXCL: OpenFlags = 4;
pub const OFLAGS_TRUNC: OpenFlags = 8;

/// Descriptor of the preopened root directory.
pub const ROOT_FD: Fd = Fd(3);

/// Nanoseconds the mock clock advances per `clock_time_get`.
pub const CLOCK_STEP: Timestamp = 1_000_000;

const CLOCK_RESOLUTION: Timestamp = 1_000;
const EPHEMERAL_PORT: u16 = 49152;

enum Entry {
    Stdio,
    Dir,
    File { path: String, pos: u64 },
    Socket(Socket),
}

#[derive(Default)]
struct Socket {
    local: SocketAddress,
    peer: SocketAddress,
    inbox: Vec<u8>,
    outbox: Vec<u8>,
    options: HashMap<(u32, SocketOption), i32>,
}

/// Deterministic in-memory system.
///
/// Two mocks built the same way return the same results for the same
/// call sequence: randomness comes from a seeded [`ChaCha8Rng`], the clock
/// advances by [`CLOCK_STEP`] per read, and descriptors are allocated in
/// order. Every call is logged in [`calls`](Self::calls).
pub struct MockSystem {
    rng: ChaCha8Rng,
    clock: Timestamp,
    args: Vec<String>,
    env: Vec<String>,
    stdin: Vec<u8>,
    stdin_pos: usize,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    entries: BTreeMap<u32, Entry>,
    next_fd: u32,
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
    links: BTreeMap<String, String>,
    network: Vec<u8>,
    next_port: u16,
    exit_code: Option<ExitCode>,
    calls: Vec<Syscall>,
    closed: bool,
}

impl MockSystem {
    pub fn new(seed: u64) -> Self {
        let mut entries = BTreeMap::new();
        for fd in [Fd::STDIN, Fd::STDOUT, Fd::STDERR] {
            entries.insert(fd.0, Entry::Stdio);
        }
        entries.insert(ROOT_FD.0, Entry::Dir);
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            clock: 0,
            args: Vec::new(),
            env: Vec::new(),
            stdin: Vec::new(),
            stdin_pos: 0,
            stdout: Vec::new(),
            stderr: Vec::new(),
            entries,
            next_fd: ROOT_FD.0 + 1,
            files: BTreeMap::new(),
            dirs: BTreeSet::new(),
            links: BTreeMap::new(),
            network: Vec::new(),
            next_port: EPHEMERAL_PORT,
            exit_code: None,
            calls: Vec::new(),
            closed: false,
        }
    }

    pub fn with_args<I: IntoIterator<Item = S>, S: Into<String>>(mut self, args: I) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env<I: IntoIterator<Item = S>, S: Into<String>>(mut self, env: I) -> Self {
        self.env = env.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_stdin(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.stdin = data.into();
        self
    }

    /// Add a file under the root directory.
    pub fn with_file(mut self, path: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        self.files.insert(path.into(), data.into());
        self
    }

    /// Bytes delivered to the next connected or accepted socket.
    pub fn with_network_input(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.network = data.into();
        self
    }

    pub fn stdout(&self) -> &[u8] {
        &self.stdout
    }

    pub fn stderr(&self) -> &[u8] {
        &self.stderr
    }

    pub fn file(&self, path: &str) -> Option<&[u8]> {
        self.files.get(path).map(Vec::as_slice)
    }

    /// Bytes sent on a socket.
    pub fn sent(&self, fd: Fd) -> Option<&[u8]> {
        match self.entries.get(&fd.0) {
            Some(Entry::Socket(s)) => Some(&s.outbox),
            _ => None,
        }
    }

    pub fn exit_code(&self) -> Option<ExitCode> {
        self.exit_code
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> &[Syscall] {
        &self.calls
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn log(&mut self, syscall: Syscall) {
        self.calls.push(syscall);
    }

    fn allocate(&mut self, entry: Entry) -> Fd {
        let fd = self.next_fd;
        self.next_fd += 1;
        self.entries.insert(fd, entry);
        Fd(fd)
    }

    fn entry(&self, fd: Fd) -> SyscallResult<&Entry> {
        self.entries.get(&fd.0).ok_or(Errno::BADF.into())
    }

    fn socket(&mut self, fd: Fd) -> SyscallResult<&mut Socket> {
        match self.entries.get_mut(&fd.0) {
            Some(Entry::Socket(s)) => Ok(s),
            Some(_) => Err(Errno::NOTSUP.into()),
            None => Err(Errno::BADF.into()),
        }
    }

    fn dir(&self, fd: Fd) -> SyscallResult<()> {
        match self.entry(fd)? {
            Entry::Dir => Ok(()),
            _ => Err(Errno::NOTDIR.into()),
        }
    }

    fn open_file(&mut self, fd: Fd) -> SyscallResult<(String, u64)> {
        match self.entry(fd)? {
            Entry::File { path, pos } => Ok((path.clone(), *pos)),
            Entry::Dir => Err(Errno::ISDIR.into()),
            _ => Err(Errno::SPIPE.into()),
        }
    }

    fn set_pos(&mut self, fd: Fd, new: u64) {
        if let Some(Entry::File { pos, .. }) = self.entries.get_mut(&fd.0) {
            *pos = new;
        }
    }

    fn read_at(&self, path: &str, offset: u64, iovs: &mut [IoSliceMut<'_>]) -> usize {
        let data = self.files.get(path).map(Vec::as_slice).unwrap_or_default();
        let start = (offset as usize).min(data.len());
        scatter(&data[start..], iovs)
    }

    fn write_at(&mut self, path: &str, offset: u64, iovs: &[IoSlice<'_>]) -> usize {
        let data = self.files.entry(path.to_owned()).or_default();
        let mut at = offset as usize;
        for iov in iovs {
            if data.len() < at + iov.len() {
                data.resize(at + iov.len(), 0);
            }
            data[at..at + iov.len()].copy_from_slice(iov);
            at += iov.len();
        }
        at - offset as usize
    }

    fn file_stat(&self, path: &str) -> SyscallResult<FileStat> {
        if self.dirs.contains(path) {
            return Ok(FileStat {
                file_type: FILETYPE_DIRECTORY,
                nlink: 1,
                ..FileStat::default()
            });
        }
        let data = self.files.get(path).ok_or(Errno::NOENT)?;
        Ok(FileStat {
            ino: self.files.keys().position(|p| p == path).unwrap_or(0) as u64 + 1,
            file_type: FILETYPE_REGULAR_FILE,
            nlink: 1,
            size: data.len() as u64,
            ..FileStat::default()
        })
    }

    fn next_address(&mut self) -> SocketAddress {
        let port = self.next_port;
        self.next_port = self.next_port.wrapping_add(1);
        SocketAddress::Inet {
            addr: [127, 0, 0, 1],
            port,
        }
    }
}

fn scatter(data: &[u8], iovs: &mut [IoSliceMut<'_>]) -> usize {
    let mut copied = 0;
    for iov in iovs.iter_mut() {
        let n = (data.len() - copied).min(iov.len());
        iov[..n].copy_from_slice(&data[copied..copied + n]);
        copied += n;
    }
    copied
}

fn gathered(iovs: &[IoSlice<'_>]) -> usize {
    iovs.iter().map(|iov| iov.len()).sum()
}

impl System for MockSystem {
    fn args_get(&mut self) -> SyscallResult<Vec<String>> {
        self.log(Syscall::ArgsGet);
        Ok(self.args.clone())
    }

    fn environ_get(&mut self) -> SyscallResult<Vec<String>> {
        self.log(Syscall::EnvironGet);
        Ok(self.env.clone())
    }

    fn clock_res_get(&mut self, id: ClockId) -> SyscallResult<Timestamp> {
        self.log(Syscall::ClockResGet);
        if id > 3 {
            return Err(Errno::INVAL.into());
        }
        Ok(CLOCK_RESOLUTION)
    }

    fn clock_time_get(&mut self, id: ClockId, _precision: Timestamp) -> SyscallResult<Timestamp> {
        self.log(Syscall::ClockTimeGet);
        if id > 3 {
            return Err(Errno::INVAL.into());
        }
        self.clock += CLOCK_STEP;
        Ok(self.clock)
    }

    fn fd_advise(&mut self, fd: Fd, _: FileSize, _: FileSize, _: Advice) -> SyscallResult<()> {
        self.log(Syscall::FdAdvise);
        self.open_file(fd).map(drop)
    }

    fn fd_allocate(&mut self, fd: Fd, offset: FileSize, length: FileSize) -> SyscallResult<()> {
        self.log(Syscall::FdAllocate);
        let (path, _) = self.open_file(fd)?;
        let data = self.files.entry(path).or_default();
        let end = (offset + length) as usize;
        if data.len() < end {
            data.resize(end, 0);
        }
        Ok(())
    }

    fn fd_close(&mut self, fd: Fd) -> SyscallResult<()> {
        self.log(Syscall::FdClose);
        self.entries.remove(&fd.0).map(drop).ok_or(Errno::BADF.into())
    }

    fn fd_data_sync(&mut self, fd: Fd) -> SyscallResult<()> {
        self.log(Syscall::FdDataSync);
        self.entry(fd).map(drop)
    }

    fn fd_stat_get(&mut self, fd: Fd) -> SyscallResult<FdStat> {
        self.log(Syscall::FdStatGet);
        let file_type = match self.entry(fd)? {
            Entry::Stdio => FILETYPE_CHARACTER_DEVICE,
            Entry::Dir => FILETYPE_DIRECTORY,
            Entry::File { .. } => FILETYPE_REGULAR_FILE,
            Entry::Socket(_) => FILETYPE_SOCKET_STREAM,
        };
        Ok(FdStat {
            file_type,
            flags: 0,
            rights_base: u64::MAX,
            rights_inheriting: u64::MAX,
        })
    }

    fn fd_stat_set_flags(&mut self, fd: Fd, _flags: FdFlags) -> SyscallResult<()> {
        self.log(Syscall::FdStatSetFlags);
        self.entry(fd).map(drop)
    }

    fn fd_stat_set_rights(&mut self, fd: Fd, _: Rights, _: Rights) -> SyscallResult<()> {
        self.log(Syscall::FdStatSetRights);
        self.entry(fd).map(drop)
    }

    fn fd_file_stat_get(&mut self, fd: Fd) -> SyscallResult<FileStat> {
        self.log(Syscall::FdFileStatGet);
        let (path, _) = self.open_file(fd)?;
        self.file_stat(&path)
    }

    fn fd_file_stat_set_size(&mut self, fd: Fd, size: FileSize) -> SyscallResult<()> {
        self.log(Syscall::FdFileStatSetSize);
        let (path, _) = self.open_file(fd)?;
        self.files.entry(path).or_default().resize(size as usize, 0);
        Ok(())
    }

    fn fd_file_stat_set_times(
        &mut self,
        fd: Fd,
        _: Timestamp,
        _: Timestamp,
        _: FstFlags,
    ) -> SyscallResult<()> {
        self.log(Syscall::FdFileStatSetTimes);
        self.open_file(fd).map(drop)
    }

    fn fd_pread(
        &mut self,
        fd: Fd,
        iovs: &mut [IoSliceMut<'_>],
        offset: FileSize,
    ) -> SyscallResult<usize> {
        self.log(Syscall::FdPread);
        let (path, _) = self.open_file(fd)?;
        Ok(self.read_at(&path, offset, iovs))
    }

    fn fd_pre_stat_get(&mut self, fd: Fd) -> SyscallResult<PreStat> {
        self.log(Syscall::FdPreStatGet);
        if fd != ROOT_FD {
            return Err(Errno::BADF.into());
        }
        Ok(PreStat { dir_name_len: 1 })
    }

    fn fd_pre_stat_dir_name(&mut self, fd: Fd) -> SyscallResult<String> {
        self.log(Syscall::FdPreStatDirName);
        if fd != ROOT_FD {
            return Err(Errno::BADF.into());
        }
        Ok("/".to_owned())
    }

    fn fd_pwrite(
        &mut self,
        fd: Fd,
        iovs: &[IoSlice<'_>],
        offset: FileSize,
    ) -> SyscallResult<usize> {
        self.log(Syscall::FdPwrite);
        let (path, _) = self.open_file(fd)?;
        Ok(self.write_at(&path, offset, iovs))
    }

    fn fd_read(&mut self, fd: Fd, iovs: &mut [IoSliceMut<'_>]) -> SyscallResult<usize> {
        self.log(Syscall::FdRead);
        if fd == Fd::STDIN {
            let n = scatter(&self.stdin[self.stdin_pos..], iovs);
            self.stdin_pos += n;
            return Ok(n);
        }
        let (path, pos) = self.open_file(fd)?;
        let n = self.read_at(&path, pos, iovs);
        self.set_pos(fd, pos + n as u64);
        Ok(n)
    }

    fn fd_read_dir(&mut self, fd: Fd, buf: &mut [u8], cookie: DirCookie) -> SyscallResult<usize> {
        self.log(Syscall::FdReadDir);
        self.dir(fd)?;
        let listing: Vec<u8> = self
            .files
            .keys()
            .flat_map(|name| name.bytes().chain([b'\n']))
            .collect();
        let start = (cookie as usize).min(listing.len());
        let n = (listing.len() - start).min(buf.len());
        buf[..n].copy_from_slice(&listing[start..start + n]);
        Ok(n)
    }

    fn fd_renumber(&mut self, from: Fd, to: Fd) -> SyscallResult<()> {
        self.log(Syscall::FdRenumber);
        let entry = self.entries.remove(&from.0).ok_or(Errno::BADF)?;
        self.entries.insert(to.0, entry);
        Ok(())
    }

    fn fd_seek(&mut self, fd: Fd, offset: FileDelta, whence: Whence) -> SyscallResult<FileSize> {
        self.log(Syscall::FdSeek);
        let (path, pos) = self.open_file(fd)?;
        let base = match whence {
            0 => 0,
            1 => pos as i64,
            2 => self.files.get(&path).map_or(0, Vec::len) as i64,
            _ => return Err(Errno::INVAL.into()),
        };
        let new = u64::try_from(base + offset).map_err(|_| Errno::INVAL)?;
        self.set_pos(fd, new);
        Ok(new)
    }

    fn fd_sync(&mut self, fd: Fd) -> SyscallResult<()> {
        self.log(Syscall::FdSync);
        self.entry(fd).map(drop)
    }

    fn fd_tell(&mut self, fd: Fd) -> SyscallResult<FileSize> {
        self.log(Syscall::FdTell);
        self.open_file(fd).map(|(_, pos)| pos)
    }

    fn fd_write(&mut self, fd: Fd, iovs: &[IoSlice<'_>]) -> SyscallResult<usize> {
        self.log(Syscall::FdWrite);
        let out = match fd {
            Fd::STDOUT => &mut self.stdout,
            Fd::STDERR => &mut self.stderr,
            _ => {
                let (path, pos) = self.open_file(fd)?;
                let n = self.write_at(&path, pos, iovs);
                self.set_pos(fd, pos + n as u64);
                return Ok(n);
            }
        };
        for iov in iovs {
            out.extend_from_slice(iov);
        }
        Ok(gathered(iovs))
    }

    fn path_create_directory(&mut self, fd: Fd, path: &str) -> SyscallResult<()> {
        self.log(Syscall::PathCreateDirectory);
        self.dir(fd)?;
        if self.files.contains_key(path) || !self.dirs.insert(path.to_owned()) {
            return Err(Errno::EXIST.into());
        }
        Ok(())
    }

    fn path_file_stat_get(
        &mut self,
        fd: Fd,
        _flags: LookupFlags,
        path: &str,
    ) -> SyscallResult<FileStat> {
        self.log(Syscall::PathFileStatGet);
        self.dir(fd)?;
        self.file_stat(path)
    }

    fn path_file_stat_set_times(
        &mut self,
        fd: Fd,
        _flags: LookupFlags,
        path: &str,
        _: Timestamp,
        _: Timestamp,
        _: FstFlags,
    ) -> SyscallResult<()> {
        self.log(Syscall::PathFileStatSetTimes);
        self.dir(fd)?;
        self.file_stat(path).map(drop)
    }

    fn path_link(
        &mut self,
        old_fd: Fd,
        _old_flags: LookupFlags,
        old_path: &str,
        new_fd: Fd,
        new_path: &str,
    ) -> SyscallResult<()> {
        self.log(Syscall::PathLink);
        self.dir(old_fd)?;
        self.dir(new_fd)?;
        if self.files.contains_key(new_path) {
            return Err(Errno::EXIST.into());
        }
        let data = self.files.get(old_path).cloned().ok_or(Errno::NOENT)?;
        self.files.insert(new_path.to_owned(), data);
        Ok(())
    }

    fn path_open(
        &mut self,
        fd: Fd,
        _dir_flags: LookupFlags,
        path: &str,
        open_flags: OpenFlags,
        _rights_base: Rights,
        _rights_inheriting: Rights,
        _fd_flags: FdFlags,
    ) -> SyscallResult<Fd> {
        self.log(Syscall::PathOpen);
        self.dir(fd)?;
        if open_flags & OFLAGS_DIRECTORY != 0 {
            if !self.dirs.contains(path) {
                return Err(Errno::NOENT.into());
            }
            return Ok(self.allocate(Entry::Dir));
        }
        let exists = self.files.contains_key(path);
        if exists && open_flags & OFLAGS_CREAT != 0 && open_flags & OFLAGS_EXCL != 0 {
            return Err(Errno::EXIST.into());
        }
        if !exists {
            if open_flags & OFLAGS_CREAT == 0 {
                return Err(Errno::NOENT.into());
            }
            self.files.insert(path.to_owned(), Vec::new());
        }
        if open_flags & OFLAGS_TRUNC != 0 {
            self.files.insert(path.to_owned(), Vec::new());
        }
        Ok(self.allocate(Entry::File {
            path: path.to_owned(),
            pos: 0,
        }))
    }

    fn path_read_link(&mut self, fd: Fd, path: &str) -> SyscallResult<String> {
        self.log(Syscall::PathReadLink);
        self.dir(fd)?;
        self.links.get(path).cloned().ok_or(Errno::INVAL.into())
    }

    fn path_remove_directory(&mut self, fd: Fd, path: &str) -> SyscallResult<()> {
        self.log(Syscall::PathRemoveDirectory);
        self.dir(fd)?;
        if !self.dirs.remove(path) {
            return Err(Errno::NOENT.into());
        }
        Ok(())
    }

    fn path_rename(
        &mut self,
        fd: Fd,
        old_path: &str,
        new_fd: Fd,
        new_path: &str,
    ) -> SyscallResult<()> {
        self.log(Syscall::PathRename);
        self.dir(fd)?;
        self.dir(new_fd)?;
        let data = self.files.remove(old_path).ok_or(Errno::NOENT)?;
        self.files.insert(new_path.to_owned(), data);
        Ok(())
    }

    fn path_symlink(&mut self, old_path: &str, fd: Fd, new_path: &str) -> SyscallResult<()> {
        self.log(Syscall::PathSymlink);
        self.dir(fd)?;
        if self.links.contains_key(new_path) || self.files.contains_key(new_path) {
            return Err(Errno::EXIST.into());
        }
        self.links.insert(new_path.to_owned(), old_path.to_owned());
        Ok(())
    }

    fn path_unlink_file(&mut self, fd: Fd, path: &str) -> SyscallResult<()> {
        self.log(Syscall::PathUnlinkFile);
        self.dir(fd)?;
        if self.links.remove(path).is_some() || self.files.remove(path).is_some() {
            return Ok(());
        }
        Err(Errno::NOENT.into())
    }

    fn poll_oneoff(&mut self, subscriptions: &[Subscription]) -> SyscallResult<Vec<Event>> {
        self.log(Syscall::PollOneOff);
        if subscriptions.is_empty() {
            return Err(Errno::INVAL.into());
        }
        let events = subscriptions
            .iter()
            .map(|sub| {
                let (errno, nbytes) = match sub.kind {
                    SubscriptionKind::Clock { timeout, .. } => {
                        self.clock = self.clock.max(timeout);
                        (Errno::SUCCESS, 0)
                    }
                    SubscriptionKind::FdRead(fd) if fd == Fd::STDIN => {
                        (Errno::SUCCESS, (self.stdin.len() - self.stdin_pos) as u64)
                    }
                    SubscriptionKind::FdRead(fd) | SubscriptionKind::FdWrite(fd) => {
                        if self.entries.contains_key(&fd.0) {
                            (Errno::SUCCESS, 0)
                        } else {
                            (Errno::BADF, 0)
                        }
                    }
                };
                Event {
                    user_data: sub.user_data,
                    errno,
                    event_type: sub.kind.event_type(),
                    nbytes,
                    flags: 0,
                }
            })
            .collect();
        Ok(events)
    }

    fn proc_exit(&mut self, code: ExitCode) -> SyscallResult<()> {
        self.log(Syscall::ProcExit);
        self.exit_code = Some(code);
        Ok(())
    }

    fn proc_raise(&mut self, _signal: Signal) -> SyscallResult<()> {
        self.log(Syscall::ProcRaise);
        Err(Errno::NOSYS.into())
    }

    fn sched_yield(&mut self) -> SyscallResult<()> {
        self.log(Syscall::SchedYield);
        Ok(())
    }

    fn random_get(&mut self, buf: &mut [u8]) -> SyscallResult<()> {
        self.log(Syscall::RandomGet);
        self.rng.fill_bytes(buf);
        Ok(())
    }

    fn sock_accept(&mut self, fd: Fd, _flags: FdFlags) -> SyscallResult<Fd> {
        self.log(Syscall::SockAccept);
        let local = self.socket(fd)?.local.clone();
        let peer = self.next_address();
        let inbox = std::mem::take(&mut self.network);
        Ok(self.allocate(Entry::Socket(Socket {
            local,
            peer,
            inbox,
            ..Socket::default()
        })))
    }

    fn sock_recv(
        &mut self,
        fd: Fd,
        iovs: &mut [IoSliceMut<'_>],
        _flags: RiFlags,
    ) -> SyscallResult<(usize, RoFlags)> {
        self.log(Syscall::SockRecv);
        let socket = self.socket(fd)?;
        let n = scatter(&socket.inbox, iovs);
        socket.inbox.drain(..n);
        Ok((n, 0))
    }

    fn sock_send(&mut self, fd: Fd, iovs: &[IoSlice<'_>], _flags: SiFlags) -> SyscallResult<usize> {
        self.log(Syscall::SockSend);
        let socket = self.socket(fd)?;
        if socket.peer == SocketAddress::default() {
            return Err(Errno::NOTCONN.into());
        }
        for iov in iovs {
            socket.outbox.extend_from_slice(iov);
        }
        Ok(gathered(iovs))
    }

    fn sock_shutdown(&mut self, fd: Fd, _flags: SdFlags) -> SyscallResult<()> {
        self.log(Syscall::SockShutdown);
        self.socket(fd).map(drop)
    }

    fn sock_open(
        &mut self,
        _family: ProtocolFamily,
        _socket_type: SocketType,
        _protocol: Protocol,
        _rights_base: Rights,
        _rights_inheriting: Rights,
    ) -> SyscallResult<Fd> {
        self.log(Syscall::SockOpen);
        Ok(self.allocate(Entry::Socket(Socket::default())))
    }

    fn sock_bind(&mut self, fd: Fd, addr: &SocketAddress) -> SyscallResult<SocketAddress> {
        self.log(Syscall::SockBind);
        self.socket(fd)?;
        let bound = match addr {
            SocketAddress::Inet { addr, port: 0 } => {
                let port = self.next_port;
                self.next_port = self.next_port.wrapping_add(1);
                SocketAddress::Inet { addr: *addr, port }
            }
            other => other.clone(),
        };
        self.socket(fd)?.local = bound.clone();
        Ok(bound)
    }

    fn sock_connect(&mut self, fd: Fd, addr: &SocketAddress) -> SyscallResult<SocketAddress> {
        self.log(Syscall::SockConnect);
        self.socket(fd)?;
        let local = self.next_address();
        let inbox = std::mem::take(&mut self.network);
        let socket = self.socket(fd)?;
        socket.local = local.clone();
        socket.peer = addr.clone();
        socket.inbox = inbox;
        Ok(local)
    }

    fn sock_listen(&mut self, fd: Fd, _backlog: u32) -> SyscallResult<()> {
        self.log(Syscall::SockListen);
        self.socket(fd).map(drop)
    }

    fn sock_send_to(
        &mut self,
        fd: Fd,
        iovs: &[IoSlice<'_>],
        _flags: SiFlags,
        addr: &SocketAddress,
    ) -> SyscallResult<usize> {
        self.log(Syscall::SockSendTo);
        let socket = self.socket(fd)?;
        socket.peer = addr.clone();
        for iov in iovs {
            socket.outbox.extend_from_slice(iov);
        }
        Ok(gathered(iovs))
    }

    fn sock_recv_from(
        &mut self,
        fd: Fd,
        iovs: &mut [IoSliceMut<'_>],
        _flags: RiFlags,
    ) -> SyscallResult<(usize, RoFlags, SocketAddress)> {
        self.log(Syscall::SockRecvFrom);
        let socket = self.socket(fd)?;
        let n = scatter(&socket.inbox, iovs);
        socket.inbox.drain(..n);
        Ok((n, 0, socket.peer.clone()))
    }

    fn sock_get_opt_int(
        &mut self,
        fd: Fd,
        level: u32,
        option: SocketOption,
    ) -> SyscallResult<i32> {
        self.log(Syscall::SockGetOptInt);
        let socket = self.socket(fd)?;
        Ok(socket.options.get(&(level, option)).copied().unwrap_or(0))
    }

    fn sock_set_opt_int(
        &mut self,
        fd: Fd,
        level: u32,
        option: SocketOption,
        value: i32,
    ) -> SyscallResult<()> {
        self.log(Syscall::SockSetOptInt);
        self.socket(fd)?.options.insert((level, option), value);
        Ok(())
    }

    fn sock_local_address(&mut self, fd: Fd) -> SyscallResult<SocketAddress> {
        self.log(Syscall::SockLocalAddress);
        Ok(self.socket(fd)?.local.clone())
    }

    fn sock_peer_address(&mut self, fd: Fd) -> SyscallResult<SocketAddress> {
        self.log(Syscall::SockPeerAddress);
        let socket = self.socket(fd)?;
        if socket.peer == SocketAddress::default() {
            return Err(Errno::NOTCONN.into());
        }
        Ok(socket.peer.clone())
    }

    fn close(&mut self) -> SyscallResult<()> {
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_results() {
        let mut a = MockSystem::new(7);
        let mut b = MockSystem::new(7);
        let (mut x, mut y) = ([0u8; 16], [0u8; 16]);
        a.random_get(&mut x).unwrap();
        b.random_get(&mut y).unwrap();
        assert_eq!(x, y);
        assert_eq!(a.clock_time_get(0, 0).unwrap(), b.clock_time_get(0, 0).unwrap());
    }

    #[test]
    fn files_roundtrip_through_descriptors() {
        let mut sys = MockSystem::new(0).with_file("data.txt", b"hello".to_vec());
        let fd = sys
            .path_open(ROOT_FD, 0, "data.txt", 0, u64::MAX, u64::MAX, 0)
            .unwrap();
        let mut buf = [0u8; 3];
        assert_eq!(sys.fd_read(fd, &mut [IoSliceMut::new(&mut buf)]).unwrap(), 3);
        assert_eq!(&buf, b"hel");
        assert_eq!(sys.fd_tell(fd).unwrap(), 3);
        assert_eq!(sys.fd_write(fd, &[IoSlice::new(b"P!")]).unwrap(), 2);
        assert_eq!(sys.file("data.txt"), Some(b"helP!".as_slice()));
        sys.fd_close(fd).unwrap();
        assert_eq!(sys.fd_close(fd).unwrap_err().errno(), Some(Errno::BADF));
    }

    #[test]
    fn missing_file_is_noent() {
        let mut sys = MockSystem::new(0);
        let err = sys.path_open(ROOT_FD, 0, "nope", 0, 0, 0, 0).unwrap_err();
        assert_eq!(err.errno(), Some(Errno::NOENT));
        assert_eq!(sys.calls(), [Syscall::PathOpen]);
    }

    #[test]
    fn stdout_is_captured() {
        let mut sys = MockSystem::new(0);
        sys.fd_write(Fd::STDOUT, &[IoSlice::new(b"a"), IoSlice::new(b"b")])
            .unwrap();
        assert_eq!(sys.stdout(), b"ab");
    }

    #[test]
    fn connected_socket_receives_network_input() {
        let mut sys = MockSystem::new(0).with_network_input(b"pong".to_vec());
        let fd = sys.sock_open(1, 6, 0, 0, 0).unwrap();
        let peer = SocketAddress::Inet {
            addr: [10, 0, 0, 1],
            port: 80,
        };
        sys.sock_connect(fd, &peer).unwrap();
        assert_eq!(sys.sock_send(fd, &[IoSlice::new(b"ping")], 0).unwrap(), 4);
        let mut buf = [0u8; 8];
        let (n, _) = sys.sock_recv(fd, &mut [IoSliceMut::new(&mut buf)], 0).unwrap();
        assert_eq!(&buf[..n], b"pong");
        assert_eq!(sys.sent(fd), Some(b"ping".as_slice()));
        assert_eq!(sys.sock_peer_address(fd).unwrap(), peer);
    }
}

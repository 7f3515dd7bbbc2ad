//! The call-handling interface a guest invokes for every host operation.

use std::io::{IoSlice, IoSliceMut};

use crate::error::SyscallResult;
use crate::id::Fd;
use crate::wasi::{
    Advice, ClockId, DirCookie, Event, ExitCode, FdFlags, FdStat, FileDelta, FileSize, FileStat,
    FstFlags, LookupFlags, OpenFlags, PreStat, Protocol, ProtocolFamily, RiFlags, Rights, RoFlags,
    SdFlags, SiFlags, Signal, SocketAddress, SocketOption, SocketType, Subscription, Timestamp,
    Whence,
};

/// A host system as seen by a WebAssembly guest.
///
/// There is one method per [`Syscall`](crate::Syscall). Live systems
/// perform the operation; the recording proxy and the replay engine are
/// decorators implementing the same trait, so the host-call dispatcher
/// never knows which one it is talking to.
///
/// Methods take `&mut self`: a system is driven by the single thread
/// running the guest. The trait is object safe so a replay engine can
/// hold a `Box<dyn System>` fallback.
///
/// Output buffers (`fd_read`, `fd_pread`, `sock_recv`, `random_get`, ...)
/// are filled in place and the method returns how many bytes it wrote.
pub trait System {
    /// Command-line arguments of the guest.
    fn args_get(&mut self) -> SyscallResult<Vec<String>>;

    /// Environment variables of the guest, as `KEY=VALUE` strings.
    fn environ_get(&mut self) -> SyscallResult<Vec<String>>;

    /// Resolution of a clock.
    fn clock_res_get(&mut self, id: ClockId) -> SyscallResult<Timestamp>;

    /// Current time of a clock.
    fn clock_time_get(&mut self, id: ClockId, precision: Timestamp) -> SyscallResult<Timestamp>;

    /// Announce an access pattern for file data.
    fn fd_advise(
        &mut self,
        fd: Fd,
        offset: FileSize,
        length: FileSize,
        advice: Advice,
    ) -> SyscallResult<()>;

    /// Force allocation of space in a file.
    fn fd_allocate(&mut self, fd: Fd, offset: FileSize, length: FileSize) -> SyscallResult<()>;

    /// Close a descriptor.
    fn fd_close(&mut self, fd: Fd) -> SyscallResult<()>;

    /// Synchronize file data to storage.
    fn fd_data_sync(&mut self, fd: Fd) -> SyscallResult<()>;

    /// Descriptor attributes.
    fn fd_stat_get(&mut self, fd: Fd) -> SyscallResult<FdStat>;

    /// Adjust descriptor flags.
    fn fd_stat_set_flags(&mut self, fd: Fd, flags: FdFlags) -> SyscallResult<()>;

    /// Drop descriptor rights.
    fn fd_stat_set_rights(
        &mut self,
        fd: Fd,
        rights_base: Rights,
        rights_inheriting: Rights,
    ) -> SyscallResult<()>;

    /// Attributes of an open file.
    fn fd_file_stat_get(&mut self, fd: Fd) -> SyscallResult<FileStat>;

    /// Truncate or extend an open file.
    fn fd_file_stat_set_size(&mut self, fd: Fd, size: FileSize) -> SyscallResult<()>;

    /// Adjust timestamps of an open file.
    fn fd_file_stat_set_times(
        &mut self,
        fd: Fd,
        access_time: Timestamp,
        modify_time: Timestamp,
        flags: FstFlags,
    ) -> SyscallResult<()>;

    /// Read at an offset without moving the file cursor.
    fn fd_pread(
        &mut self,
        fd: Fd,
        iovs: &mut [IoSliceMut<'_>],
        offset: FileSize,
    ) -> SyscallResult<usize>;

    /// Description of a preopened directory.
    fn fd_pre_stat_get(&mut self, fd: Fd) -> SyscallResult<PreStat>;

    /// Name of a preopened directory.
    fn fd_pre_stat_dir_name(&mut self, fd: Fd) -> SyscallResult<String>;

    /// Write at an offset without moving the file cursor.
    fn fd_pwrite(&mut self, fd: Fd, iovs: &[IoSlice<'_>], offset: FileSize)
        -> SyscallResult<usize>;

    /// Read from a descriptor.
    fn fd_read(&mut self, fd: Fd, iovs: &mut [IoSliceMut<'_>]) -> SyscallResult<usize>;

    /// Read directory entries into `buf`, starting at `cookie`.
    fn fd_read_dir(&mut self, fd: Fd, buf: &mut [u8], cookie: DirCookie) -> SyscallResult<usize>;

    /// Atomically replace descriptor `to` with `from`.
    fn fd_renumber(&mut self, from: Fd, to: Fd) -> SyscallResult<()>;

    /// Move the file cursor.
    fn fd_seek(&mut self, fd: Fd, offset: FileDelta, whence: Whence) -> SyscallResult<FileSize>;

    /// Synchronize file data and metadata to storage.
    fn fd_sync(&mut self, fd: Fd) -> SyscallResult<()>;

    /// Current file cursor.
    fn fd_tell(&mut self, fd: Fd) -> SyscallResult<FileSize>;

    /// Write to a descriptor.
    fn fd_write(&mut self, fd: Fd, iovs: &[IoSlice<'_>]) -> SyscallResult<usize>;

    /// Create a directory.
    fn path_create_directory(&mut self, fd: Fd, path: &str) -> SyscallResult<()>;

    /// Attributes of a file by path.
    fn path_file_stat_get(
        &mut self,
        fd: Fd,
        flags: LookupFlags,
        path: &str,
    ) -> SyscallResult<FileStat>;

    /// Adjust timestamps of a file by path.
    fn path_file_stat_set_times(
        &mut self,
        fd: Fd,
        flags: LookupFlags,
        path: &str,
        access_time: Timestamp,
        modify_time: Timestamp,
        fst_flags: FstFlags,
    ) -> SyscallResult<()>;

    /// Create a hard link.
    fn path_link(
        &mut self,
        old_fd: Fd,
        old_flags: LookupFlags,
        old_path: &str,
        new_fd: Fd,
        new_path: &str,
    ) -> SyscallResult<()>;

    /// Open a file or directory.
    #[allow(clippy::too_many_arguments)]
    fn path_open(
        &mut self,
        fd: Fd,
        dir_flags: LookupFlags,
        path: &str,
        open_flags: OpenFlags,
        rights_base: Rights,
        rights_inheriting: Rights,
        fd_flags: FdFlags,
    ) -> SyscallResult<Fd>;

    /// Contents of a symbolic link.
    fn path_read_link(&mut self, fd: Fd, path: &str) -> SyscallResult<String>;

    /// Remove an empty directory.
    fn path_remove_directory(&mut self, fd: Fd, path: &str) -> SyscallResult<()>;

    /// Rename a file or directory.
    fn path_rename(
        &mut self,
        fd: Fd,
        old_path: &str,
        new_fd: Fd,
        new_path: &str,
    ) -> SyscallResult<()>;

    /// Create a symbolic link.
    fn path_symlink(&mut self, old_path: &str, fd: Fd, new_path: &str) -> SyscallResult<()>;

    /// Unlink a file.
    fn path_unlink_file(&mut self, fd: Fd, path: &str) -> SyscallResult<()>;

    /// Wait for any of the subscriptions to trigger.
    fn poll_oneoff(&mut self, subscriptions: &[Subscription]) -> SyscallResult<Vec<Event>>;

    /// Terminate the process. Implementations may not return.
    fn proc_exit(&mut self, code: ExitCode) -> SyscallResult<()>;

    /// Send a signal to the process.
    fn proc_raise(&mut self, signal: Signal) -> SyscallResult<()>;

    /// Yield the CPU.
    fn sched_yield(&mut self) -> SyscallResult<()>;

    /// Fill `buf` with random bytes.
    fn random_get(&mut self, buf: &mut [u8]) -> SyscallResult<()>;

    /// Accept a connection on a listening socket.
    fn sock_accept(&mut self, fd: Fd, flags: FdFlags) -> SyscallResult<Fd>;

    /// Receive from a connected socket.
    fn sock_recv(
        &mut self,
        fd: Fd,
        iovs: &mut [IoSliceMut<'_>],
        flags: RiFlags,
    ) -> SyscallResult<(usize, RoFlags)>;

    /// Send on a connected socket.
    fn sock_send(&mut self, fd: Fd, iovs: &[IoSlice<'_>], flags: SiFlags) -> SyscallResult<usize>;

    /// Shut down one or both directions of a socket.
    fn sock_shutdown(&mut self, fd: Fd, flags: SdFlags) -> SyscallResult<()>;

    /// Create a socket.
    fn sock_open(
        &mut self,
        family: ProtocolFamily,
        socket_type: SocketType,
        protocol: Protocol,
        rights_base: Rights,
        rights_inheriting: Rights,
    ) -> SyscallResult<Fd>;

    /// Bind a socket, returning the bound address.
    fn sock_bind(&mut self, fd: Fd, addr: &SocketAddress) -> SyscallResult<SocketAddress>;

    /// Connect a socket, returning the local address.
    fn sock_connect(&mut self, fd: Fd, addr: &SocketAddress) -> SyscallResult<SocketAddress>;

    /// Listen for connections.
    fn sock_listen(&mut self, fd: Fd, backlog: u32) -> SyscallResult<()>;

    /// Send a datagram.
    fn sock_send_to(
        &mut self,
        fd: Fd,
        iovs: &[IoSlice<'_>],
        flags: SiFlags,
        addr: &SocketAddress,
    ) -> SyscallResult<usize>;

    /// Receive a datagram along with its source address.
    fn sock_recv_from(
        &mut self,
        fd: Fd,
        iovs: &mut [IoSliceMut<'_>],
        flags: RiFlags,
    ) -> SyscallResult<(usize, RoFlags, SocketAddress)>;

    /// Read an integer socket option.
    fn sock_get_opt_int(&mut self, fd: Fd, level: u32, option: SocketOption)
        -> SyscallResult<i32>;

    /// Write an integer socket option.
    fn sock_set_opt_int(
        &mut self,
        fd: Fd,
        level: u32,
        option: SocketOption,
        value: i32,
    ) -> SyscallResult<()>;

    /// Local address of a socket.
    fn sock_local_address(&mut self, fd: Fd) -> SyscallResult<SocketAddress>;

    /// Remote address of a connected socket.
    fn sock_peer_address(&mut self, fd: Fd) -> SyscallResult<SocketAddress>;

    /// Release the system. Decorators flush their state, then close the
    /// system they wrap.
    fn close(&mut self) -> SyscallResult<()> {
        Ok(())
    }
}

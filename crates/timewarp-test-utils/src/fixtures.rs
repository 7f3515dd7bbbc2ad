//! Reusable record fixtures and failing sinks.
//!
//! - [`records`] builds an ordered run of records with opaque payloads.
//! - [`segment`] names a fresh segment.
//! - [`FailingWriter`] accepts a fixed number of bytes, then fails.

use std::io::{self, Write};

use timewarp_core::{ProcessId, SegmentId, Syscall};
use timewarp_log::Record;

/// A fresh segment 0 of a random process.
pub fn segment() -> SegmentId {
    SegmentId::new(ProcessId::new_v4(), 0)
}

/// `n` records one microsecond apart, cycling through a few common calls.
///
/// Payloads are opaque bytes of varying length, which is all the log
/// layer looks at.
pub fn records(n: usize) -> Vec<Record> {
    const CALLS: [Syscall; 4] = [
        Syscall::ClockTimeGet,
        Syscall::FdWrite,
        Syscall::FdRead,
        Syscall::PollOneOff,
    ];
    (0..n)
        .map(|i| {
            let syscall = CALLS[i % CALLS.len()];
            let payload: Vec<u8> = (0..(i % 64) as u8).collect();
            Record::new(i as i64 * 1_000, syscall.id(), payload)
        })
        .collect()
}

/// A sink that accepts `limit` bytes and then fails every write.
pub struct FailingWriter {
    pub written: Vec<u8>,
    limit: usize,
}

impl FailingWriter {
    pub fn new(limit: usize) -> Self {
        Self {
            written: Vec::new(),
            limit,
        }
    }
}

impl Write for FailingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let room = self.limit - self.written.len();
        if room == 0 {
            return Err(io::Error::new(io::ErrorKind::StorageFull, "sink full"));
        }
        let n = room.min(buf.len());
        self.written.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

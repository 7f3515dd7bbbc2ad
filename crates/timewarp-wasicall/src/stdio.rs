//! Guest output extraction from a recording.
//!
//! [`StdioReader`] turns the successful `FDWrite` calls of a recording
//! back into the byte stream the guest wrote, which is what a `logs`
//! command prints.

use std::io::{self, Read};

use timewarp_core::{Fd, Syscall};
use timewarp_log::{Record, RecordSource};

use crate::call::{decode_outcome, decode_params, split_call};

/// Reads what the guest wrote to its output descriptors.
///
/// Records before the start offset, failed writes, and writes to other
/// descriptors are skipped. Only the bytes the write reported as written
/// are yielded.
///
/// # Examples
///
/// ```
/// use std::io::Read;
///
/// use timewarp_core::{Fd, Syscall};
/// use timewarp_log::Record;
/// use timewarp_wasicall::call::encode_call;
/// use timewarp_wasicall::StdioReader;
///
/// let mut payload = Vec::new();
/// encode_call(&mut payload, &(Fd(1), b"hello\n".as_slice()), Ok(&6usize));
/// let records = vec![Record::new(0, Syscall::FdWrite.id(), payload)];
///
/// let mut out = String::new();
/// StdioReader::new(records.into_iter()).read_to_string(&mut out).unwrap();
/// assert_eq!(out, "hello\n");
/// ```
pub struct StdioReader<R> {
    records: R,
    fds: Vec<Fd>,
    start: i64,
    line_limit: Option<usize>,
    lines: usize,
    chunk: Vec<u8>,
    cursor: usize,
    done: bool,
}

impl<R: RecordSource> StdioReader<R> {
    /// Read standard output and standard error from `records`.
    pub fn new(records: R) -> Self {
        Self {
            records,
            fds: vec![Fd::STDOUT, Fd::STDERR],
            start: 0,
            line_limit: None,
            lines: 0,
            chunk: Vec::new(),
            cursor: 0,
            done: false,
        }
    }

    /// Replace the descriptors whose writes are extracted.
    pub fn with_fds(mut self, fds: impl IntoIterator<Item = Fd>) -> Self {
        self.fds = fds.into_iter().collect();
        self
    }

    /// Skip records with a timestamp before `start` nanoseconds.
    pub fn with_start(mut self, start: i64) -> Self {
        self.start = start;
        self
    }

    /// Stop after `lines` newline characters.
    pub fn with_line_limit(mut self, lines: usize) -> Self {
        self.line_limit = Some(lines);
        self
    }

    /// Bytes of the next matching write, or `None` at the end.
    fn output(&self, record: &Record) -> io::Result<Option<Vec<u8>>> {
        if record.timestamp < self.start || record.syscall() != Some(Syscall::FdWrite) {
            return Ok(None);
        }
        let (fd, mut data): (Fd, Vec<u8>) =
            decode_params(&record.function_call).map_err(invalid_data)?;
        if !self.fds.contains(&fd) {
            return Ok(None);
        }
        let (_, outcome) = split_call(&record.function_call).map_err(invalid_data)?;
        match decode_outcome::<usize>(outcome).map_err(invalid_data)? {
            Ok(written) => {
                data.truncate(written);
                Ok(Some(data))
            }
            Err(_) => Ok(None),
        }
    }

    fn fill(&mut self) -> io::Result<()> {
        while self.cursor == self.chunk.len() && !self.done {
            let Some(record) = self.records.next_record().map_err(io::Error::other)? else {
                self.done = true;
                break;
            };
            if let Some(data) = self.output(&record)? {
                self.chunk = data;
                self.cursor = 0;
            }
        }
        Ok(())
    }
}

fn invalid_data(err: crate::call::DecodeError) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}

impl<R: RecordSource> Read for StdioReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if let Some(limit) = self.line_limit {
            if self.lines >= limit {
                return Ok(0);
            }
        }
        self.fill()?;
        let available = &self.chunk[self.cursor..];
        let mut n = available.len().min(buf.len());
        if let Some(limit) = self.line_limit {
            for (i, &b) in available[..n].iter().enumerate() {
                if b == b'\n' {
                    self.lines += 1;
                    if self.lines == limit {
                        n = i + 1;
                        break;
                    }
                }
            }
        }
        buf[..n].copy_from_slice(&available[..n]);
        self.cursor += n;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::encode_call;
    use timewarp_core::Errno;

    fn write(timestamp: i64, fd: u32, data: &[u8], outcome: Result<usize, Errno>) -> Record {
        let mut call = Vec::new();
        encode_call(&mut call, &(Fd(fd), data), outcome.as_ref().map_err(|e| *e));
        Record::new(timestamp, Syscall::FdWrite.id(), call)
    }

    fn read_all(reader: StdioReader<std::vec::IntoIter<Record>>) -> String {
        let mut out = String::new();
        let mut reader = reader;
        reader.read_to_string(&mut out).unwrap();
        out
    }

    #[test]
    fn interleaves_stdout_and_stderr_in_order() {
        let records = vec![
            write(0, 1, b"out ", Ok(4)),
            write(1, 2, b"err ", Ok(4)),
            write(2, 3, b"file ", Ok(5)),
            write(3, 1, b"done", Ok(4)),
        ];
        assert_eq!(read_all(StdioReader::new(records.into_iter())), "out err done");
    }

    #[test]
    fn partial_and_failed_writes() {
        let records = vec![
            write(0, 1, b"abcdef", Ok(3)),
            write(1, 1, b"lost", Err(Errno::PIPE)),
        ];
        assert_eq!(read_all(StdioReader::new(records.into_iter())), "abc");
    }

    #[test]
    fn skips_other_calls_and_early_records() {
        let mut call = Vec::new();
        encode_call(&mut call, &Fd(1), Ok(&()));
        let records = vec![
            write(0, 1, b"early ", Ok(6)),
            Record::new(5, Syscall::FdClose.id(), call),
            write(10, 1, b"late", Ok(4)),
        ];
        let reader = StdioReader::new(records.into_iter()).with_start(10);
        assert_eq!(read_all(reader), "late");
    }

    #[test]
    fn selected_descriptors_only() {
        let records = vec![write(0, 1, b"out", Ok(3)), write(1, 2, b"err", Ok(3))];
        let reader = StdioReader::new(records.into_iter()).with_fds([Fd::STDERR]);
        assert_eq!(read_all(reader), "err");
    }

    #[test]
    fn line_limit_stops_after_newline() {
        let records = vec![
            write(0, 1, b"one\ntwo\nthr", Ok(11)),
            write(1, 1, b"ee\nfour\n", Ok(8)),
        ];
        let reader = StdioReader::new(records.clone().into_iter()).with_line_limit(2);
        assert_eq!(read_all(reader), "one\ntwo\n");

        let reader = StdioReader::new(records.into_iter()).with_line_limit(3);
        assert_eq!(read_all(reader), "one\ntwo\nthree\n");
    }

    #[test]
    fn small_reads_see_every_byte() {
        let records = vec![write(0, 1, b"hello", Ok(5)), write(1, 2, b"!", Ok(1))];
        let mut reader = StdioReader::new(records.into_iter());
        let mut out = Vec::new();
        let mut buf = [0u8; 2];
        loop {
            let n = reader.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        assert_eq!(out, b"hello!");
    }

    #[test]
    fn malformed_payload_is_invalid_data() {
        let records = vec![Record::new(0, Syscall::FdWrite.id(), vec![1, 2])];
        let mut out = Vec::new();
        let err = StdioReader::new(records.into_iter())
            .read_to_end(&mut out)
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}

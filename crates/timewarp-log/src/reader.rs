//! Log segment reader.
//!
//! [`LogReader`] streams batches from any `Read` source, verifying each
//! batch's checksum after decompression, and yields records in their
//! original order across batch boundaries.
//!
//! The first error a reader hits is final: the stream position is no
//! longer trustworthy, so every later read and seek returns the same error.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use tracing::{debug, warn};

use crate::codec::{decode_record_at, read_batch_header};
use crate::error::LogError;
use crate::index::RecordIndex;
use crate::record::Record;

/// A forward-only stream of records.
///
/// Implemented by [`LogReader`] and by in-memory record vectors, so the
/// replay engine can run over either.
pub trait RecordSource {
    /// The next record, or `None` once the stream is exhausted.
    fn next_record(&mut self) -> Result<Option<Record>, LogError>;
}

impl RecordSource for std::vec::IntoIter<Record> {
    fn next_record(&mut self) -> Result<Option<Record>, LogError> {
        Ok(self.next())
    }
}

impl<S: RecordSource + ?Sized> RecordSource for &mut S {
    fn next_record(&mut self) -> Result<Option<Record>, LogError> {
        (**self).next_record()
    }
}

impl<S: RecordSource + ?Sized> RecordSource for Box<S> {
    fn next_record(&mut self) -> Result<Option<Record>, LogError> {
        (**self).next_record()
    }
}

/// Reads records from a log segment.
///
/// Generic over `R: Read` so tests can use `&[u8]` and production code
/// can use `BufReader<File>`. Seeking additionally needs `R: Seek`.
pub struct LogReader<R: Read> {
    input: R,
    index: Option<RecordIndex>,
    payload: Vec<u8>,
    cursor: usize,
    remaining: u32,
    batch_offset: u64,
    position: u64,
    skip_before: Option<i64>,
    batches_read: u64,
    records_read: u64,
    done: bool,
    failed: Option<LogError>,
}

impl<R: Read> LogReader<R> {
    /// Read a segment from the start.
    pub fn new(input: R) -> Self {
        Self {
            input,
            index: None,
            payload: Vec::new(),
            cursor: 0,
            remaining: 0,
            batch_offset: 0,
            position: 0,
            skip_before: None,
            batches_read: 0,
            records_read: 0,
            done: false,
            failed: None,
        }
    }

    /// Read a segment from the start, using `index` for seeks.
    pub fn with_index(input: R, index: RecordIndex) -> Self {
        let mut reader = Self::new(input);
        reader.index = Some(index);
        reader
    }

    /// The index used for seeks, if any.
    pub fn index(&self) -> Option<&RecordIndex> {
        self.index.as_ref()
    }

    /// Read the next record, or `None` at the end of the segment.
    ///
    /// After an error, every call returns that error again.
    pub fn next_record(&mut self) -> Result<Option<Record>, LogError> {
        self.check()?;
        let result = self.read_next();
        if let Err(err) = &result {
            warn!(offset = self.batch_offset, error = %err, "segment read failed");
            self.failed = Some(err.duplicate());
        }
        result
    }

    /// The error that ended this reader, if any.
    pub fn error(&self) -> Option<&LogError> {
        self.failed.as_ref()
    }

    fn check(&self) -> Result<(), LogError> {
        match &self.failed {
            Some(err) => Err(err.duplicate()),
            None => Ok(()),
        }
    }

    fn read_next(&mut self) -> Result<Option<Record>, LogError> {
        loop {
            if self.remaining > 0 {
                let record = decode_record_at(&self.payload, &mut self.cursor)
                    .map_err(|e| e.in_batch(self.batch_offset))?;
                self.remaining -= 1;
                if let Some(time) = self.skip_before {
                    if record.timestamp < time {
                        continue;
                    }
                    self.skip_before = None;
                }
                self.records_read += 1;
                return Ok(Some(record));
            }
            if self.cursor != self.payload.len() {
                return Err(LogError::CorruptSegment {
                    offset: self.batch_offset,
                    detail: format!(
                        "{} payload bytes left after the last record",
                        self.payload.len() - self.cursor
                    ),
                });
            }
            if !self.read_batch()? {
                return Ok(None);
            }
        }
    }

    /// Fill `buf` with up to `buf.len()` records.
    ///
    /// Returns the number of records written; `0` for a non-empty `buf`
    /// means the segment is exhausted.
    pub fn read_records(&mut self, buf: &mut [Record]) -> Result<usize, LogError> {
        let mut n = 0;
        while n < buf.len() {
            match self.next_record()? {
                Some(record) => {
                    buf[n] = record;
                    n += 1;
                }
                None => break,
            }
        }
        Ok(n)
    }

    /// Load the next batch into the payload buffer. Returns `false` at
    /// clean end of segment.
    fn read_batch(&mut self) -> Result<bool, LogError> {
        if self.done {
            return Ok(false);
        }
        let offset = self.position;
        let Some((header, header_len)) =
            read_batch_header(&mut self.input).map_err(|e| e.in_batch(offset))?
        else {
            self.done = true;
            return Ok(false);
        };

        // Sizes come from an unverified header; let the buffer grow with
        // the bytes that actually arrive.
        let mut compressed = Vec::new();
        (&mut self.input)
            .take(u64::from(header.compressed_size))
            .read_to_end(&mut compressed)?;
        if compressed.len() != header.compressed_size as usize {
            return Err(LogError::MalformedRecord {
                offset,
                detail: format!(
                    "truncated batch payload: expected {} bytes, found {}",
                    header.compressed_size,
                    compressed.len()
                ),
            });
        }

        let corrupt = |detail: String| LogError::CorruptSegment { offset, detail };
        let payload = header
            .compression
            .decompress(&compressed, header.uncompressed_size as usize)
            .map_err(|e| corrupt(e.to_string()))?;
        if payload.len() != header.uncompressed_size as usize {
            return Err(corrupt(format!(
                "payload decompressed to {} bytes, header says {}",
                payload.len(),
                header.uncompressed_size
            )));
        }
        let computed = crc32c::crc32c(&payload);
        if computed != header.checksum {
            return Err(corrupt(format!(
                "checksum mismatch: expected {:#010x}, computed {computed:#010x}",
                header.checksum
            )));
        }

        debug!(
            offset,
            records = header.num_records,
            first_timestamp = header.first_timestamp,
            compression = %header.compression,
            "batch decoded"
        );

        self.payload = payload;
        self.cursor = 0;
        self.remaining = header.num_records;
        self.batch_offset = offset;
        self.position = offset + header_len + u64::from(header.compressed_size);
        self.batches_read += 1;
        Ok(true)
    }

    /// Byte offset of the next unread batch.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Batches decoded so far.
    pub fn batches_read(&self) -> u64 {
        self.batches_read
    }

    /// Records returned so far.
    pub fn records_read(&self) -> u64 {
        self.records_read
    }

    /// Convert into a record iterator.
    pub fn records(self) -> Records<R> {
        Records {
            reader: self,
            done: false,
        }
    }
}

impl<R: Read + Seek> LogReader<R> {
    /// Position the reader so that the next record returned is the first
    /// one with `timestamp >= time`.
    ///
    /// With an index, jumps to the last batch starting strictly before
    /// `time` (the earliest that may hold such a record) and scans
    /// forward. Without one, rescans from the start of the segment.
    ///
    /// A reader that has already failed stays failed; seeking returns the
    /// original error.
    pub fn seek(&mut self, time: i64) -> Result<(), LogError> {
        self.check()?;
        let offset = match &self.index {
            Some(index) if time > 0 => index.lookup((time - 1) as u64).unwrap_or(0),
            Some(_) => 0,
            None => {
                warn!(time, "seek without an index scans from the start of the segment");
                0
            }
        };
        if let Err(e) = self.input.seek(SeekFrom::Start(offset)) {
            let err = LogError::Io(e);
            self.failed = Some(err.duplicate());
            return Err(err);
        }
        self.payload.clear();
        self.cursor = 0;
        self.remaining = 0;
        self.batch_offset = offset;
        self.position = offset;
        self.skip_before = Some(time);
        self.done = false;
        debug!(time, offset, "seek");
        Ok(())
    }
}

impl<R: Read> RecordSource for LogReader<R> {
    fn next_record(&mut self) -> Result<Option<Record>, LogError> {
        LogReader::next_record(self)
    }
}

/// Iterator adapter over the records of a segment.
///
/// Yields `Err` at most once, then ends.
pub struct Records<R: Read> {
    reader: LogReader<R>,
    done: bool,
}

impl<R: Read> Records<R> {
    /// The underlying reader.
    pub fn reader(&self) -> &LogReader<R> {
        &self.reader
    }
}

impl<R: Read> Iterator for Records<R> {
    type Item = Result<Record, LogError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.reader.next_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Open a segment file for reading.
pub fn open_reader(
    path: impl AsRef<Path>,
    index: Option<RecordIndex>,
) -> Result<LogReader<BufReader<File>>, LogError> {
    let file = BufReader::new(File::open(path.as_ref())?);
    Ok(match index {
        Some(index) => LogReader::with_index(file, index),
        None => LogReader::new(file),
    })
}

//! Log segment writer.
//!
//! [`LogWriter`] buffers encoded records into an in-memory batch and
//! flushes it as one compressed, checksummed frame once the batch is full.
//! Flushing happens inline on the caller's thread; there is no background
//! flusher, so the segment is strictly ordered.
//!
//! A sink error ends the writer. The sink may hold a torn frame, and
//! anything appended after it would be unreadable, so every later call
//! returns the original error.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use timewarp_core::SegmentId;
use tracing::{debug, error};

use crate::codec::{encode_batch_header_into, encode_record_into, record_size, BatchHeader};
use crate::config::WriterConfig;
use crate::error::LogError;
use crate::index::{RecordIndex, RecordIndexBuilder};
use crate::record::{Record, RecordBuilder};

/// Writes record batches to a byte stream.
///
/// Generic over `W: Write` so tests can use `Vec<u8>` and production
/// code can use `BufWriter<File>`.
///
/// Durability granularity is one batch: records still buffered when the
/// writer is dropped without [`flush`](Self::flush) or
/// [`finish`](Self::finish) are lost.
///
/// # Examples
///
/// ```
/// use timewarp_core::{ProcessId, SegmentId};
/// use timewarp_log::{LogReader, LogWriter, Record, WriterConfig};
///
/// let segment = SegmentId::new(ProcessId::new_v4(), 0);
/// let config = WriterConfig::default().with_batch_size(2);
///
/// let mut writer = LogWriter::new(Vec::new(), segment, config).unwrap();
/// for t in [0, 5, 9] {
///     writer.write_record(&Record::new(t, 24, b"hi".to_vec())).unwrap();
/// }
/// let (buf, index) = writer.finish().unwrap();
/// assert_eq!(index.len(), 2);
///
/// let mut reader = LogReader::new(buf.as_slice());
/// let mut times = Vec::new();
/// while let Some(rec) = reader.next_record().unwrap() {
///     times.push(rec.timestamp);
/// }
/// assert_eq!(times, [0, 5, 9]);
/// ```
pub struct LogWriter<W: Write> {
    output: W,
    config: WriterConfig,
    index: RecordIndexBuilder,
    payload: Vec<u8>,
    frame: Vec<u8>,
    batch_records: u32,
    batch_first_timestamp: i64,
    last_timestamp: i64,
    records_written: u64,
    batches_written: u64,
    bytes_written: u64,
    failed: Option<LogError>,
}

/// Largest batch payload a header can describe.
const MAX_BATCH_PAYLOAD: usize = u32::MAX as usize;

impl<W: Write> LogWriter<W> {
    /// Create a writer appending to `output`, which must be positioned at
    /// the start of an empty segment.
    pub fn new(output: W, segment: SegmentId, config: WriterConfig) -> Result<Self, LogError> {
        config.validate()?;
        Ok(Self {
            output,
            config,
            index: RecordIndexBuilder::new(segment),
            payload: Vec::new(),
            frame: Vec::new(),
            batch_records: 0,
            batch_first_timestamp: 0,
            last_timestamp: 0,
            records_written: 0,
            batches_written: 0,
            bytes_written: 0,
            failed: None,
        })
    }

    /// Append a record to the current batch, flushing if it fills up.
    ///
    /// Timestamps are offsets from the process start and must not
    /// decrease; a negative or decreasing timestamp is rejected with
    /// [`LogError::OutOfOrder`].
    ///
    /// A call payload over [`MAX_CALL_LEN`](crate::codec::MAX_CALL_LEN)
    /// bytes is rejected with [`LogError::TooLarge`].
    pub fn write_record(&mut self, record: &Record) -> Result<(), LogError> {
        let len = 4 + record_size(record.function_call.len())? as usize;
        self.append(record.timestamp, len, |payload| {
            encode_record_into(
                payload,
                record.timestamp,
                record.function_id,
                &record.function_call,
            )
        })
    }

    /// Append the record held by a builder, finalizing it first.
    pub fn write_builder(&mut self, builder: &mut RecordBuilder) -> Result<(), LogError> {
        let timestamp = builder.timestamp();
        let bytes = builder.bytes()?;
        self.append(timestamp, bytes.len(), |payload| {
            payload.extend_from_slice(bytes);
            Ok(())
        })
    }

    /// Append one encoded record of `len` bytes. A batch that cannot take
    /// it without overflowing the header's size field is flushed first.
    fn append(
        &mut self,
        timestamp: i64,
        len: usize,
        encode: impl FnOnce(&mut Vec<u8>) -> Result<(), LogError>,
    ) -> Result<(), LogError> {
        self.check()?;
        if timestamp < self.last_timestamp {
            return Err(LogError::OutOfOrder {
                previous: self.last_timestamp,
                timestamp,
            });
        }
        if !fits_batch(self.payload.len(), len) {
            self.flush()?;
        }
        if self.batch_records == 0 {
            self.batch_first_timestamp = timestamp;
        }
        encode(&mut self.payload)?;
        self.batch_records += 1;
        self.records_written += 1;
        self.last_timestamp = timestamp;

        if self.batch_records as usize >= self.config.batch_size
            || self.payload.len() >= self.config.batch_bytes
        {
            self.flush()?;
        }
        Ok(())
    }

    /// Compress and write the current batch. No-op when it is empty.
    ///
    /// On error the batch stays buffered; nothing is dropped silently.
    /// After a sink error the writer is failed: the sink may hold a torn
    /// frame, which readers report as malformed, and every later call
    /// returns the same error.
    pub fn flush(&mut self) -> Result<(), LogError> {
        self.check()?;
        if self.batch_records == 0 {
            return Ok(());
        }

        let compression = self.config.compression;
        let compressed = compression.compress(&self.payload, self.config.zstd_level)?;
        let header = BatchHeader {
            first_offset: (self.records_written - u64::from(self.batch_records)) as i64,
            first_timestamp: self.batch_first_timestamp,
            last_timestamp: self.last_timestamp,
            compressed_size: size_field(compressed.len(), "compressed batch")?,
            uncompressed_size: size_field(self.payload.len(), "batch payload")?,
            num_records: self.batch_records,
            checksum: crc32c::crc32c(&self.payload),
            compression,
        };

        self.frame.clear();
        encode_batch_header_into(&mut self.frame, &header);
        self.frame.extend_from_slice(&compressed);
        if let Err(e) = self.output.write_all(&self.frame).and_then(|()| self.output.flush()) {
            return Err(self.sink_failed(e));
        }

        let batch_offset = self.bytes_written;
        self.index.push(header.first_timestamp as u64, batch_offset);
        self.bytes_written += self.frame.len() as u64;
        self.batches_written += 1;

        debug!(
            segment = %self.index.segment(),
            offset = batch_offset,
            records = header.num_records,
            uncompressed = header.uncompressed_size,
            compressed = header.compressed_size,
            %compression,
            "batch flushed"
        );

        self.payload.clear();
        self.batch_records = 0;
        Ok(())
    }

    fn check(&self) -> Result<(), LogError> {
        match &self.failed {
            Some(err) => Err(err.duplicate()),
            None => Ok(()),
        }
    }

    fn sink_failed(&mut self, e: io::Error) -> LogError {
        let err = LogError::Io(e);
        error!(
            segment = %self.index.segment(),
            offset = self.bytes_written,
            error = %err,
            "batch write failed; writer is unusable"
        );
        self.failed = Some(err.duplicate());
        err
    }

    /// The sink error that ended this writer, if any.
    pub fn error(&self) -> Option<&LogError> {
        self.failed.as_ref()
    }

    /// Records accepted so far, including those still buffered.
    pub fn records_written(&self) -> u64 {
        self.records_written
    }

    /// Records buffered in the current batch.
    pub fn pending_records(&self) -> u32 {
        self.batch_records
    }

    /// Batches flushed so far.
    pub fn batches_written(&self) -> u64 {
        self.batches_written
    }

    /// Bytes flushed to the sink so far.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Index entries of the batches flushed so far.
    pub fn index(&self) -> &RecordIndexBuilder {
        &self.index
    }

    /// The segment being written.
    pub fn segment(&self) -> SegmentId {
        self.index.segment()
    }

    /// Flush the last batch and return the sink with the built index.
    pub fn finish(mut self) -> Result<(W, RecordIndex), LogError> {
        self.flush()?;
        let index = self.index.build();
        Ok((self.output, index))
    }
}

/// Whether a batch holding `payload` bytes can take a record of `len`
/// bytes. An empty batch takes any record.
fn fits_batch(payload: usize, len: usize) -> bool {
    payload == 0 || payload.saturating_add(len) <= MAX_BATCH_PAYLOAD
}

fn size_field(len: usize, what: &'static str) -> Result<u32, LogError> {
    u32::try_from(len).map_err(|_| LogError::TooLarge { what, size: len })
}

/// Create a new segment file and a writer for it.
///
/// Fails if the file already exists: segments are never appended to by a
/// second writer.
pub fn open_writer(
    path: impl AsRef<Path>,
    segment: SegmentId,
    config: WriterConfig,
) -> Result<LogWriter<BufWriter<File>>, LogError> {
    let file = File::options()
        .write(true)
        .create_new(true)
        .open(path.as_ref())?;
    LogWriter::new(BufWriter::new(file), segment, config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decode_batch_header;
    use crate::compression::Compression;
    use crate::config::ConfigError;
    use std::io;
    use timewarp_core::ProcessId;

    fn segment() -> SegmentId {
        SegmentId::new(ProcessId::from_bytes([1; 16]), 0)
    }

    fn config(batch_size: usize) -> WriterConfig {
        WriterConfig::default()
            .with_batch_size(batch_size)
            .with_compression(Compression::None)
    }

    struct FailingSink;

    impl Write for FailingSink {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::other("disk full"))
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn invalid_config_rejected() {
        let result = LogWriter::new(Vec::new(), segment(), config(0));
        assert!(matches!(
            result,
            Err(LogError::Config(ConfigError::ZeroBatchSize))
        ));
    }

    #[test]
    fn flush_on_empty_batch_is_noop() {
        let mut w = LogWriter::new(Vec::new(), segment(), config(4)).unwrap();
        w.flush().unwrap();
        w.flush().unwrap();
        assert_eq!(w.batches_written(), 0);
        let (buf, index) = w.finish().unwrap();
        assert!(buf.is_empty());
        assert!(index.is_empty());
    }

    #[test]
    fn auto_flush_at_batch_size() {
        let mut w = LogWriter::new(Vec::new(), segment(), config(2)).unwrap();
        w.write_record(&Record::new(0, 24, b"A".to_vec())).unwrap();
        assert_eq!(w.batches_written(), 0);
        assert_eq!(w.pending_records(), 1);
        w.write_record(&Record::new(5, 24, b"B".to_vec())).unwrap();
        assert_eq!(w.batches_written(), 1);
        assert_eq!(w.pending_records(), 0);
        w.write_record(&Record::new(9, 36, b"C".to_vec())).unwrap();
        assert_eq!(w.batches_written(), 1);

        let (buf, index) = w.finish().unwrap();
        assert_eq!(index.keys(), &[0, 9]);

        let (first, used) = decode_batch_header(&buf).unwrap();
        assert_eq!(first.num_records, 2);
        assert_eq!(first.first_offset, 0);
        assert_eq!(first.first_timestamp, 0);
        assert_eq!(first.last_timestamp, 5);

        let second_at = used + first.compressed_size as usize;
        assert_eq!(index.values(), &[0, second_at as u64]);
        let (second, _) = decode_batch_header(&buf[second_at..]).unwrap();
        assert_eq!(second.num_records, 1);
        assert_eq!(second.first_offset, 2);
        assert_eq!(second.first_timestamp, 9);
        assert_eq!(second.last_timestamp, 9);
    }

    #[test]
    fn auto_flush_at_batch_bytes() {
        let cfg = WriterConfig {
            batch_bytes: 64,
            ..config(1_000)
        };
        let mut w = LogWriter::new(Vec::new(), segment(), cfg).unwrap();
        w.write_record(&Record::new(0, 0, vec![0u8; 100])).unwrap();
        assert_eq!(w.batches_written(), 1);
    }

    #[test]
    fn checksum_covers_uncompressed_payload() {
        let mut w = LogWriter::new(Vec::new(), segment(), config(10)).unwrap();
        let rec = Record::new(3, 24, b"hello".to_vec());
        w.write_record(&rec).unwrap();
        let (buf, _) = w.finish().unwrap();
        let (header, used) = decode_batch_header(&buf).unwrap();
        let payload = &buf[used..];
        assert_eq!(header.checksum, crc32c::crc32c(payload));
    }

    #[test]
    fn out_of_order_rejected() {
        let mut w = LogWriter::new(Vec::new(), segment(), config(10)).unwrap();
        w.write_record(&Record::new(10, 0, Vec::new())).unwrap();
        w.write_record(&Record::new(10, 0, Vec::new())).unwrap();
        match w.write_record(&Record::new(9, 0, Vec::new())) {
            Err(LogError::OutOfOrder {
                previous: 10,
                timestamp: 9,
            }) => {}
            other => panic!("expected OutOfOrder, got {other:?}"),
        }
        assert_eq!(w.records_written(), 2);
    }

    #[test]
    fn negative_timestamp_rejected() {
        let mut w = LogWriter::new(Vec::new(), segment(), config(10)).unwrap();
        assert!(matches!(
            w.write_record(&Record::new(-1, 0, Vec::new())),
            Err(LogError::OutOfOrder { .. })
        ));
    }

    #[test]
    fn write_builder_matches_write_record() {
        let mut a = LogWriter::new(Vec::new(), segment(), config(10)).unwrap();
        a.write_record(&Record::new(7, 3, b"xyz".to_vec())).unwrap();

        let mut b = LogWriter::new(Vec::new(), segment(), config(10)).unwrap();
        let mut builder = RecordBuilder::new();
        builder.reset(7);
        builder.set_function_id(3).unwrap();
        builder.set_function_call(b"xyz").unwrap();
        b.write_builder(&mut builder).unwrap();

        assert_eq!(a.finish().unwrap().0, b.finish().unwrap().0);
    }

    #[test]
    fn io_failure_keeps_batch_buffered() {
        let mut w = LogWriter::new(FailingSink, segment(), config(10)).unwrap();
        w.write_record(&Record::new(0, 0, b"a".to_vec())).unwrap();
        assert!(matches!(w.flush(), Err(LogError::Io(_))));
        assert_eq!(w.pending_records(), 1);
        assert_eq!(w.batches_written(), 0);
        assert!(w.index().is_empty());
    }

    /// Accepts `limit` bytes, then fails every write.
    struct ShortSink {
        written: Vec<u8>,
        limit: usize,
    }

    impl Write for ShortSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let room = self.limit - self.written.len();
            if room == 0 {
                return Err(io::Error::new(io::ErrorKind::StorageFull, "disk full"));
            }
            let n = room.min(buf.len());
            self.written.extend_from_slice(&buf[..n]);
            Ok(n)
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn torn_frame_ends_the_writer() {
        let mut sink = ShortSink {
            written: Vec::new(),
            limit: 10,
        };
        let mut w = LogWriter::new(&mut sink, segment(), config(10)).unwrap();
        w.write_record(&Record::new(0, 0, b"a".to_vec())).unwrap();
        assert!(matches!(w.flush(), Err(LogError::Io(_))));
        assert!(w.error().is_some());

        let storage_full = |r: Result<(), LogError>| {
            matches!(r, Err(LogError::Io(e)) if e.kind() == io::ErrorKind::StorageFull)
        };
        assert!(storage_full(w.flush()));
        assert!(storage_full(w.write_record(&Record::new(1, 0, b"b".to_vec()))));
        assert_eq!(w.records_written(), 1);
        assert!(matches!(w.finish(), Err(LogError::Io(_))));
        assert_eq!(sink.written.len(), 10);
    }

    #[test]
    fn batch_payload_never_outgrows_its_header() {
        assert!(fits_batch(0, usize::MAX));
        assert!(fits_batch(100, MAX_BATCH_PAYLOAD - 100));
        assert!(!fits_batch(100, MAX_BATCH_PAYLOAD - 99));
        assert!(!fits_batch(1, usize::MAX));
        assert_eq!(size_field(MAX_BATCH_PAYLOAD, "batch payload").unwrap(), u32::MAX);
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn oversized_batch_size_is_an_error() {
        let len = MAX_BATCH_PAYLOAD + 1;
        assert!(matches!(
            size_field(len, "compressed batch"),
            Err(LogError::TooLarge { what: "compressed batch", size }) if size == len
        ));
    }
}

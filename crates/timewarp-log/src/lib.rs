//! Append-only call log segments.
//!
//! A segment holds the calls of one guest process, packed into batches.
//! Each batch is compressed with one codec and carries a CRC32C of its
//! uncompressed payload. A per-segment [`RecordIndex`] maps batch start
//! times to byte offsets so readers can seek without scanning.
//!
//! # Architecture
//!
//! - [`LogWriter`] buffers records and flushes them as batches to any `Write` sink
//! - [`LogReader`] streams records back from any `Read` source, verifying checksums
//! - [`RecordIndexBuilder`] collects `(first_timestamp, offset)` pairs; [`RecordIndex`] answers seeks
//! - [`RecordBuilder`] assembles one encoded record in a reusable buffer
//!
//! # Format
//!
//! ```text
//! segment: [Batch 1] [Batch 2] ... [Batch N]
//! batch:   [header_size u32] ["TL.0"] [first_offset i64] [first_timestamp i64]
//!          [last_timestamp i64] [compressed_size u32] [uncompressed_size u32]
//!          [num_records u32] [checksum u32] [compression u32] [payload]
//! record:  [size u32] [timestamp i64] [function_id u32] [call_len u32] [call]
//! index:   [index_size u32] ["TL.2"] [process_id 16B] [segment u32]
//!          [count u32] [keys u64 * count] [values u64 * count]
//! ```
//!
//! All integers are little-endian. Timestamps are nanoseconds since the
//! process start time.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod codec;
pub mod compression;
pub mod config;
pub mod error;
pub mod index;
pub mod reader;
pub mod record;
pub mod writer;

pub use codec::BatchHeader;
pub use compression::Compression;
pub use config::{ConfigError, WriterConfig};
pub use error::LogError;
pub use index::{read_index, write_index, RecordIndex, RecordIndexBuilder};
pub use reader::{open_reader, LogReader, RecordSource, Records};
pub use record::{Record, RecordBuilder};
pub use writer::{open_writer, LogWriter};

/// File identifier of a record batch header.
pub const BATCH_TAG: [u8; 4] = *b"TL.0";

/// File identifier of a serialized record index.
pub const INDEX_TAG: [u8; 4] = *b"TL.2";

//! Error types for the log segment format.

use std::io;

use timewarp_core::SegmentId;

use crate::compression::Compression;
use crate::config::ConfigError;

/// Errors that can occur while writing, reading or seeking a log segment.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    /// An I/O error occurred in the underlying byte stream.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A record or header is truncated, or its size prefix disagrees
    /// with the data.
    #[error("malformed record at byte {offset}: {detail}")]
    MalformedRecord {
        /// Byte offset of the failing structure.
        offset: u64,
        /// What went wrong.
        detail: String,
    },

    /// The file identifier does not match the structure being read.
    #[error("unknown file format: expected tag {expected:?}, found {found:?}")]
    UnknownFileFormat {
        /// Identifier the reader expected.
        expected: [u8; 4],
        /// Identifier found in the stream.
        found: [u8; 4],
    },

    /// An index was opened against a segment it does not describe.
    #[error("index describes segment {found}, expected {expected}")]
    IndexMismatch {
        /// Segment the caller asked for.
        expected: SegmentId,
        /// Segment recorded in the index.
        found: SegmentId,
    },

    /// A serialized index is structurally invalid.
    #[error("malformed index: {detail}")]
    MalformedIndex {
        /// What went wrong.
        detail: String,
    },

    /// A batch failed its integrity check. Nothing past this point in the
    /// segment can be trusted.
    #[error("corrupt segment at byte {offset}: {detail}")]
    CorruptSegment {
        /// Byte offset of the failing batch header.
        offset: u64,
        /// What went wrong.
        detail: String,
    },

    /// A batch header names a compression codec this build does not know.
    #[error("unknown compression codec {0}")]
    UnknownCompression(u32),

    /// The compression codec rejected its input.
    #[error("{compression} codec failed: {detail}")]
    Compression {
        /// Codec that failed.
        compression: Compression,
        /// Codec error message.
        detail: String,
    },

    /// A record timestamp went backwards.
    #[error("record timestamp {timestamp} precedes previous timestamp {previous}")]
    OutOfOrder {
        /// Timestamp of the last accepted record.
        previous: i64,
        /// Rejected timestamp.
        timestamp: i64,
    },

    /// A record or batch is too large for the format's 32-bit size fields.
    #[error("{what} of {size} bytes exceeds the 32-bit size limit")]
    TooLarge {
        /// The structure that overflowed.
        what: &'static str,
        /// Its size in bytes.
        size: usize,
    },

    /// A record builder was modified after finalization without a reset.
    #[error("record builder already finalized; reset it before setting fields")]
    BuilderFinished,

    /// The writer configuration is invalid.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

impl LogError {
    /// Re-anchor a payload-relative decoding error at the batch that
    /// contains it.
    pub(crate) fn in_batch(self, batch_offset: u64) -> Self {
        match self {
            Self::MalformedRecord { offset, detail } => Self::MalformedRecord {
                offset: batch_offset,
                detail: format!("batch byte {offset}: {detail}"),
            },
            other => other,
        }
    }

    /// A copy of this error for re-reporting a latched failure. I/O errors
    /// keep their kind and message.
    pub(crate) fn duplicate(&self) -> Self {
        match self {
            Self::Io(e) => Self::Io(io::Error::new(e.kind(), e.to_string())),
            Self::MalformedRecord { offset, detail } => Self::MalformedRecord {
                offset: *offset,
                detail: detail.clone(),
            },
            Self::UnknownFileFormat { expected, found } => Self::UnknownFileFormat {
                expected: *expected,
                found: *found,
            },
            Self::IndexMismatch { expected, found } => Self::IndexMismatch {
                expected: *expected,
                found: *found,
            },
            Self::MalformedIndex { detail } => Self::MalformedIndex {
                detail: detail.clone(),
            },
            Self::CorruptSegment { offset, detail } => Self::CorruptSegment {
                offset: *offset,
                detail: detail.clone(),
            },
            Self::UnknownCompression(code) => Self::UnknownCompression(*code),
            Self::Compression {
                compression,
                detail,
            } => Self::Compression {
                compression: *compression,
                detail: detail.clone(),
            },
            Self::OutOfOrder {
                previous,
                timestamp,
            } => Self::OutOfOrder {
                previous: *previous,
                timestamp: *timestamp,
            },
            Self::TooLarge { what, size } => Self::TooLarge {
                what: *what,
                size: *size,
            },
            Self::BuilderFinished => Self::BuilderFinished,
            Self::Config(e) => Self::Config(e.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_keeps_kind_and_message() {
        let err = LogError::Io(io::Error::new(io::ErrorKind::StorageFull, "disk full"));
        let copy = err.duplicate();
        assert_eq!(copy.to_string(), err.to_string());
        assert!(matches!(copy, LogError::Io(e) if e.kind() == io::ErrorKind::StorageFull));

        let err = LogError::CorruptSegment {
            offset: 96,
            detail: "checksum mismatch".into(),
        };
        assert!(matches!(
            err.duplicate(),
            LogError::CorruptSegment { offset: 96, ref detail } if detail == "checksum mismatch"
        ));
    }
}

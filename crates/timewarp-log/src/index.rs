//! The per-segment time index.
//!
//! Keys are batch `first_timestamp` values, values are the byte offsets of
//! the batch headers. An index is built once when a segment is finished
//! and read-only afterwards.

use std::io::{Read, Write};

use timewarp_core::SegmentId;
use tracing::debug;

use crate::codec::{decode_index_body, encode_index, read_index_body};
use crate::error::LogError;

/// Accumulates index entries in arrival order.
#[derive(Clone, Debug)]
pub struct RecordIndexBuilder {
    segment: SegmentId,
    keys: Vec<u64>,
    values: Vec<u64>,
}

impl RecordIndexBuilder {
    /// Create an empty builder for `segment`.
    pub fn new(segment: SegmentId) -> Self {
        Self {
            segment,
            keys: Vec::new(),
            values: Vec::new(),
        }
    }

    /// Append an entry. Entries need not arrive sorted.
    pub fn push(&mut self, key: u64, value: u64) {
        self.keys.push(key);
        self.values.push(value);
    }

    /// Number of entries pushed.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether no entries have been pushed.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// The segment the index describes.
    pub fn segment(&self) -> SegmentId {
        self.segment
    }

    /// Sort the entries by key into an immutable index.
    ///
    /// The sort is stable: entries sharing a key keep their push order.
    pub fn build(&self) -> RecordIndex {
        let mut pairs: Vec<(u64, u64)> = self
            .keys
            .iter()
            .copied()
            .zip(self.values.iter().copied())
            .collect();
        pairs.sort_by_key(|&(key, _)| key);
        let (keys, values) = pairs.into_iter().unzip();
        debug!(segment = %self.segment, entries = self.keys.len(), "record index built");
        RecordIndex {
            segment: self.segment,
            keys,
            values,
        }
    }

    /// Drop all entries, keeping capacity.
    pub fn reset(&mut self) {
        self.keys.clear();
        self.values.clear();
    }
}

/// A sorted `(key, value)` index for one segment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordIndex {
    segment: SegmentId,
    keys: Vec<u64>,
    values: Vec<u64>,
}

impl RecordIndex {
    /// Assemble an index from sorted columns.
    ///
    /// Fails if the columns differ in length or the keys are not
    /// ascending.
    pub fn from_parts(
        segment: SegmentId,
        keys: Vec<u64>,
        values: Vec<u64>,
    ) -> Result<Self, LogError> {
        if keys.len() != values.len() {
            return Err(LogError::MalformedIndex {
                detail: format!("{} keys but {} values", keys.len(), values.len()),
            });
        }
        if let Some(i) = keys.windows(2).position(|w| w[0] > w[1]) {
            return Err(LogError::MalformedIndex {
                detail: format!("keys not sorted at entry {}", i + 1),
            });
        }
        Ok(Self {
            segment,
            keys,
            values,
        })
    }

    /// The segment the index describes.
    pub fn segment(&self) -> SegmentId {
        self.segment
    }

    /// Sorted keys.
    pub fn keys(&self) -> &[u64] {
        &self.keys
    }

    /// Values, aligned with [`keys`](Self::keys).
    pub fn values(&self) -> &[u64] {
        &self.values
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the index has no entries.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Value of the greatest key `<= key`, or `None` if every key is
    /// larger.
    ///
    /// When several entries share that key, the first one pushed wins, so
    /// a seek lands on the earliest batch that may hold the target.
    pub fn lookup(&self, key: u64) -> Option<u64> {
        let end = self.keys.partition_point(|&k| k <= key);
        if end == 0 {
            return None;
        }
        let found = self.keys[end - 1];
        let first = self.keys.partition_point(|&k| k < found);
        Some(self.values[first])
    }

    /// Iterate `(key, value)` pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.keys.iter().copied().zip(self.values.iter().copied())
    }
}

/// Persist an index.
pub fn write_index(w: &mut dyn Write, index: &RecordIndex) -> Result<(), LogError> {
    w.write_all(&encode_index(index))?;
    w.flush()?;
    Ok(())
}

/// Read an index, checking that it describes `expected`.
pub fn read_index(r: &mut dyn Read, expected: SegmentId) -> Result<RecordIndex, LogError> {
    let body = read_index_body(r)?;
    let index = decode_index_body(&body)?;
    if index.segment != expected {
        return Err(LogError::IndexMismatch {
            expected,
            found: index.segment,
        });
    }
    Ok(index)
}

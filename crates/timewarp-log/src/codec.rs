//! Binary encode/decode for records, batch headers and indexes.
//!
//! All integers are little-endian. Every structure starts with a `u32`
//! size prefix counting the bytes that follow it; decoders accept a larger
//! size and skip the unknown trailing bytes, so fields can be appended
//! without breaking older readers.

use std::io::{ErrorKind, Read};

use timewarp_core::{ProcessId, SegmentId};

use crate::compression::Compression;
use crate::error::LogError;
use crate::index::RecordIndex;
use crate::record::Record;
use crate::{BATCH_TAG, INDEX_TAG};

/// Bytes following a batch header's size prefix: tag plus eight fields.
pub const BATCH_HEADER_SIZE: u32 = 48;

/// Fixed bytes following a record's size prefix, before the call payload.
pub const RECORD_HEADER_SIZE: u32 = 16;

/// Largest call payload a record can carry. A record, size prefix
/// included, must fit in one batch payload, whose size field is 32 bits.
pub const MAX_CALL_LEN: u32 = u32::MAX - 4 - RECORD_HEADER_SIZE;

/// Fixed bytes following an index's size prefix, before keys and values.
pub const INDEX_HEADER_SIZE: u32 = 28;

// ── Primitive readers ───────────────────────────────────────────

/// Take `n` bytes from `data` at `*offset`, advancing the offset.
fn take<'a>(
    data: &'a [u8],
    offset: &mut usize,
    n: usize,
    what: &str,
) -> Result<&'a [u8], LogError> {
    let end = offset.checked_add(n).filter(|&end| end <= data.len());
    match end {
        Some(end) => {
            let bytes = &data[*offset..end];
            *offset = end;
            Ok(bytes)
        }
        None => Err(LogError::MalformedRecord {
            offset: *offset as u64,
            detail: format!(
                "truncated {what}: need {n} bytes, {} available",
                data.len().saturating_sub(*offset)
            ),
        }),
    }
}

fn take_array<const N: usize>(
    data: &[u8],
    offset: &mut usize,
    what: &str,
) -> Result<[u8; N], LogError> {
    let bytes = take(data, offset, N, what)?;
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    Ok(out)
}

fn take_u32(data: &[u8], offset: &mut usize, what: &str) -> Result<u32, LogError> {
    take_array(data, offset, what).map(u32::from_le_bytes)
}

fn take_u64(data: &[u8], offset: &mut usize, what: &str) -> Result<u64, LogError> {
    take_array(data, offset, what).map(u64::from_le_bytes)
}

fn take_i64(data: &[u8], offset: &mut usize, what: &str) -> Result<i64, LogError> {
    take_array(data, offset, what).map(i64::from_le_bytes)
}

/// Read a `u32` size prefix, or `None` on clean EOF.
///
/// The prefix is read byte-by-byte so that a stream ending exactly on a
/// structure boundary (zero bytes) is told apart from truncation.
fn read_size_prefix(r: &mut dyn Read, what: &str) -> Result<Option<u32>, LogError> {
    let mut buf = [0u8; 4];
    let mut filled = 0;
    while filled < 4 {
        match r.read(&mut buf[filled..]) {
            Ok(0) => {
                if filled == 0 {
                    return Ok(None);
                }
                return Err(LogError::MalformedRecord {
                    offset: 0,
                    detail: format!("truncated {what} size: got {filled} of 4 bytes"),
                });
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(LogError::Io(e)),
        }
    }
    Ok(Some(u32::from_le_bytes(buf)))
}

/// Read exactly `len` bytes, reporting a short stream as truncation.
///
/// `len` is untrusted, so the buffer only grows as bytes arrive.
fn read_body(r: &mut dyn Read, len: u32, what: &str) -> Result<Vec<u8>, LogError> {
    let mut buf = Vec::new();
    r.take(u64::from(len)).read_to_end(&mut buf)?;
    if buf.len() != len as usize {
        return Err(LogError::MalformedRecord {
            offset: 0,
            detail: format!("truncated {what}: expected {len} bytes"),
        });
    }
    Ok(buf)
}

fn check_tag(found: [u8; 4], expected: [u8; 4]) -> Result<(), LogError> {
    if found != expected {
        return Err(LogError::UnknownFileFormat { expected, found });
    }
    Ok(())
}

// ── Record encode/decode ────────────────────────────────────────

/// The size prefix of a record carrying `call_len` call bytes.
///
/// Calls longer than [`MAX_CALL_LEN`] fail with [`LogError::TooLarge`].
pub fn record_size(call_len: usize) -> Result<u32, LogError> {
    u32::try_from(call_len)
        .ok()
        .filter(|&len| len <= MAX_CALL_LEN)
        .map(|len| RECORD_HEADER_SIZE + len)
        .ok_or(LogError::TooLarge {
            what: "record call",
            size: call_len,
        })
}

/// Append the encoding of one record to `buf`. Nothing is appended on
/// error.
pub fn encode_record_into(
    buf: &mut Vec<u8>,
    timestamp: i64,
    function_id: u32,
    call: &[u8],
) -> Result<(), LogError> {
    let size = record_size(call.len())?;
    buf.reserve(4 + size as usize);
    buf.extend_from_slice(&size.to_le_bytes());
    buf.extend_from_slice(&timestamp.to_le_bytes());
    buf.extend_from_slice(&function_id.to_le_bytes());
    buf.extend_from_slice(&(size - RECORD_HEADER_SIZE).to_le_bytes());
    buf.extend_from_slice(call);
    Ok(())
}

/// Encode one record. Identical inputs give byte-identical output.
pub fn encode_record(timestamp: i64, function_id: u32, call: &[u8]) -> Result<Vec<u8>, LogError> {
    let mut buf = Vec::new();
    encode_record_into(&mut buf, timestamp, function_id, call)?;
    Ok(buf)
}

/// Decode a record that occupies all of `bytes`.
pub fn decode_record(bytes: &[u8]) -> Result<Record, LogError> {
    let mut offset = 0;
    let record = decode_record_at(bytes, &mut offset)?;
    if offset != bytes.len() {
        return Err(LogError::MalformedRecord {
            offset: offset as u64,
            detail: format!(
                "size prefix covers {offset} bytes, {} supplied",
                bytes.len()
            ),
        });
    }
    Ok(record)
}

/// Decode the record starting at `*offset`, advancing past it.
pub(crate) fn decode_record_at(data: &[u8], offset: &mut usize) -> Result<Record, LogError> {
    let start = *offset;
    let size = take_u32(data, offset, "record size")?;
    if size < RECORD_HEADER_SIZE {
        return Err(LogError::MalformedRecord {
            offset: start as u64,
            detail: format!("record size {size} below minimum {RECORD_HEADER_SIZE}"),
        });
    }
    let body = take(data, offset, size as usize, "record")?;

    let mut at = 0;
    let timestamp = take_i64(body, &mut at, "record timestamp")?;
    let function_id = take_u32(body, &mut at, "record function id")?;
    let call_len = take_u32(body, &mut at, "record call length")?;
    if u64::from(call_len) + u64::from(RECORD_HEADER_SIZE) > u64::from(size) {
        return Err(LogError::MalformedRecord {
            offset: start as u64,
            detail: format!("call length {call_len} overruns record size {size}"),
        });
    }
    let call = take(body, &mut at, call_len as usize, "record call")?;

    Ok(Record {
        timestamp,
        function_id,
        function_call: call.to_vec(),
    })
}

// ── Batch header encode/decode ──────────────────────────────────

/// Metadata preceding each compressed batch payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BatchHeader {
    /// Sequence number of the batch's first record within the segment.
    pub first_offset: i64,
    /// Timestamp of the first record.
    pub first_timestamp: i64,
    /// Timestamp of the last record.
    pub last_timestamp: i64,
    /// Payload bytes on disk.
    pub compressed_size: u32,
    /// Payload bytes after decompression.
    pub uncompressed_size: u32,
    /// Records packed into the payload.
    pub num_records: u32,
    /// CRC32C of the uncompressed payload.
    pub checksum: u32,
    /// Codec applied to the payload.
    pub compression: Compression,
}

impl BatchHeader {
    /// Encoded length including the size prefix.
    pub const ENCODED_LEN: usize = 4 + BATCH_HEADER_SIZE as usize;
}

/// Append the encoding of a batch header to `buf`.
pub fn encode_batch_header_into(buf: &mut Vec<u8>, header: &BatchHeader) {
    buf.reserve(BatchHeader::ENCODED_LEN);
    buf.extend_from_slice(&BATCH_HEADER_SIZE.to_le_bytes());
    buf.extend_from_slice(&BATCH_TAG);
    buf.extend_from_slice(&header.first_offset.to_le_bytes());
    buf.extend_from_slice(&header.first_timestamp.to_le_bytes());
    buf.extend_from_slice(&header.last_timestamp.to_le_bytes());
    buf.extend_from_slice(&header.compressed_size.to_le_bytes());
    buf.extend_from_slice(&header.uncompressed_size.to_le_bytes());
    buf.extend_from_slice(&header.num_records.to_le_bytes());
    buf.extend_from_slice(&header.checksum.to_le_bytes());
    buf.extend_from_slice(&header.compression.code().to_le_bytes());
}

/// Encode a batch header.
pub fn encode_batch_header(header: &BatchHeader) -> Vec<u8> {
    let mut buf = Vec::with_capacity(BatchHeader::ENCODED_LEN);
    encode_batch_header_into(&mut buf, header);
    buf
}

/// Decode a batch header from the start of `bytes`.
///
/// Returns the header and the number of bytes it occupied, which may
/// exceed [`BatchHeader::ENCODED_LEN`] for headers written by a newer
/// build.
pub fn decode_batch_header(bytes: &[u8]) -> Result<(BatchHeader, usize), LogError> {
    let mut offset = 0;
    let size = take_u32(bytes, &mut offset, "batch header size")?;
    let body = take(bytes, &mut offset, size as usize, "batch header")?;
    let header = decode_batch_header_body(body)?;
    Ok((header, offset))
}

fn decode_batch_header_body(body: &[u8]) -> Result<BatchHeader, LogError> {
    let mut at = 0;
    let tag = take_array::<4>(body, &mut at, "batch tag")?;
    check_tag(tag, BATCH_TAG)?;
    if body.len() < BATCH_HEADER_SIZE as usize {
        return Err(LogError::MalformedRecord {
            offset: 0,
            detail: format!(
                "batch header size {} below minimum {BATCH_HEADER_SIZE}",
                body.len()
            ),
        });
    }
    let header = BatchHeader {
        first_offset: take_i64(body, &mut at, "first_offset")?,
        first_timestamp: take_i64(body, &mut at, "first_timestamp")?,
        last_timestamp: take_i64(body, &mut at, "last_timestamp")?,
        compressed_size: take_u32(body, &mut at, "compressed_size")?,
        uncompressed_size: take_u32(body, &mut at, "uncompressed_size")?,
        num_records: take_u32(body, &mut at, "num_records")?,
        checksum: take_u32(body, &mut at, "checksum")?,
        compression: Compression::from_code(take_u32(body, &mut at, "compression")?)?,
    };
    Ok(header)
}

/// Read the next batch header from a stream.
///
/// Returns `Ok(None)` on clean EOF, otherwise the header and the number
/// of bytes consumed.
pub fn read_batch_header(r: &mut dyn Read) -> Result<Option<(BatchHeader, u64)>, LogError> {
    let Some(size) = read_size_prefix(r, "batch header")? else {
        return Ok(None);
    };
    let body = read_body(r, size, "batch header")?;
    let header = decode_batch_header_body(&body)?;
    Ok(Some((header, 4 + u64::from(size))))
}

// ── Index encode/decode ─────────────────────────────────────────

/// Encode a record index.
pub fn encode_index(index: &RecordIndex) -> Vec<u8> {
    let count = index.len();
    let size = INDEX_HEADER_SIZE as usize + 16 * count;
    let mut buf = Vec::with_capacity(4 + size);
    buf.extend_from_slice(&(size as u32).to_le_bytes());
    buf.extend_from_slice(&INDEX_TAG);
    buf.extend_from_slice(index.segment().process_id.as_bytes());
    buf.extend_from_slice(&index.segment().segment.to_le_bytes());
    buf.extend_from_slice(&(count as u32).to_le_bytes());
    for key in index.keys() {
        buf.extend_from_slice(&key.to_le_bytes());
    }
    for value in index.values() {
        buf.extend_from_slice(&value.to_le_bytes());
    }
    buf
}

/// Decode a record index occupying the start of `bytes`.
pub fn decode_index(bytes: &[u8]) -> Result<RecordIndex, LogError> {
    let mut offset = 0;
    let size = take_u32(bytes, &mut offset, "index size")?;
    let body = take(bytes, &mut offset, size as usize, "index")?;
    decode_index_body(body)
}

pub(crate) fn decode_index_body(body: &[u8]) -> Result<RecordIndex, LogError> {
    let mut at = 0;
    let tag = take_array::<4>(body, &mut at, "index tag")?;
    check_tag(tag, INDEX_TAG)?;
    let process_id = ProcessId::from_bytes(take_array::<16>(body, &mut at, "process id")?);
    let segment = take_u32(body, &mut at, "segment")?;
    let count = take_u32(body, &mut at, "index count")? as usize;

    let needed = count.checked_mul(16).unwrap_or(usize::MAX);
    if body.len() - at < needed {
        return Err(LogError::MalformedIndex {
            detail: format!("{count} entries need {needed} bytes, {} present", body.len() - at),
        });
    }
    let mut keys = Vec::with_capacity(count);
    for _ in 0..count {
        keys.push(take_u64(body, &mut at, "index key")?);
    }
    let mut values = Vec::with_capacity(count);
    for _ in 0..count {
        values.push(take_u64(body, &mut at, "index value")?);
    }
    RecordIndex::from_parts(SegmentId::new(process_id, segment), keys, values)
}

/// Read the size prefix and body of an index from a stream.
pub(crate) fn read_index_body(r: &mut dyn Read) -> Result<Vec<u8>, LogError> {
    match read_size_prefix(r, "index")? {
        Some(size) => read_body(r, size, "index"),
        None => Err(LogError::MalformedIndex {
            detail: "empty index stream".into(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn header() -> BatchHeader {
        BatchHeader {
            first_offset: 10,
            first_timestamp: 1_000,
            last_timestamp: 2_000,
            compressed_size: 77,
            uncompressed_size: 140,
            num_records: 3,
            checksum: 0xDEAD_BEEF,
            compression: Compression::Snappy,
        }
    }

    #[test]
    fn record_layout_is_frozen() {
        let bytes = encode_record(5, 24, b"AB").unwrap();
        assert_eq!(
            bytes,
            [
                18, 0, 0, 0, // size
                5, 0, 0, 0, 0, 0, 0, 0, // timestamp
                24, 0, 0, 0, // function_id
                2, 0, 0, 0, // call_len
                b'A', b'B',
            ]
        );
    }

    #[test]
    fn record_size_limit() {
        assert_eq!(record_size(0).unwrap(), RECORD_HEADER_SIZE);
        assert_eq!(record_size(MAX_CALL_LEN as usize).unwrap(), u32::MAX - 4);
        for len in [MAX_CALL_LEN as usize + 1, u32::MAX as usize] {
            assert!(matches!(
                record_size(len),
                Err(LogError::TooLarge { what: "record call", size }) if size == len
            ));
        }
    }

    #[test]
    fn record_encoding_is_deterministic() {
        assert_eq!(
            encode_record(7, 3, b"xyz").unwrap(),
            encode_record(7, 3, b"xyz").unwrap()
        );
    }

    #[test]
    fn record_roundtrip_empty_call() {
        let bytes = encode_record(-1, 0, &[]).unwrap();
        let rec = decode_record(&bytes).unwrap();
        assert_eq!(rec.timestamp, -1);
        assert_eq!(rec.function_id, 0);
        assert!(rec.function_call.is_empty());
    }

    #[test]
    fn record_with_trailing_fields_is_accepted() {
        let mut bytes = encode_record(9, 36, b"C").unwrap();
        // Grow the size prefix and append an unknown field.
        let size = u32::from_le_bytes(bytes[..4].try_into().unwrap()) + 4;
        bytes[..4].copy_from_slice(&size.to_le_bytes());
        bytes.extend_from_slice(&[1, 2, 3, 4]);
        let rec = decode_record(&bytes).unwrap();
        assert_eq!(rec.function_call, b"C");
    }

    #[test]
    fn record_size_prefix_mismatch_is_malformed() {
        let mut bytes = encode_record(1, 1, b"hello").unwrap();
        bytes.push(0);
        assert!(matches!(
            decode_record(&bytes),
            Err(LogError::MalformedRecord { .. })
        ));

        let bytes = encode_record(1, 1, b"hello").unwrap();
        assert!(matches!(
            decode_record(&bytes[..bytes.len() - 1]),
            Err(LogError::MalformedRecord { .. })
        ));
    }

    #[test]
    fn record_call_overrun_is_malformed() {
        let mut bytes = encode_record(1, 1, b"hello").unwrap();
        // call_len field sits at bytes 16..20.
        bytes[16..20].copy_from_slice(&100u32.to_le_bytes());
        assert!(matches!(
            decode_record(&bytes),
            Err(LogError::MalformedRecord { .. })
        ));
    }

    #[test]
    fn record_size_below_minimum_is_malformed() {
        let bytes = 8u32.to_le_bytes();
        let mut data = bytes.to_vec();
        data.extend_from_slice(&[0; 8]);
        assert!(matches!(
            decode_record(&data),
            Err(LogError::MalformedRecord { .. })
        ));
    }

    #[test]
    fn batch_header_roundtrip() {
        let bytes = encode_batch_header(&header());
        assert_eq!(bytes.len(), BatchHeader::ENCODED_LEN);
        assert_eq!(&bytes[4..8], b"TL.0");
        let (decoded, used) = decode_batch_header(&bytes).unwrap();
        assert_eq!(decoded, header());
        assert_eq!(used, bytes.len());
    }

    #[test]
    fn batch_header_wrong_tag_is_unknown_format() {
        let mut bytes = encode_batch_header(&header());
        bytes[4..8].copy_from_slice(b"TL.2");
        match decode_batch_header(&bytes) {
            Err(LogError::UnknownFileFormat { expected, found }) => {
                assert_eq!(&expected, b"TL.0");
                assert_eq!(&found, b"TL.2");
            }
            other => panic!("expected UnknownFileFormat, got {other:?}"),
        }
    }

    #[test]
    fn batch_header_with_unknown_trailing_field() {
        let mut bytes = encode_batch_header(&header());
        bytes[..4].copy_from_slice(&(BATCH_HEADER_SIZE + 8).to_le_bytes());
        bytes.extend_from_slice(&[0xAA; 8]);
        let (decoded, used) = decode_batch_header(&bytes).unwrap();
        assert_eq!(decoded, header());
        assert_eq!(used, BatchHeader::ENCODED_LEN + 8);
    }

    #[test]
    fn batch_header_short_size_is_malformed() {
        let mut bytes = encode_batch_header(&header());
        bytes[..4].copy_from_slice(&20u32.to_le_bytes());
        assert!(matches!(
            decode_batch_header(&bytes),
            Err(LogError::MalformedRecord { .. })
        ));
    }

    #[test]
    fn read_batch_header_clean_eof() {
        let mut empty: &[u8] = &[];
        assert!(read_batch_header(&mut empty).unwrap().is_none());
    }

    #[test]
    fn read_batch_header_partial_prefix_is_malformed() {
        let mut partial: &[u8] = &[48, 0];
        assert!(matches!(
            read_batch_header(&mut partial),
            Err(LogError::MalformedRecord { .. })
        ));
    }

    #[test]
    fn read_batch_header_truncated_body_is_malformed() {
        let bytes = encode_batch_header(&header());
        let mut short = &bytes[..20];
        assert!(matches!(
            read_batch_header(&mut short),
            Err(LogError::MalformedRecord { .. })
        ));
    }

    proptest! {
        #[test]
        fn record_roundtrip(
            timestamp in any::<i64>(),
            function_id in any::<u32>(),
            call in proptest::collection::vec(any::<u8>(), 0..512),
        ) {
            let bytes = encode_record(timestamp, function_id, &call).unwrap();
            let rec = decode_record(&bytes).unwrap();
            prop_assert_eq!(rec.timestamp, timestamp);
            prop_assert_eq!(rec.function_id, function_id);
            prop_assert_eq!(rec.function_call, call);
        }

        #[test]
        fn truncated_record_never_decodes(
            call in proptest::collection::vec(any::<u8>(), 0..64),
            cut in 1usize..20,
        ) {
            let bytes = encode_record(0, 0, &call).unwrap();
            let cut = cut.min(bytes.len());
            prop_assert!(decode_record(&bytes[..bytes.len() - cut]).is_err());
        }
    }
}

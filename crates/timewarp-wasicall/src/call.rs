//! Encoding of call arguments and results inside a record's
//! `function_call` payload.
//!
//! ```text
//! [params_len u32] [params] [tag u8] [value | errno u16]
//! ```
//!
//! Tag 0 is success followed by the encoded value, tag 1 is failure
//! followed by the errno. Values use a little-endian, length-prefixed
//! encoding: strings, byte blobs and sequences carry a `u32` length.
//! Scatter/gather buffers are recorded as one blob: their capacity when
//! the host fills them, their content when the guest supplies them.

use std::io::{IoSlice, IoSliceMut};
use std::ops::Deref;

use timewarp_core::wasi::{
    Event, FdStat, FileStat, PreStat, SocketAddress, Subscription, SubscriptionKind,
};
use timewarp_core::{Errno, Fd};

/// A call payload could not be decoded.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The payload ended early.
    #[error("truncated call payload at byte {offset}: need {needed} more bytes")]
    Truncated {
        /// Byte offset of the failing read.
        offset: usize,
        /// Bytes the read needed.
        needed: usize,
    },
    /// A string is not UTF-8.
    #[error("invalid UTF-8 string at byte {offset}")]
    InvalidUtf8 {
        /// Byte offset of the string.
        offset: usize,
    },
    /// An enumeration tag is out of range.
    #[error("invalid {what} tag {tag}")]
    InvalidTag {
        /// The enumeration being decoded.
        what: &'static str,
        /// The rejected tag.
        tag: u8,
    },
    /// Bytes were left over after the value.
    #[error("{remaining} unexpected trailing bytes")]
    TrailingBytes {
        /// Bytes left unread.
        remaining: usize,
    },
}

/// A value that can be written into a call payload.
pub trait Encode {
    /// Append the encoding of `self` to `buf`.
    fn encode(&self, buf: &mut Vec<u8>);
}

/// A value that can be read back from a call payload.
pub trait Decode: Sized {
    /// Read one value, advancing the decoder.
    fn decode(d: &mut CallDecoder<'_>) -> Result<Self, DecodeError>;
}

/// Cursor over an encoded call payload.
#[derive(Debug)]
pub struct CallDecoder<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> CallDecoder<'a> {
    /// Start decoding `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    /// Bytes consumed so far.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Bytes left.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    /// Take the next `n` bytes.
    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < n {
            return Err(DecodeError::Truncated {
                offset: self.offset,
                needed: n,
            });
        }
        let out = &self.data[self.offset..self.offset + n];
        self.offset += n;
        Ok(out)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(N)?);
        Ok(out)
    }

    /// Take a `u32`-length-prefixed blob.
    pub fn blob(&mut self) -> Result<&'a [u8], DecodeError> {
        let len = u32::decode(self)? as usize;
        self.bytes(len)
    }

    /// Decode one value.
    pub fn decode<T: Decode>(&mut self) -> Result<T, DecodeError> {
        T::decode(self)
    }

    /// Fail unless every byte was consumed.
    pub fn finish(&self) -> Result<(), DecodeError> {
        match self.remaining() {
            0 => Ok(()),
            remaining => Err(DecodeError::TrailingBytes { remaining }),
        }
    }
}

// ── Primitives ──────────────────────────────────────────────────

macro_rules! int_codec {
    ($($t:ty),*) => {$(
        impl Encode for $t {
            fn encode(&self, buf: &mut Vec<u8>) {
                buf.extend_from_slice(&self.to_le_bytes());
            }
        }

        impl Decode for $t {
            fn decode(d: &mut CallDecoder<'_>) -> Result<Self, DecodeError> {
                d.array().map(<$t>::from_le_bytes)
            }
        }
    )*};
}

int_codec!(u8, u16, u32, u64, i32, i64);

impl Encode for usize {
    fn encode(&self, buf: &mut Vec<u8>) {
        (*self as u64).encode(buf);
    }
}

impl Decode for usize {
    fn decode(d: &mut CallDecoder<'_>) -> Result<Self, DecodeError> {
        u64::decode(d).map(|v| v as usize)
    }
}

impl Encode for () {
    fn encode(&self, _buf: &mut Vec<u8>) {}
}

impl Decode for () {
    fn decode(_d: &mut CallDecoder<'_>) -> Result<Self, DecodeError> {
        Ok(())
    }
}

impl<T: Encode + ?Sized> Encode for &T {
    fn encode(&self, buf: &mut Vec<u8>) {
        (**self).encode(buf);
    }
}

impl Encode for Fd {
    fn encode(&self, buf: &mut Vec<u8>) {
        self.0.encode(buf);
    }
}

impl Decode for Fd {
    fn decode(d: &mut CallDecoder<'_>) -> Result<Self, DecodeError> {
        u32::decode(d).map(Fd)
    }
}

impl Encode for Errno {
    fn encode(&self, buf: &mut Vec<u8>) {
        self.0.encode(buf);
    }
}

impl Decode for Errno {
    fn decode(d: &mut CallDecoder<'_>) -> Result<Self, DecodeError> {
        u16::decode(d).map(Errno)
    }
}

impl Encode for [u8] {
    fn encode(&self, buf: &mut Vec<u8>) {
        (self.len() as u32).encode(buf);
        buf.extend_from_slice(self);
    }
}

impl Encode for Vec<u8> {
    fn encode(&self, buf: &mut Vec<u8>) {
        self.as_slice().encode(buf);
    }
}

impl Decode for Vec<u8> {
    fn decode(d: &mut CallDecoder<'_>) -> Result<Self, DecodeError> {
        d.blob().map(<[u8]>::to_vec)
    }
}

impl Encode for str {
    fn encode(&self, buf: &mut Vec<u8>) {
        self.as_bytes().encode(buf);
    }
}

impl Encode for String {
    fn encode(&self, buf: &mut Vec<u8>) {
        self.as_str().encode(buf);
    }
}

impl Decode for String {
    fn decode(d: &mut CallDecoder<'_>) -> Result<Self, DecodeError> {
        let offset = d.offset();
        let bytes = d.blob()?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| DecodeError::InvalidUtf8 { offset })
    }
}

macro_rules! seq_codec {
    ($($t:ty),*) => {$(
        impl Encode for [$t] {
            fn encode(&self, buf: &mut Vec<u8>) {
                (self.len() as u32).encode(buf);
                for item in self {
                    item.encode(buf);
                }
            }
        }

        impl Encode for Vec<$t> {
            fn encode(&self, buf: &mut Vec<u8>) {
                self.as_slice().encode(buf);
            }
        }

        impl Decode for Vec<$t> {
            fn decode(d: &mut CallDecoder<'_>) -> Result<Self, DecodeError> {
                let len = u32::decode(d)? as usize;
                // Cap the preallocation by what the payload could hold.
                let mut out = Vec::with_capacity(len.min(d.remaining()));
                for _ in 0..len {
                    out.push(<$t>::decode(d)?);
                }
                Ok(out)
            }
        }
    )*};
}

seq_codec!(String, Subscription, Event);

macro_rules! tuple_codec {
    ($($name:ident)+) => {
        impl<$($name: Encode),+> Encode for ($($name,)+) {
            #[allow(non_snake_case)]
            fn encode(&self, buf: &mut Vec<u8>) {
                let ($($name,)+) = self;
                $($name.encode(buf);)+
            }
        }

        impl<$($name: Decode),+> Decode for ($($name,)+) {
            fn decode(d: &mut CallDecoder<'_>) -> Result<Self, DecodeError> {
                Ok(($($name::decode(d)?,)+))
            }
        }
    };
}

tuple_codec!(A B);
tuple_codec!(A B C);
tuple_codec!(A B C D);
tuple_codec!(A B C D E);
tuple_codec!(A B C D E F);
tuple_codec!(A B C D E F G);

// ── WASI structures ─────────────────────────────────────────────

impl Encode for FdStat {
    fn encode(&self, buf: &mut Vec<u8>) {
        self.file_type.encode(buf);
        self.flags.encode(buf);
        self.rights_base.encode(buf);
        self.rights_inheriting.encode(buf);
    }
}

impl Decode for FdStat {
    fn decode(d: &mut CallDecoder<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            file_type: d.decode()?,
            flags: d.decode()?,
            rights_base: d.decode()?,
            rights_inheriting: d.decode()?,
        })
    }
}

impl Encode for FileStat {
    fn encode(&self, buf: &mut Vec<u8>) {
        self.device.encode(buf);
        self.ino.encode(buf);
        self.file_type.encode(buf);
        self.nlink.encode(buf);
        self.size.encode(buf);
        self.access_time.encode(buf);
        self.modify_time.encode(buf);
        self.change_time.encode(buf);
    }
}

impl Decode for FileStat {
    fn decode(d: &mut CallDecoder<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            device: d.decode()?,
            ino: d.decode()?,
            file_type: d.decode()?,
            nlink: d.decode()?,
            size: d.decode()?,
            access_time: d.decode()?,
            modify_time: d.decode()?,
            change_time: d.decode()?,
        })
    }
}

impl Encode for PreStat {
    fn encode(&self, buf: &mut Vec<u8>) {
        self.dir_name_len.encode(buf);
    }
}

impl Decode for PreStat {
    fn decode(d: &mut CallDecoder<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            dir_name_len: d.decode()?,
        })
    }
}

impl Encode for Subscription {
    fn encode(&self, buf: &mut Vec<u8>) {
        self.user_data.encode(buf);
        self.kind.event_type().encode(buf);
        match self.kind {
            SubscriptionKind::Clock {
                id,
                timeout,
                precision,
                flags,
            } => {
                id.encode(buf);
                timeout.encode(buf);
                precision.encode(buf);
                flags.encode(buf);
            }
            SubscriptionKind::FdRead(fd) | SubscriptionKind::FdWrite(fd) => fd.encode(buf),
        }
    }
}

impl Decode for Subscription {
    fn decode(d: &mut CallDecoder<'_>) -> Result<Self, DecodeError> {
        let user_data = d.decode()?;
        let kind = match u8::decode(d)? {
            0 => SubscriptionKind::Clock {
                id: d.decode()?,
                timeout: d.decode()?,
                precision: d.decode()?,
                flags: d.decode()?,
            },
            1 => SubscriptionKind::FdRead(d.decode()?),
            2 => SubscriptionKind::FdWrite(d.decode()?),
            tag => {
                return Err(DecodeError::InvalidTag {
                    what: "subscription",
                    tag,
                })
            }
        };
        Ok(Self { user_data, kind })
    }
}

impl Encode for Event {
    fn encode(&self, buf: &mut Vec<u8>) {
        self.user_data.encode(buf);
        self.errno.encode(buf);
        self.event_type.encode(buf);
        self.nbytes.encode(buf);
        self.flags.encode(buf);
    }
}

impl Decode for Event {
    fn decode(d: &mut CallDecoder<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            user_data: d.decode()?,
            errno: d.decode()?,
            event_type: d.decode()?,
            nbytes: d.decode()?,
            flags: d.decode()?,
        })
    }
}

impl Encode for SocketAddress {
    fn encode(&self, buf: &mut Vec<u8>) {
        match self {
            Self::Inet { addr, port } => {
                0u8.encode(buf);
                buf.extend_from_slice(addr);
                port.encode(buf);
            }
            Self::Inet6 { addr, port } => {
                1u8.encode(buf);
                buf.extend_from_slice(addr);
                port.encode(buf);
            }
            Self::Unix { path } => {
                2u8.encode(buf);
                path.encode(buf);
            }
        }
    }
}

impl Decode for SocketAddress {
    fn decode(d: &mut CallDecoder<'_>) -> Result<Self, DecodeError> {
        match u8::decode(d)? {
            0 => Ok(Self::Inet {
                addr: d.array()?,
                port: d.decode()?,
            }),
            1 => Ok(Self::Inet6 {
                addr: d.array()?,
                port: d.decode()?,
            }),
            2 => Ok(Self::Unix { path: d.decode()? }),
            tag => Err(DecodeError::InvalidTag {
                what: "socket address",
                tag,
            }),
        }
    }
}

// ── Scatter/gather buffers ──────────────────────────────────────

/// Total length of a set of buffers.
pub fn capacity<B: Deref<Target = [u8]>>(bufs: &[B]) -> usize {
    bufs.iter().map(|b| b.len()).sum()
}

/// Guest-supplied output buffers, encoded as one blob of their content.
pub struct Gather<'a, 'b>(pub &'a [IoSlice<'b>]);

impl Encode for Gather<'_, '_> {
    fn encode(&self, buf: &mut Vec<u8>) {
        (capacity(self.0) as u32).encode(buf);
        for iov in self.0 {
            buf.extend_from_slice(iov);
        }
    }
}

/// The first `len` bytes of host-filled buffers, encoded as one blob.
pub struct Filled<'a, 'b> {
    iovs: &'a [IoSliceMut<'b>],
    len: usize,
}

impl<'a, 'b> Filled<'a, 'b> {
    /// Describe the first `len` bytes of `iovs`. `len` is clamped to their
    /// capacity.
    pub fn new(iovs: &'a [IoSliceMut<'b>], len: usize) -> Self {
        Self {
            iovs,
            len: len.min(capacity(iovs)),
        }
    }
}

impl Encode for Filled<'_, '_> {
    fn encode(&self, buf: &mut Vec<u8>) {
        (self.len as u32).encode(buf);
        let mut left = self.len;
        for iov in self.iovs {
            if left == 0 {
                break;
            }
            let n = left.min(iov.len());
            buf.extend_from_slice(&iov[..n]);
            left -= n;
        }
    }
}

/// Copy `data` across `iovs` in order. Returns the bytes copied.
pub fn scatter(data: &[u8], iovs: &mut [IoSliceMut<'_>]) -> usize {
    let mut copied = 0;
    for iov in iovs.iter_mut() {
        if copied == data.len() {
            break;
        }
        let n = (data.len() - copied).min(iov.len());
        iov[..n].copy_from_slice(&data[copied..copied + n]);
        copied += n;
    }
    copied
}

// ── Call payloads ───────────────────────────────────────────────

const OUTCOME_OK: u8 = 0;
const OUTCOME_ERR: u8 = 1;

/// Append a call payload: parameters followed by the outcome.
pub fn encode_call<P, T>(buf: &mut Vec<u8>, params: &P, outcome: Result<&T, Errno>)
where
    P: Encode + ?Sized,
    T: Encode + ?Sized,
{
    let len_at = buf.len();
    buf.extend_from_slice(&[0; 4]);
    params.encode(buf);
    let params_len = (buf.len() - len_at - 4) as u32;
    buf[len_at..len_at + 4].copy_from_slice(&params_len.to_le_bytes());
    match outcome {
        Ok(value) => {
            OUTCOME_OK.encode(buf);
            value.encode(buf);
        }
        Err(errno) => {
            OUTCOME_ERR.encode(buf);
            errno.encode(buf);
        }
    }
}

/// Split a call payload into its encoded parameters and outcome.
pub fn split_call(payload: &[u8]) -> Result<(&[u8], &[u8]), DecodeError> {
    let mut d = CallDecoder::new(payload);
    let params = d.blob()?;
    let at = d.offset();
    Ok((params, &payload[at..]))
}

/// Decode an outcome produced by [`encode_call`].
pub fn decode_outcome<T: Decode>(outcome: &[u8]) -> Result<Result<T, Errno>, DecodeError> {
    let mut d = CallDecoder::new(outcome);
    let result = match u8::decode(&mut d)? {
        OUTCOME_OK => Ok(T::decode(&mut d)?),
        OUTCOME_ERR => Err(Errno::decode(&mut d)?),
        tag => {
            return Err(DecodeError::InvalidTag {
                what: "outcome",
                tag,
            })
        }
    };
    d.finish()?;
    Ok(result)
}

/// Decode the parameters of a call payload.
pub fn decode_params<P: Decode>(payload: &[u8]) -> Result<P, DecodeError> {
    let (params, _) = split_call(payload)?;
    let mut d = CallDecoder::new(params);
    let value = P::decode(&mut d)?;
    d.finish()?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn call<P: Encode + ?Sized, T: Encode + ?Sized>(params: &P, outcome: Result<&T, Errno>) -> Vec<u8> {
        let mut buf = Vec::new();
        encode_call(&mut buf, params, outcome);
        buf
    }

    #[test]
    fn payload_layout_is_frozen() {
        let payload = call(&(Fd(1), 7u32), Ok(&3usize));
        assert_eq!(
            payload,
            [
                8, 0, 0, 0, // params_len
                1, 0, 0, 0, // fd
                7, 0, 0, 0, // u32
                0, // ok
                3, 0, 0, 0, 0, 0, 0, 0, // usize as u64
            ]
        );

        let payload = call::<_, ()>(&Fd(9), Err(Errno::BADF));
        assert_eq!(payload, [4, 0, 0, 0, 9, 0, 0, 0, 1, 8, 0]);
    }

    #[test]
    fn outcome_roundtrip() {
        let payload = call(&"path", Ok(&FileStat {
            size: 42,
            ..FileStat::default()
        }));
        let (params, outcome) = split_call(&payload).unwrap();
        assert_eq!(params, &[4, 0, 0, 0, b'p', b'a', b't', b'h']);
        let stat: FileStat = decode_outcome(outcome).unwrap().unwrap();
        assert_eq!(stat.size, 42);

        let payload = call::<_, FileStat>(&"path", Err(Errno::NOENT));
        let (_, outcome) = split_call(&payload).unwrap();
        assert_eq!(decode_outcome::<FileStat>(outcome).unwrap(), Err(Errno::NOENT));
    }

    #[test]
    fn outcome_with_trailing_bytes_rejected() {
        let mut payload = call(&(), Ok(&1u32));
        payload.push(0);
        let (_, outcome) = split_call(&payload).unwrap();
        assert_eq!(
            decode_outcome::<u32>(outcome),
            Err(DecodeError::TrailingBytes { remaining: 1 })
        );
    }

    #[test]
    fn invalid_outcome_tag_rejected() {
        let payload = [0, 0, 0, 0, 7];
        let (_, outcome) = split_call(&payload).unwrap();
        assert!(matches!(
            decode_outcome::<()>(outcome),
            Err(DecodeError::InvalidTag { what: "outcome", tag: 7 })
        ));
    }

    #[test]
    fn invalid_utf8_rejected() {
        let blob = [2, 0, 0, 0, 0xC3, 0x28];
        let mut d = CallDecoder::new(&blob);
        assert_eq!(
            d.decode::<String>(),
            Err(DecodeError::InvalidUtf8 { offset: 0 })
        );
    }

    #[test]
    fn huge_sequence_length_fails_without_allocating() {
        let blob = u32::MAX.to_le_bytes();
        let mut d = CallDecoder::new(&blob);
        assert!(matches!(
            d.decode::<Vec<String>>(),
            Err(DecodeError::Truncated { .. })
        ));
    }

    #[test]
    fn gather_concatenates_content() {
        let a = [1u8, 2];
        let b = [3u8];
        let iovs = [IoSlice::new(&a), IoSlice::new(&b)];
        let mut buf = Vec::new();
        Gather(&iovs).encode(&mut buf);
        assert_eq!(buf, [3, 0, 0, 0, 1, 2, 3]);
        // A gathered blob decodes as plain bytes.
        assert_eq!(CallDecoder::new(&buf).decode::<Vec<u8>>().unwrap(), [1, 2, 3]);
    }

    #[test]
    fn filled_takes_prefix_and_scatter_restores_it() {
        let mut a = [1u8, 2];
        let mut b = [3u8, 4];
        let iovs = [IoSliceMut::new(&mut a), IoSliceMut::new(&mut b)];
        let mut buf = Vec::new();
        Filled::new(&iovs, 3).encode(&mut buf);
        assert_eq!(buf, [3, 0, 0, 0, 1, 2, 3]);

        let mut x = [0u8; 1];
        let mut y = [0u8; 4];
        let mut out = [IoSliceMut::new(&mut x), IoSliceMut::new(&mut y)];
        assert_eq!(scatter(&[9, 8, 7], &mut out), 3);
        assert_eq!(x, [9]);
        assert_eq!(y, [8, 7, 0, 0]);
    }

    #[test]
    fn scatter_stops_at_capacity() {
        let mut x = [0u8; 2];
        let mut out = [IoSliceMut::new(&mut x)];
        assert_eq!(scatter(&[1, 2, 3, 4], &mut out), 2);
        assert_eq!(x, [1, 2]);
    }

    fn arb_address() -> impl Strategy<Value = SocketAddress> {
        prop_oneof![
            (any::<[u8; 4]>(), any::<u16>()).prop_map(|(addr, port)| SocketAddress::Inet { addr, port }),
            (any::<[u8; 16]>(), any::<u16>())
                .prop_map(|(addr, port)| SocketAddress::Inet6 { addr, port }),
            "[a-z/]{0,24}".prop_map(|path| SocketAddress::Unix { path }),
        ]
    }

    fn arb_subscription() -> impl Strategy<Value = Subscription> {
        let kind = prop_oneof![
            (any::<u32>(), any::<u64>(), any::<u64>(), any::<u16>()).prop_map(
                |(id, timeout, precision, flags)| SubscriptionKind::Clock {
                    id,
                    timeout,
                    precision,
                    flags,
                }
            ),
            any::<u32>().prop_map(|fd| SubscriptionKind::FdRead(Fd(fd))),
            any::<u32>().prop_map(|fd| SubscriptionKind::FdWrite(Fd(fd))),
        ];
        (any::<u64>(), kind).prop_map(|(user_data, kind)| Subscription { user_data, kind })
    }

    proptest! {
        #[test]
        fn address_roundtrip(addr in arb_address()) {
            let payload = call(&(), Ok(&addr));
            let (_, outcome) = split_call(&payload).unwrap();
            prop_assert_eq!(decode_outcome::<SocketAddress>(outcome).unwrap(), Ok(addr));
        }

        #[test]
        fn subscriptions_roundtrip(subs in proptest::collection::vec(arb_subscription(), 0..8)) {
            let payload = call(subs.as_slice(), Ok(&()));
            let back: Vec<Subscription> = decode_params(&payload).unwrap();
            prop_assert_eq!(back, subs);
        }

        #[test]
        fn strings_roundtrip(args in proptest::collection::vec(".{0,16}", 0..6)) {
            let payload = call(&(), Ok(&args));
            let (_, outcome) = split_call(&payload).unwrap();
            prop_assert_eq!(decode_outcome::<Vec<String>>(outcome).unwrap(), Ok(args));
        }
    }
}

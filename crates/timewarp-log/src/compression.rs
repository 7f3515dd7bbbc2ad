//! The batch payload codecs.

use std::fmt;
use std::io::Read;
use std::str::FromStr;

use crate::config::ConfigError;
use crate::error::LogError;

/// Upper bound on Snappy's output per input byte. A copy element expands
/// at most 64 bytes from 3.
const SNAPPY_MAX_EXPANSION: usize = 32;

/// Compression applied to a batch payload.
///
/// The discriminant is the `compression` field of a batch header.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Compression {
    /// Payload stored as-is.
    None = 0,
    /// Raw (unframed) Snappy.
    Snappy = 1,
    /// A single zstd frame.
    #[default]
    Zstd = 2,
}

impl Compression {
    /// The on-disk code.
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Decode an on-disk code.
    pub fn from_code(code: u32) -> Result<Self, LogError> {
        match code {
            0 => Ok(Self::None),
            1 => Ok(Self::Snappy),
            2 => Ok(Self::Zstd),
            other => Err(LogError::UnknownCompression(other)),
        }
    }

    /// Lowercase name, as accepted by [`FromStr`].
    pub fn name(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Snappy => "snappy",
            Self::Zstd => "zstd",
        }
    }

    /// Compress `input`. `level` only applies to zstd.
    pub fn compress(self, input: &[u8], level: i32) -> Result<Vec<u8>, LogError> {
        match self {
            Self::None => Ok(input.to_vec()),
            Self::Snappy => snap::raw::Encoder::new()
                .compress_vec(input)
                .map_err(|e| self.failed(e)),
            Self::Zstd => zstd::bulk::compress(input, level).map_err(|e| self.failed(e)),
        }
    }

    /// Decompress `input`, which must expand to `uncompressed_size` bytes.
    ///
    /// `uncompressed_size` comes from an unverified header, so it never
    /// sizes an allocation on its own: zstd output is streamed and capped
    /// one byte past the claim, and a Snappy length prefix must agree with
    /// the claim and be reachable from the input. The reader still compares
    /// the result against the header.
    pub fn decompress(self, input: &[u8], uncompressed_size: usize) -> Result<Vec<u8>, LogError> {
        match self {
            Self::None => Ok(input.to_vec()),
            Self::Snappy => {
                let len = snap::raw::decompress_len(input).map_err(|e| self.failed(e))?;
                if len != uncompressed_size {
                    return Err(self.failed(format!(
                        "stream expands to {len} bytes, header says {uncompressed_size}"
                    )));
                }
                if len > input.len().saturating_mul(SNAPPY_MAX_EXPANSION) {
                    return Err(self.failed(format!(
                        "{} input bytes cannot expand to {len}",
                        input.len()
                    )));
                }
                snap::raw::Decoder::new()
                    .decompress_vec(input)
                    .map_err(|e| self.failed(e))
            }
            Self::Zstd => {
                let decoder =
                    zstd::stream::read::Decoder::with_buffer(input).map_err(|e| self.failed(e))?;
                let mut out = Vec::new();
                decoder
                    .take((uncompressed_size as u64).saturating_add(1))
                    .read_to_end(&mut out)
                    .map_err(|e| self.failed(e))?;
                Ok(out)
            }
        }
    }

    fn failed(self, err: impl fmt::Display) -> LogError {
        LogError::Compression {
            compression: self,
            detail: err.to_string(),
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Compression {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "none" => Ok(Self::None),
            "snappy" => Ok(Self::Snappy),
            "zstd" => Ok(Self::Zstd),
            other => Err(ConfigError::UnknownCompression {
                name: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [Compression; 3] = [Compression::None, Compression::Snappy, Compression::Zstd];

    #[test]
    fn codes_are_frozen() {
        assert_eq!(Compression::None.code(), 0);
        assert_eq!(Compression::Snappy.code(), 1);
        assert_eq!(Compression::Zstd.code(), 2);
        for c in ALL {
            assert_eq!(Compression::from_code(c.code()).unwrap(), c);
        }
    }

    #[test]
    fn unknown_code_rejected() {
        match Compression::from_code(7) {
            Err(LogError::UnknownCompression(7)) => {}
            other => panic!("expected UnknownCompression(7), got {other:?}"),
        }
    }

    #[test]
    fn parse_names() {
        assert_eq!("".parse::<Compression>().unwrap(), Compression::None);
        assert_eq!("none".parse::<Compression>().unwrap(), Compression::None);
        assert_eq!("snappy".parse::<Compression>().unwrap(), Compression::Snappy);
        assert_eq!("zstd".parse::<Compression>().unwrap(), Compression::Zstd);
        assert!(matches!(
            "lz4".parse::<Compression>(),
            Err(ConfigError::UnknownCompression { .. })
        ));
    }

    #[test]
    fn codecs_restore_input() {
        let input: Vec<u8> = (0..4096u32).flat_map(|i| (i % 17).to_le_bytes()).collect();
        for c in ALL {
            let packed = c.compress(&input, 3).unwrap();
            let unpacked = c.decompress(&packed, input.len()).unwrap();
            assert_eq!(unpacked, input, "{c} did not restore its input");
        }
    }

    #[test]
    fn false_size_claims_are_rejected() {
        let input = vec![7u8; 4096];
        let snappy = Compression::Snappy.compress(&input, 3).unwrap();
        assert!(Compression::Snappy.decompress(&snappy, usize::MAX).is_err());
        assert!(Compression::Snappy.decompress(&snappy, 100).is_err());

        // A zstd claim caps the output rather than sizing it.
        let zstd = Compression::Zstd.compress(&input, 3).unwrap();
        let short = Compression::Zstd.decompress(&zstd, 100).unwrap();
        assert_eq!(short.len(), 101);
        let long = Compression::Zstd.decompress(&zstd, u32::MAX as usize).unwrap();
        assert_eq!(long, input);
    }

    #[test]
    fn garbage_fails_to_decompress() {
        let garbage = [0xFFu8; 32];
        assert!(Compression::Zstd.decompress(&garbage, 64).is_err());
        assert!(Compression::Snappy.decompress(&garbage, 64).is_err());
    }
}

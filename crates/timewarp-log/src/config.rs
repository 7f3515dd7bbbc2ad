//! Log writer configuration.

use crate::compression::Compression;

/// Configuration for a [`LogWriter`](crate::LogWriter).
///
/// Validated at construction; immutable for the life of the writer, so
/// every batch in a segment uses the same codec.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriterConfig {
    /// Flush after this many records.
    ///
    /// Default: 4096. Must be at least 1.
    pub batch_size: usize,

    /// Flush once the uncompressed batch payload reaches this many bytes.
    ///
    /// Default: 4 MiB. Must lie in `1..=u32::MAX`, the largest payload a
    /// batch header can describe.
    pub batch_bytes: usize,

    /// Codec applied to every batch payload.
    ///
    /// Default: [`Compression::Zstd`].
    pub compression: Compression,

    /// Zstd compression level. Ignored by the other codecs.
    ///
    /// Default: 3. Must lie in `1..=22`.
    pub zstd_level: i32,
}

impl WriterConfig {
    /// Default record count per batch.
    pub const DEFAULT_BATCH_SIZE: usize = 4096;

    /// Default uncompressed byte budget per batch.
    pub const DEFAULT_BATCH_BYTES: usize = 4 * 1024 * 1024;

    /// Default zstd level.
    pub const DEFAULT_ZSTD_LEVEL: i32 = 3;

    /// Check all invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if self.batch_bytes == 0 {
            return Err(ConfigError::ZeroBatchBytes);
        }
        if u32::try_from(self.batch_bytes).is_err() {
            return Err(ConfigError::BatchBytesTooLarge {
                bytes: self.batch_bytes,
            });
        }
        if !(1..=22).contains(&self.zstd_level) {
            return Err(ConfigError::InvalidZstdLevel {
                level: self.zstd_level,
            });
        }
        Ok(())
    }

    /// Same configuration with a different record count per batch.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Same configuration with a different codec.
    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            batch_size: Self::DEFAULT_BATCH_SIZE,
            batch_bytes: Self::DEFAULT_BATCH_BYTES,
            compression: Compression::Zstd,
            zstd_level: Self::DEFAULT_ZSTD_LEVEL,
        }
    }
}

/// Invalid writer configuration.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// `batch_size` is zero.
    #[error("batch_size must be at least 1")]
    ZeroBatchSize,
    /// `batch_bytes` is zero.
    #[error("batch_bytes must be at least 1")]
    ZeroBatchBytes,
    /// `batch_bytes` does not fit a batch header's 32-bit size field.
    #[error("batch_bytes {bytes} exceeds the 32-bit batch size limit")]
    BatchBytesTooLarge {
        /// The configured budget.
        bytes: usize,
    },
    /// `zstd_level` is outside `1..=22`.
    #[error("zstd level {level} outside 1..=22")]
    InvalidZstdLevel {
        /// The configured level.
        level: i32,
    },
    /// A compression name did not parse.
    #[error("unknown compression {name:?} (expected none, snappy or zstd)")]
    UnknownCompression {
        /// The rejected name.
        name: String,
    },
}

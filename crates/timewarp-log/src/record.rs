//! Records and the reusable record builder.

use std::time::{Duration, SystemTime};

use timewarp_core::Syscall;

use crate::codec::encode_record_into;
use crate::error::LogError;

/// One captured call.
///
/// The `function_call` payload is opaque to the log; its layout belongs
/// to the call recorder.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Record {
    /// Nanoseconds since the process start time.
    pub timestamp: i64,
    /// Stable identifier of the called function.
    pub function_id: u32,
    /// Encoded arguments and result.
    pub function_call: Vec<u8>,
}

impl Record {
    /// Create a record.
    pub fn new(timestamp: i64, function_id: u32, function_call: impl Into<Vec<u8>>) -> Self {
        Self {
            timestamp,
            function_id,
            function_call: function_call.into(),
        }
    }

    /// The called operation, or `None` for a function id this build does
    /// not know.
    pub fn syscall(&self) -> Option<Syscall> {
        Syscall::from_id(self.function_id)
    }

    /// Absolute time of the record given the process start time.
    ///
    /// Returns `None` if the result is not representable.
    pub fn time(&self, start: SystemTime) -> Option<SystemTime> {
        let offset = Duration::from_nanos(self.timestamp.unsigned_abs());
        if self.timestamp >= 0 {
            start.checked_add(offset)
        } else {
            start.checked_sub(offset)
        }
    }
}

/// Builds one encoded record in a buffer reused across calls.
///
/// Usage is reset, then populate, then [`bytes`](Self::bytes). Finalizing
/// caches the encoding: repeated calls return the same bytes until the
/// next reset, and setters fail with [`LogError::BuilderFinished`] in the
/// meantime.
#[derive(Debug, Default)]
pub struct RecordBuilder {
    timestamp: i64,
    function_id: u32,
    function_call: Vec<u8>,
    buffer: Vec<u8>,
    finished: bool,
}

impl RecordBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new record at `timestamp`, keeping allocated capacity.
    pub fn reset(&mut self, timestamp: i64) {
        self.timestamp = timestamp;
        self.function_id = 0;
        self.function_call.clear();
        self.buffer.clear();
        self.finished = false;
    }

    fn check_open(&self) -> Result<(), LogError> {
        if self.finished {
            return Err(LogError::BuilderFinished);
        }
        Ok(())
    }

    /// Set the record timestamp.
    pub fn set_timestamp(&mut self, timestamp: i64) -> Result<(), LogError> {
        self.check_open()?;
        self.timestamp = timestamp;
        Ok(())
    }

    /// Set the called function.
    pub fn set_function_id(&mut self, function_id: u32) -> Result<(), LogError> {
        self.check_open()?;
        self.function_id = function_id;
        Ok(())
    }

    /// Replace the call payload.
    pub fn set_function_call(&mut self, call: &[u8]) -> Result<(), LogError> {
        self.check_open()?;
        self.function_call.clear();
        self.function_call.extend_from_slice(call);
        Ok(())
    }

    /// Mutable access to the call payload, for encoding in place.
    pub fn function_call_mut(&mut self) -> Result<&mut Vec<u8>, LogError> {
        self.check_open()?;
        Ok(&mut self.function_call)
    }

    /// The record timestamp.
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// The called function.
    pub fn function_id(&self) -> u32 {
        self.function_id
    }

    /// Whether [`bytes`](Self::bytes) has been called since the last reset.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Finalize and return the encoded record.
    ///
    /// A call payload over [`MAX_CALL_LEN`](crate::codec::MAX_CALL_LEN)
    /// fails with [`LogError::TooLarge`] and leaves the builder open.
    pub fn bytes(&mut self) -> Result<&[u8], LogError> {
        if !self.finished {
            self.buffer.clear();
            encode_record_into(
                &mut self.buffer,
                self.timestamp,
                self.function_id,
                &self.function_call,
            )?;
            self.finished = true;
        }
        Ok(&self.buffer)
    }

    /// Copy the current fields into an owned [`Record`]. Does not
    /// finalize the builder.
    pub fn to_record(&self) -> Record {
        Record {
            timestamp: self.timestamp,
            function_id: self.function_id,
            function_call: self.function_call.clone(),
        }
    }
}

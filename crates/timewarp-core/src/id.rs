//! Strongly-typed identifiers for processes, log segments and descriptors.

use std::fmt;

use uuid::Uuid;

/// Identifies a recorded guest process.
///
/// Process IDs are random (v4) UUIDs allocated when a recording starts.
/// On disk they are stored as their raw 16 bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessId(pub Uuid);

impl ProcessId {
    /// Allocate a fresh random process ID.
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }

    /// Build a process ID from its 16-byte on-disk form.
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// The 16-byte on-disk form.
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for ProcessId {
    fn from(v: Uuid) -> Self {
        Self(v)
    }
}

/// Identifies one append-only log segment of a process.
///
/// Segments are numbered from zero per process. The pair is carried by
/// every record index so an index can be validated against the segment
/// it is opened with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SegmentId {
    /// The process the segment belongs to.
    pub process_id: ProcessId,
    /// Segment number within the process.
    pub segment: u32,
}

impl SegmentId {
    /// Create a segment identifier.
    pub fn new(process_id: ProcessId, segment: u32) -> Self {
        Self {
            process_id,
            segment,
        }
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.process_id, self.segment)
    }
}

/// A guest file descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fd(pub u32);

impl Fd {
    /// Standard input.
    pub const STDIN: Fd = Fd(0);
    /// Standard output.
    pub const STDOUT: Fd = Fd(1);
    /// Standard error.
    pub const STDERR: Fd = Fd(2);
}

impl fmt::Display for Fd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for Fd {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn process_id_bytes_roundtrip() {
        let id = ProcessId::new_v4();
        assert_eq!(ProcessId::from_bytes(*id.as_bytes()), id);
    }

    #[test]
    fn segment_display_names_process_and_number() {
        let id = ProcessId::from_bytes([0x11; 16]);
        let seg = SegmentId::new(id, 3);
        assert_eq!(
            seg.to_string(),
            "11111111-1111-1111-1111-111111111111/3"
        );
    }
}

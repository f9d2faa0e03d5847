use std::path::PathBuf;

/// Where a segment's bytes live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentPayload {
    /// A finished file the engine wrote into the request's work directory.
    File(PathBuf),
    /// Audio rendered in memory.
    Buffer(Vec<u8>),
}

/// One ordered unit of synthesized audio.
///
/// Indices start at 0 and increase by one per segment; consumers relay
/// segments strictly in index order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioSegment {
    pub index: usize,
    pub payload: SegmentPayload,
}

impl AudioSegment {
    pub fn file(index: usize, path: impl Into<PathBuf>) -> Self {
        Self {
            index,
            payload: SegmentPayload::File(path.into()),
        }
    }

    pub fn buffer(index: usize, bytes: Vec<u8>) -> Self {
        Self {
            index,
            payload: SegmentPayload::Buffer(bytes),
        }
    }
}

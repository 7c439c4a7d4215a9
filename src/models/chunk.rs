//! Caller-held state for a chunked upload.

use super::{FileRecord, StoredPart};
use serde::{Deserialize, Serialize};

/// Session state for an in-progress multipart upload.
///
/// The service never stores this; callers keep it between calls and send it
/// back with every chunk. `upload_id` is empty until the first chunk has been
/// accepted by the backend.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct ChunkSession {
    /// Fingerprint of the whole file, computed before chunking.
    pub origin_fingerprint: String,
    pub origin_filename: String,
    pub origin_size: u64,

    /// Backend multipart token, echoed on every call after the first.
    #[serde(default)]
    pub upload_id: String,

    /// 1-based number of the chunk carried by this call.
    pub chunk_number: u32,

    /// Expected number of chunks, 0 when unknown.
    #[serde(default)]
    pub chunk_count: u32,

    #[serde(default)]
    pub is_last_chunk: bool,

    #[serde(default)]
    pub content_type: Option<String>,
}

impl ChunkSession {
    pub fn new(
        origin_fingerprint: impl Into<String>,
        origin_filename: impl Into<String>,
        origin_size: u64,
    ) -> Self {
        Self {
            origin_fingerprint: origin_fingerprint.into(),
            origin_filename: origin_filename.into(),
            origin_size,
            chunk_number: 1,
            ..Self::default()
        }
    }

    pub fn with_chunk_count(mut self, chunk_count: u32) -> Self {
        self.chunk_count = chunk_count;
        self
    }

    /// Whether the backend has already handed out an upload id.
    pub fn is_started(&self) -> bool {
        !self.upload_id.is_empty()
    }

    /// Point the session at chunk `chunk_number`.
    pub fn at_chunk(&mut self, chunk_number: u32, is_last_chunk: bool) -> &mut Self {
        self.chunk_number = chunk_number;
        self.is_last_chunk = is_last_chunk;
        self
    }
}

/// Result of feeding one chunk through the protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// Part stored, more chunks expected.
    Pending { upload_id: String, part: StoredPart },
    /// Last chunk merged; the object now exists and is recorded.
    Completed(FileRecord),
    /// Content already known; nothing was sent to the backend.
    Duplicate(FileRecord),
}

impl ChunkOutcome {
    pub fn record(&self) -> Option<&FileRecord> {
        match self {
            Self::Pending { .. } => None,
            Self::Completed(record) | Self::Duplicate(record) => Some(record),
        }
    }

    pub fn into_record(self) -> Option<FileRecord> {
        match self {
            Self::Pending { .. } => None,
            Self::Completed(record) | Self::Duplicate(record) => Some(record),
        }
    }
}

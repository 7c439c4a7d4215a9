//! Core data models for the upload service.
//!
//! `FileRecord` maps onto the `files` table via `sqlx::FromRow`; the chunk and
//! part types describe the caller-held multipart session and the backend's
//! per-part bookkeeping.

pub mod chunk;
pub mod file;
pub mod part;

pub use chunk::{ChunkOutcome, ChunkSession};
pub use file::{FileHeader, FileRecord};
pub use part::{ByteRange, ObjectInfo, RangeRequest, StoredPart};

//! Backend-side bookkeeping: stored parts, object stats and byte ranges.

use crate::errors::{UploadError, UploadResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// One uploaded part of a multipart session.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct StoredPart {
    /// Part number (1-based).
    pub part_number: u32,

    /// Integrity token returned by the backend for this part.
    pub etag: String,

    /// Size in bytes.
    pub size: u64,
}

/// Stat of a stored object.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct ObjectInfo {
    pub size: u64,
    pub content_type: String,
    pub last_modified: DateTime<Utc>,
    /// Fingerprint recorded when the object was assembled from parts.
    pub fingerprint: Option<String>,
}

/// Inclusive byte range, written `start-end`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> UploadResult<Self> {
        if end < start {
            return Err(UploadError::InvalidRange(format!("{}-{}", start, end)));
        }
        Ok(Self { start, end })
    }

    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Clamp the range to an object of `size` bytes.
    ///
    /// Fails when the range starts at or past the end of the object.
    pub fn resolve(&self, size: u64) -> UploadResult<Self> {
        if self.start >= size {
            return Err(UploadError::InvalidRange(format!(
                "{} (object is {} bytes)",
                self, size
            )));
        }
        Ok(Self {
            start: self.start,
            end: self.end.min(size - 1),
        })
    }
}

/// A `Range` request before the object size is known.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RangeRequest {
    /// `start-end`, inclusive.
    Bounded(ByteRange),
    /// `start-`: from `start` to the end of the object.
    From(u64),
    /// `-n`: the last `n` bytes.
    Suffix(u64),
}

impl RangeRequest {
    /// The concrete range within an object of `size` bytes.
    pub fn resolve(&self, size: u64) -> UploadResult<ByteRange> {
        match *self {
            Self::Bounded(range) => range.resolve(size),
            Self::From(start) => ByteRange {
                start,
                end: u64::MAX,
            }
            .resolve(size),
            Self::Suffix(len) => {
                if len == 0 || size == 0 {
                    return Err(UploadError::InvalidRange(format!(
                        "-{} (object is {} bytes)",
                        len, size
                    )));
                }
                Ok(ByteRange {
                    start: size.saturating_sub(len),
                    end: size - 1,
                })
            }
        }
    }
}

impl FromStr for RangeRequest {
    type Err = UploadError;

    /// Accepts `start-end`, `start-` or `-suffix`, optionally prefixed with `bytes=`.
    fn from_str(s: &str) -> UploadResult<Self> {
        let invalid = || UploadError::InvalidRange(s.to_string());
        let raw = s.trim();
        let spec = raw.strip_prefix("bytes=").unwrap_or(raw);
        let (start, end) = spec.split_once('-').ok_or_else(invalid)?;
        let (start, end) = (start.trim(), end.trim());
        let number = |v: &str| v.parse::<u64>().map_err(|_| invalid());
        match (start.is_empty(), end.is_empty()) {
            (true, true) => Err(invalid()),
            (true, false) => Ok(Self::Suffix(number(end)?)),
            (false, true) => Ok(Self::From(number(start)?)),
            (false, false) => Ok(Self::Bounded(ByteRange::new(number(start)?, number(end)?)?)),
        }
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

//! Represents a stored file, keyed by the fingerprint of its content.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::path::Path;

/// Durable metadata for one piece of content.
///
/// At most one record exists per fingerprint. The filename is whatever the
/// first uploader called the file and plays no part in identity.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq, Eq)]
pub struct FileRecord {
    /// Content hash, primary key.
    pub fingerprint: String,

    /// Format derived from the filename extension (e.g. "jpg").
    pub format: String,

    /// Original filename of the uploaded file.
    pub filename: String,

    /// Size in bytes.
    pub size: i64,

    /// Opaque caller-supplied metadata.
    pub extra: String,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FileRecord {
    /// Build a fresh record stamped with the current time.
    pub fn new(fingerprint: impl Into<String>, header: &FileHeader, extra: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            fingerprint: fingerprint.into(),
            format: format_from_filename(&header.filename),
            filename: header.filename.clone(),
            size: i64::try_from(header.size).unwrap_or(i64::MAX),
            extra: extra.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Caller-declared facts about an upload; the bytes travel separately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub filename: String,
    pub size: u64,
    pub content_type: Option<String>,
}

impl FileHeader {
    pub fn new(filename: impl Into<String>, size: u64) -> Self {
        Self {
            filename: filename.into(),
            size,
            content_type: None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Content type handed to the backend.
    pub fn content_type(&self) -> &str {
        self.content_type
            .as_deref()
            .unwrap_or("application/octet-stream")
    }
}

/// Lowercased extension without the dot; "jpeg" is folded into "jpg".
pub fn format_from_filename(filename: &str) -> String {
    let ext = Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    if ext == "jpeg" { "jpg".to_string() } else { ext }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_comes_from_extension() {
        assert_eq!(format_from_filename("holiday.JPEG"), "jpg");
        assert_eq!(format_from_filename("archive.tar.gz"), "gz");
        assert_eq!(format_from_filename("README"), "");
    }

    #[test]
    fn record_copies_header_fields() {
        let header = FileHeader::new("report.pdf", 2048);
        let record = FileRecord::new("0cc175b9c0f1b6a831c399e269772661", &header, "{}");
        assert_eq!(record.format, "pdf");
        assert_eq!(record.size, 2048);
        assert_eq!(record.created_at, record.updated_at);
        assert_eq!(header.content_type(), "application/octet-stream");
    }
}

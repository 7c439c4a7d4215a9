//! Object-storage backends.
//!
//! [`Backend`] is the only thing the coordinators know about storage. Two
//! implementations ship with the crate:
//! - [`DiskBackend`] keeps objects under a local directory and can issue
//!   presigned URLs when given a [`UrlSigner`](crate::signing::UrlSigner).
//! - [`MemoryBackend`] keeps everything in process; it has no way to express
//!   link expiry and refuses to presign.

mod disk;
mod memory;

pub use disk::DiskBackend;
pub use memory::{MemoryBackend, MemoryStats};

use crate::{
    errors::{UploadError, UploadResult},
    hashing::SeekableReader,
    models::{ByteRange, ObjectInfo, StoredPart},
};
use async_trait::async_trait;
use bytes::Bytes;
use std::{pin::Pin, time::Duration};
use tokio::io::AsyncRead;
use url::Url;
use uuid::Uuid;

/// Readable object content handed back by `get_object*`.
pub type ObjectReader = Pin<Box<dyn AsyncRead + Send>>;

/// Object-storage operations used by the upload coordinators.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Short provider name for logs.
    fn name(&self) -> &'static str;

    /// Largest object `put_object` accepts in one call.
    fn single_put_limit(&self) -> u64;

    /// Write a whole object, replacing any existing object at `key`.
    ///
    /// Reads `reader` from its current position to the end; the number of
    /// bytes read must equal `size`.
    async fn put_object(
        &self,
        key: &str,
        reader: &mut dyn SeekableReader,
        size: u64,
        content_type: &str,
    ) -> UploadResult<()>;

    /// Open a multipart session for `key` and return its upload id.
    async fn init_multipart(&self, key: &str, content_type: &str) -> UploadResult<String>;

    /// Store one part and return its etag.
    ///
    /// `content_hash` is the part checksum computed by the sender; a mismatch
    /// fails the call. Re-sending a part number replaces the earlier part.
    async fn put_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        content: Bytes,
        content_hash: &str,
    ) -> UploadResult<String>;

    /// All parts stored so far for the session, ascending by part number.
    async fn list_parts(&self, key: &str, upload_id: &str) -> UploadResult<Vec<StoredPart>>;

    /// Merge `parts` (ascending, each previously stored) into the object at `key`.
    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[StoredPart],
        final_fingerprint: &str,
    ) -> UploadResult<()>;

    async fn get_object(&self, key: &str) -> UploadResult<ObjectReader>;

    /// Read the inclusive `range` of the object; the range is clamped to the object's end.
    async fn get_object_range(&self, key: &str, range: ByteRange) -> UploadResult<ObjectReader>;

    async fn stat_object(&self, key: &str) -> UploadResult<ObjectInfo>;

    /// A time-limited URL for direct retrieval of `key`.
    ///
    /// Backends that cannot bound the lifetime of a link return
    /// [`UploadError::Unsupported`] instead of handing out a permanent one.
    async fn presigned_url(
        &self,
        key: &str,
        expiry: Duration,
        params: &[(String, String)],
    ) -> UploadResult<Url>;

    /// Cheap readiness check.
    async fn health_check(&self) -> UploadResult<()> {
        Ok(())
    }
}

pub(crate) fn new_upload_id() -> String {
    format!("upl_{}", Uuid::new_v4().simple())
}

/// Check the part list handed to `complete_multipart` before touching any data.
pub(crate) fn validate_part_list(key: &str, upload_id: &str, parts: &[StoredPart]) -> UploadResult<()> {
    if parts.is_empty() {
        return Err(UploadError::IncompleteParts {
            key: key.to_string(),
            upload_id: upload_id.to_string(),
        });
    }
    // parts must be exactly 1..=n, so a skipped chunk cannot be merged away
    if let Some((i, part)) = parts
        .iter()
        .enumerate()
        .find(|(i, part)| part.part_number as usize != i + 1)
    {
        let message = if i == 0 {
            format!("part numbers start at 1, got {}", part.part_number)
        } else if part.part_number > parts[i - 1].part_number {
            format!("part {} is missing", i + 1)
        } else {
            format!(
                "parts out of order: {} listed before {}",
                parts[i - 1].part_number, part.part_number
            )
        };
        return Err(UploadError::storage("complete_multipart", key, message));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn part(n: u32) -> StoredPart {
        StoredPart {
            part_number: n,
            etag: format!("etag-{n}"),
            size: 1,
        }
    }

    #[test]
    fn empty_part_list_is_incomplete() {
        assert!(matches!(
            validate_part_list("k", "u", &[]),
            Err(UploadError::IncompleteParts { .. })
        ));
    }

    #[test]
    fn part_list_must_be_contiguous_from_one() {
        assert!(validate_part_list("k", "u", &[part(1), part(2), part(3)]).is_ok());
        assert!(matches!(
            validate_part_list("k", "u", &[part(1), part(3)]),
            Err(UploadError::Storage { .. })
        ));
        assert!(validate_part_list("k", "u", &[part(2)]).is_err());
        assert!(matches!(
            validate_part_list("k", "u", &[part(2), part(1)]),
            Err(UploadError::Storage { .. })
        ));
        assert!(matches!(
            validate_part_list("k", "u", &[part(1), part(1)]),
            Err(UploadError::Storage { .. })
        ));
        assert!(validate_part_list("k", "u", &[part(0)]).is_err());
    }

    #[test]
    fn upload_ids_are_unique() {
        assert_ne!(new_upload_id(), new_upload_id());
        assert!(new_upload_id().starts_with("upl_"));
    }
}

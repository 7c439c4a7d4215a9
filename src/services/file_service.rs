//! Read side: record lookup, object content and presigned links.

use super::UploadContext;
use crate::{
    backends::ObjectReader,
    errors::{UploadError, UploadResult},
    models::{ByteRange, FileRecord, ObjectInfo, RangeRequest},
};
use std::time::Duration;
use tracing::debug;
use url::Url;

/// A partial read together with what is needed to describe it.
pub struct RangeRead {
    pub info: ObjectInfo,
    /// The requested range clamped to the object.
    pub range: ByteRange,
    pub reader: ObjectReader,
}

pub struct FileService {
    ctx: UploadContext,
}

impl FileService {
    pub fn new(ctx: UploadContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &UploadContext {
        &self.ctx
    }

    pub async fn load(&self, fingerprint: &str) -> UploadResult<FileRecord> {
        self.ctx.store.load(fingerprint).await
    }

    /// Open the whole object stored for `fingerprint`.
    pub async fn read_file(&self, fingerprint: &str) -> UploadResult<(ObjectInfo, ObjectReader)> {
        let key = self.ctx.names.storage_key(fingerprint)?;
        self.read_key(&key).await
    }

    /// Open the object stored under a raw storage key.
    pub async fn read_key(&self, key: &str) -> UploadResult<(ObjectInfo, ObjectReader)> {
        let info = self.ctx.backend.stat_object(key).await?;
        let reader = self.ctx.backend.get_object(key).await?;
        Ok((info, reader))
    }

    /// Open part of the object. `range` is `start-end` (inclusive), `start-`
    /// or `-suffix`, with an optional `bytes=` prefix.
    pub async fn read_range(&self, fingerprint: &str, range: &str) -> UploadResult<RangeRead> {
        let requested: RangeRequest = range.parse()?;
        let key = self.ctx.names.storage_key(fingerprint)?;
        let info = self.ctx.backend.stat_object(&key).await?;
        let range = requested.resolve(info.size)?;
        debug!("Reading {} of {} ({} bytes)", range, key, info.size);
        let reader = self.ctx.backend.get_object_range(&key, range).await?;
        Ok(RangeRead {
            info,
            range,
            reader,
        })
    }

    /// A time-limited URL for the object stored for `fingerprint`.
    ///
    /// Only content with a metadata record can be presigned.
    pub async fn presigned_url(
        &self,
        fingerprint: &str,
        expiry: Duration,
        params: &[(String, String)],
    ) -> UploadResult<Url> {
        let key = self.ctx.names.storage_key(fingerprint)?;
        if !self.ctx.store.exists(fingerprint).await? {
            return Err(UploadError::NotFound(fingerprint.to_string()));
        }
        self.ctx.backend.presigned_url(&key, expiry, params).await
    }
}

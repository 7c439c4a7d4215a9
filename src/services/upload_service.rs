//! Single-shot uploads: hash, deduplicate, store in one backend call, record.

use super::UploadContext;
use crate::{
    errors::{UploadError, UploadResult},
    hashing::SeekableReader,
    models::{FileHeader, FileRecord},
};
use std::io::SeekFrom;
use tokio::io::AsyncSeekExt;
use tracing::{debug, info};

pub struct UploadCoordinator {
    ctx: UploadContext,
}

impl UploadCoordinator {
    pub fn new(ctx: UploadContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &UploadContext {
        &self.ctx
    }

    /// Store `reader` unless identical content is already recorded.
    ///
    /// Returns the record for the content either way. The reader is read
    /// twice: once to fingerprint it and, when the content is new, once more
    /// to send it to the backend. Known content never reaches the backend, so
    /// the single-put ceiling only applies to new content.
    pub async fn upload<R: SeekableReader>(
        &self,
        header: &FileHeader,
        reader: &mut R,
        extra: &str,
    ) -> UploadResult<FileRecord> {
        let fingerprint = self.ctx.hasher.hash(reader).await?;
        debug!("{} hashed to {}", header.filename, fingerprint);

        if header.size > self.ctx.limits.max_file_size {
            return Err(UploadError::SizeLimitExceeded {
                what: "file",
                size: header.size,
                limit: self.ctx.limits.max_file_size,
            });
        }

        if self.ctx.store.exists(&fingerprint).await? {
            info!("{} already stored as {}, skipping upload", header.filename, fingerprint);
            return self.ctx.store.load(&fingerprint).await;
        }

        let limit = self
            .ctx
            .limits
            .single_put_limit
            .min(self.ctx.backend.single_put_limit());
        if header.size > limit {
            return Err(UploadError::SizeLimitExceeded {
                what: "single-shot upload",
                size: header.size,
                limit,
            });
        }

        let key = self.ctx.names.storage_key(&fingerprint)?;
        reader.seek(SeekFrom::Start(0)).await?;
        self.ctx
            .backend
            .put_object(&key, reader, header.size, header.content_type())
            .await?;

        let record = self
            .ctx
            .store
            .create(FileRecord::new(fingerprint, header, extra))
            .await?;
        info!(
            "Stored {} ({} bytes) at {} on {}",
            record.filename,
            header.size,
            key,
            self.ctx.backend.name()
        );
        Ok(record)
    }
}

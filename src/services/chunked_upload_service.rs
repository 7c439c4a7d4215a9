//! Chunked uploads over the backend's multipart protocol.
//!
//! Each call carries one chunk plus the caller-held [`ChunkSession`]. The
//! first call opens a multipart session and writes its id into the session;
//! the call flagged as last merges every stored part and records the file.
//! Nothing about the session is kept here between calls.

use super::UploadContext;
use crate::{
    errors::{UploadError, UploadResult},
    hashing::part_checksum,
    models::{ChunkOutcome, ChunkSession, FileHeader, FileRecord, StoredPart},
};
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info, warn};

pub struct ChunkedUploadCoordinator {
    ctx: UploadContext,
}

impl ChunkedUploadCoordinator {
    pub fn new(ctx: UploadContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &UploadContext {
        &self.ctx
    }

    /// Accept chunk `session.chunk_number`.
    ///
    /// On the first call `session.upload_id` is empty; once the backend opens
    /// a multipart session its id is written back into `session`, so it stays
    /// usable for retries even if this call later fails.
    ///
    /// If the whole file is already recorded when the first chunk arrives, the
    /// existing record is returned as [`ChunkOutcome::Duplicate`] and the
    /// backend is never contacted.
    pub async fn upload_chunk<R>(
        &self,
        session: &mut ChunkSession,
        chunk: &mut R,
        extra: &str,
    ) -> UploadResult<ChunkOutcome>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        self.check_session(session)?;
        let key = self.ctx.names.storage_key(&session.origin_fingerprint)?;

        if !session.is_started() {
            if self.ctx.store.exists(&session.origin_fingerprint).await? {
                info!(
                    "{} already stored as {}, skipping chunked upload",
                    session.origin_filename, session.origin_fingerprint
                );
                let record = self.ctx.store.load(&session.origin_fingerprint).await?;
                return Ok(ChunkOutcome::Duplicate(record));
            }
            let content_type = session
                .content_type
                .as_deref()
                .unwrap_or("application/octet-stream");
            session.upload_id = self.ctx.backend.init_multipart(&key, content_type).await?;
            info!(
                "Opened multipart upload {} for {} at {}",
                session.upload_id, session.origin_filename, key
            );
        }

        let content = self.read_chunk(session, chunk).await?;
        let size = content.len() as u64;
        let checksum = part_checksum(&content);
        let etag = self
            .ctx
            .backend
            .put_part(&key, &session.upload_id, session.chunk_number, content, &checksum)
            .await?;
        debug!(
            "Stored part {} of {} ({} bytes)",
            session.chunk_number, session.upload_id, size
        );

        let part = StoredPart {
            part_number: session.chunk_number,
            etag,
            size,
        };
        if !session.is_last_chunk {
            return Ok(ChunkOutcome::Pending {
                upload_id: session.upload_id.clone(),
                part,
            });
        }

        let record = self.complete(session, &key, extra).await?;
        Ok(ChunkOutcome::Completed(record))
    }

    fn check_session(&self, session: &ChunkSession) -> UploadResult<()> {
        let limits = &self.ctx.limits;
        if session.chunk_number == 0 || session.chunk_number > limits.max_chunk_number {
            return Err(UploadError::PartCountExceeded {
                chunk_number: session.chunk_number,
                max: limits.max_chunk_number,
            });
        }
        if session.chunk_count > 0 && session.chunk_number > session.chunk_count {
            return Err(UploadError::PartCountExceeded {
                chunk_number: session.chunk_number,
                max: session.chunk_count,
            });
        }
        if session.origin_size > limits.max_file_size {
            return Err(UploadError::SizeLimitExceeded {
                what: "file",
                size: session.origin_size,
                limit: limits.max_file_size,
            });
        }
        Ok(())
    }

    /// Buffer the chunk and enforce the part size rules.
    async fn read_chunk<R>(&self, session: &ChunkSession, chunk: &mut R) -> UploadResult<Bytes>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        let limits = &self.ctx.limits;
        let mut buf = Vec::new();
        // one byte past the ceiling is enough to know it was exceeded
        chunk
            .take(limits.chunk_max_size + 1)
            .read_to_end(&mut buf)
            .await?;
        let size = buf.len() as u64;

        if size == 0 {
            return Err(UploadError::EmptyChunk {
                chunk_number: session.chunk_number,
            });
        }
        if size > limits.chunk_max_size {
            return Err(UploadError::part_size(
                session.chunk_number,
                size,
                format!("larger than {} bytes", limits.chunk_max_size),
            ));
        }
        if size < limits.chunk_min_size && !session.is_last_chunk {
            return Err(UploadError::part_size(
                session.chunk_number,
                size,
                format!(
                    "smaller than {} bytes and not the last chunk",
                    limits.chunk_min_size
                ),
            ));
        }
        Ok(Bytes::from(buf))
    }

    async fn complete(
        &self,
        session: &ChunkSession,
        key: &str,
        extra: &str,
    ) -> UploadResult<FileRecord> {
        let parts = self
            .ctx
            .backend
            .list_parts(key, &session.upload_id)
            .await?;
        if parts.is_empty() {
            return Err(UploadError::IncompleteParts {
                key: key.to_string(),
                upload_id: session.upload_id.clone(),
            });
        }
        if let Err(err) = check_merge(session, &parts) {
            warn!(
                "refusing to merge upload {} for {}: {}",
                session.upload_id, session.origin_fingerprint, err
            );
            return Err(UploadError::storage("complete_multipart", key, err));
        }

        self.ctx
            .backend
            .complete_multipart(key, &session.upload_id, &parts, &session.origin_fingerprint)
            .await?;

        let mut header = FileHeader::new(session.origin_filename.clone(), session.origin_size);
        header.content_type = session.content_type.clone();
        let record = self
            .ctx
            .store
            .create(FileRecord::new(
                session.origin_fingerprint.clone(),
                &header,
                extra,
            ))
            .await?;
        info!(
            "Completed multipart upload {} for {} from {} parts",
            session.upload_id,
            record.filename,
            parts.len()
        );
        Ok(record)
    }
}

/// The stored parts must add up to exactly the announced file: numbered
/// `1..=chunk_number` with no gaps, totalling `origin_size` bytes.
fn check_merge(session: &ChunkSession, parts: &[StoredPart]) -> Result<(), String> {
    if session.chunk_count > 0 && session.chunk_number != session.chunk_count {
        return Err(format!(
            "chunk {} flagged last but {} chunks were announced",
            session.chunk_number, session.chunk_count
        ));
    }
    if let Some((i, part)) = parts
        .iter()
        .enumerate()
        .find(|(i, part)| part.part_number as usize != i + 1)
    {
        return Err(format!(
            "part {} is missing (found part {} instead)",
            i + 1,
            part.part_number
        ));
    }
    let last = parts.last().map(|p| p.part_number).unwrap_or_default();
    if last != session.chunk_number {
        return Err(format!(
            "last chunk is {} but the backend holds parts up to {}",
            session.chunk_number, last
        ));
    }
    let total: u64 = parts.iter().map(|p| p.size).sum();
    if total != session.origin_size {
        return Err(format!(
            "parts total {} bytes, expected {}",
            total, session.origin_size
        ));
    }
    Ok(())
}

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use dedup_uploader::{
    Backend, MemoryBackend, SqliteMetadataStore, UploadContext, UploadLimits, UploadResult,
    backends::ObjectReader,
    hashing::SeekableReader,
    models::{ByteRange, ObjectInfo, StoredPart},
};
use std::{sync::Arc, time::Duration};
use url::Url;

/// Limits small enough to drive the chunk rules with a few bytes.
pub fn tiny_limits() -> UploadLimits {
    UploadLimits {
        chunk_min_size: 4,
        chunk_max_size: 16,
        max_chunk_number: 5,
        max_file_size: 1 << 20,
        single_put_limit: 1 << 20,
    }
}

pub async fn memory_store() -> Arc<SqliteMetadataStore> {
    let store = SqliteMetadataStore::connect("sqlite::memory:", 1)
        .await
        .expect("open sqlite");
    store.migrate().await.expect("migrate");
    Arc::new(store)
}

/// Context over `backend` and a fresh in-memory metadata store.
pub async fn context(backend: Arc<dyn Backend>, limits: UploadLimits) -> UploadContext {
    UploadContext::new(backend, memory_store().await).with_limits(limits)
}

pub fn fingerprint(content: &[u8]) -> String {
    format!("{:x}", md5::compute(content))
}

pub fn storage_key(fingerprint: &str) -> String {
    format!("{}/{}", &fingerprint[..2], &fingerprint[2..])
}

/// Acknowledges every part without keeping it.
pub struct LossyBackend {
    pub inner: MemoryBackend,
}

#[async_trait]
impl Backend for LossyBackend {
    fn name(&self) -> &'static str {
        "lossy"
    }

    fn single_put_limit(&self) -> u64 {
        self.inner.single_put_limit()
    }

    async fn put_object(
        &self,
        key: &str,
        reader: &mut dyn SeekableReader,
        size: u64,
        content_type: &str,
    ) -> UploadResult<()> {
        self.inner.put_object(key, reader, size, content_type).await
    }

    async fn init_multipart(&self, key: &str, content_type: &str) -> UploadResult<String> {
        self.inner.init_multipart(key, content_type).await
    }

    async fn put_part(
        &self,
        _key: &str,
        _upload_id: &str,
        part_number: u32,
        _content: Bytes,
        _content_hash: &str,
    ) -> UploadResult<String> {
        Ok(format!("dropped-{}", part_number))
    }

    async fn list_parts(&self, key: &str, upload_id: &str) -> UploadResult<Vec<StoredPart>> {
        self.inner.list_parts(key, upload_id).await
    }

    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[StoredPart],
        final_fingerprint: &str,
    ) -> UploadResult<()> {
        self.inner
            .complete_multipart(key, upload_id, parts, final_fingerprint)
            .await
    }

    async fn get_object(&self, key: &str) -> UploadResult<ObjectReader> {
        self.inner.get_object(key).await
    }

    async fn get_object_range(&self, key: &str, range: ByteRange) -> UploadResult<ObjectReader> {
        self.inner.get_object_range(key, range).await
    }

    async fn stat_object(&self, key: &str) -> UploadResult<ObjectInfo> {
        self.inner.stat_object(key).await
    }

    async fn presigned_url(
        &self,
        key: &str,
        expiry: Duration,
        params: &[(String, String)],
    ) -> UploadResult<Url> {
        self.inner.presigned_url(key, expiry, params).await
    }
}

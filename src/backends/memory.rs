//! In-process backend.
//!
//! Useful for tests and throwaway deployments. State lives behind a
//! `std::sync::Mutex` that is never held across an await point.

use super::{Backend, ObjectReader, new_upload_id, validate_part_list};
use crate::{
    errors::{UploadError, UploadResult},
    hashing::{SeekableReader, part_checksum},
    models::{ByteRange, ObjectInfo, StoredPart},
};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::Utc;
use std::{
    collections::{BTreeMap, HashMap},
    io::Cursor,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};
use tokio::io::AsyncReadExt;
use url::Url;

const DEFAULT_SINGLE_PUT_LIMIT: u64 = 100 << 20;

/// Call counters, for asserting how much work reached the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub put_objects: u64,
    pub multipart_inits: u64,
    pub parts_put: u64,
    pub multipart_completions: u64,
}

impl MemoryStats {
    /// Every call that wrote bytes.
    pub fn writes(&self) -> u64 {
        self.put_objects + self.parts_put + self.multipart_completions
    }
}

struct StoredObject {
    data: Bytes,
    info: ObjectInfo,
}

struct PendingUpload {
    key: String,
    content_type: String,
    parts: BTreeMap<u32, (StoredPart, Bytes)>,
}

#[derive(Default)]
struct MemoryState {
    objects: HashMap<String, StoredObject>,
    uploads: HashMap<String, PendingUpload>,
    stats: MemoryStats,
}

/// Backend that keeps objects and multipart sessions in memory.
#[derive(Clone)]
pub struct MemoryBackend {
    state: Arc<Mutex<MemoryState>>,
    single_put_limit: u64,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
            single_put_limit: DEFAULT_SINGLE_PUT_LIMIT,
        }
    }

    pub fn with_single_put_limit(mut self, limit: u64) -> Self {
        self.single_put_limit = limit;
        self
    }

    pub fn stats(&self) -> MemoryStats {
        self.lock().stats
    }

    pub fn object_count(&self) -> usize {
        self.lock().objects.len()
    }

    /// Full content of `key`, if present.
    pub fn object_bytes(&self, key: &str) -> Option<Bytes> {
        self.lock().objects.get(key).map(|obj| obj.data.clone())
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        // a poisoned map is still structurally valid
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn object_data(&self, key: &str) -> UploadResult<Bytes> {
        self.lock()
            .objects
            .get(key)
            .map(|obj| obj.data.clone())
            .ok_or_else(|| UploadError::NotFound(key.to_string()))
    }
}

fn upload_for<'a>(
    state: &'a mut MemoryState,
    op: &'static str,
    key: &str,
    upload_id: &str,
) -> UploadResult<&'a mut PendingUpload> {
    match state.uploads.get_mut(upload_id) {
        Some(upload) if upload.key == key => Ok(upload),
        Some(upload) => Err(UploadError::storage(
            op,
            key,
            format!("upload `{}` belongs to `{}`", upload_id, upload.key),
        )),
        None => Err(UploadError::storage(
            op,
            key,
            format!("no such upload `{}`", upload_id),
        )),
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn single_put_limit(&self) -> u64 {
        self.single_put_limit
    }

    async fn put_object(
        &self,
        key: &str,
        reader: &mut dyn SeekableReader,
        size: u64,
        content_type: &str,
    ) -> UploadResult<()> {
        if size > self.single_put_limit {
            return Err(UploadError::storage(
                "put_object",
                key,
                format!("{} bytes exceeds single put limit {}", size, self.single_put_limit),
            ));
        }
        let mut buf = Vec::with_capacity(usize::try_from(size).unwrap_or(0));
        reader.read_to_end(&mut buf).await?;
        if buf.len() as u64 != size {
            return Err(UploadError::storage(
                "put_object",
                key,
                format!("declared {} bytes but read {}", size, buf.len()),
            ));
        }

        let mut state = self.lock();
        state.stats.put_objects += 1;
        state.objects.insert(
            key.to_string(),
            StoredObject {
                data: Bytes::from(buf),
                info: ObjectInfo {
                    size,
                    content_type: content_type.to_string(),
                    last_modified: Utc::now(),
                    fingerprint: None,
                },
            },
        );
        Ok(())
    }

    async fn init_multipart(&self, key: &str, content_type: &str) -> UploadResult<String> {
        let upload_id = new_upload_id();
        let mut state = self.lock();
        state.stats.multipart_inits += 1;
        state.uploads.insert(
            upload_id.clone(),
            PendingUpload {
                key: key.to_string(),
                content_type: content_type.to_string(),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn put_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        content: Bytes,
        content_hash: &str,
    ) -> UploadResult<String> {
        if part_number == 0 {
            return Err(UploadError::storage("put_part", key, "part numbers start at 1"));
        }
        let etag = part_checksum(&content);
        if etag != content_hash {
            return Err(UploadError::storage(
                "put_part",
                key,
                format!("content hash mismatch on part {}", part_number),
            ));
        }

        let mut state = self.lock();
        let upload = upload_for(&mut state, "put_part", key, upload_id)?;
        let part = StoredPart {
            part_number,
            etag: etag.clone(),
            size: content.len() as u64,
        };
        upload.parts.insert(part_number, (part, content));
        state.stats.parts_put += 1;
        Ok(etag)
    }

    async fn list_parts(&self, key: &str, upload_id: &str) -> UploadResult<Vec<StoredPart>> {
        let mut state = self.lock();
        let upload = upload_for(&mut state, "list_parts", key, upload_id)?;
        Ok(upload.parts.values().map(|(part, _)| part.clone()).collect())
    }

    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[StoredPart],
        final_fingerprint: &str,
    ) -> UploadResult<()> {
        validate_part_list(key, upload_id, parts)?;

        let mut state = self.lock();
        let upload = upload_for(&mut state, "complete_multipart", key, upload_id)?;
        let total: u64 = parts.iter().map(|p| p.size).sum();
        let mut merged = BytesMut::with_capacity(usize::try_from(total).unwrap_or(0));
        for wanted in parts {
            let (stored, data) = upload.parts.get(&wanted.part_number).ok_or_else(|| {
                UploadError::storage(
                    "complete_multipart",
                    key,
                    format!("part {} was never uploaded", wanted.part_number),
                )
            })?;
            if stored.etag != wanted.etag {
                return Err(UploadError::storage(
                    "complete_multipart",
                    key,
                    format!("etag mismatch on part {}", wanted.part_number),
                ));
            }
            merged.extend_from_slice(data);
        }

        let content_type = upload.content_type.clone();
        state.uploads.remove(upload_id);
        state.stats.multipart_completions += 1;
        let data = merged.freeze();
        state.objects.insert(
            key.to_string(),
            StoredObject {
                info: ObjectInfo {
                    size: data.len() as u64,
                    content_type,
                    last_modified: Utc::now(),
                    fingerprint: Some(final_fingerprint.to_string()),
                },
                data,
            },
        );
        Ok(())
    }

    async fn get_object(&self, key: &str) -> UploadResult<ObjectReader> {
        let data = self.object_data(key)?;
        Ok(Box::pin(Cursor::new(data)))
    }

    async fn get_object_range(&self, key: &str, range: ByteRange) -> UploadResult<ObjectReader> {
        let data = self.object_data(key)?;
        let range = range.resolve(data.len() as u64)?;
        let slice = data.slice(range.start as usize..=range.end as usize);
        Ok(Box::pin(Cursor::new(slice)))
    }

    async fn stat_object(&self, key: &str) -> UploadResult<ObjectInfo> {
        self.lock()
            .objects
            .get(key)
            .map(|obj| obj.info.clone())
            .ok_or_else(|| UploadError::NotFound(key.to_string()))
    }

    async fn presigned_url(
        &self,
        _key: &str,
        _expiry: Duration,
        _params: &[(String, String)],
    ) -> UploadResult<Url> {
        Err(UploadError::Unsupported("presigned_url"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_read_back() {
        let backend = MemoryBackend::new();
        let mut body = Cursor::new(b"0123456789".to_vec());
        backend
            .put_object("ab/cd", &mut body, 10, "text/plain")
            .await
            .unwrap();

        let mut out = String::new();
        backend
            .get_object_range("ab/cd", ByteRange::new(2, 4).unwrap())
            .await
            .unwrap()
            .read_to_string(&mut out)
            .await
            .unwrap();
        assert_eq!(out, "234");
        assert_eq!(backend.stat_object("ab/cd").await.unwrap().content_type, "text/plain");
        assert_eq!(backend.stats().put_objects, 1);
    }

    #[tokio::test]
    async fn put_object_enforces_limit_and_declared_size() {
        let backend = MemoryBackend::new().with_single_put_limit(4);
        let mut body = Cursor::new(b"12345".to_vec());
        assert!(matches!(
            backend.put_object("k", &mut body, 5, "x").await,
            Err(UploadError::Storage { .. })
        ));

        let backend = MemoryBackend::new();
        let mut body = Cursor::new(b"12345".to_vec());
        assert!(backend.put_object("k", &mut body, 3, "x").await.is_err());
        assert_eq!(backend.object_count(), 0);
    }

    #[tokio::test]
    async fn multipart_merges_in_part_order() {
        let backend = MemoryBackend::new();
        let id = backend.init_multipart("ab/cd", "application/zip").await.unwrap();
        for (n, data) in [(2u32, "world"), (1, "hello "), (2, "there")] {
            let body = Bytes::from(data);
            let hash = part_checksum(&body);
            backend.put_part("ab/cd", &id, n, body, &hash).await.unwrap();
        }
        let parts = backend.list_parts("ab/cd", &id).await.unwrap();
        assert_eq!(parts.iter().map(|p| p.part_number).collect::<Vec<_>>(), vec![1, 2]);

        backend
            .complete_multipart("ab/cd", &id, &parts, "fp")
            .await
            .unwrap();
        assert_eq!(backend.object_bytes("ab/cd").unwrap(), Bytes::from("hello there"));
        assert_eq!(
            backend.stat_object("ab/cd").await.unwrap().fingerprint.as_deref(),
            Some("fp")
        );
        assert!(backend.list_parts("ab/cd", &id).await.is_err());
    }

    #[tokio::test]
    async fn put_part_rejects_bad_checksum_and_unknown_upload() {
        let backend = MemoryBackend::new();
        let id = backend.init_multipart("k", "x").await.unwrap();
        let err = backend
            .put_part("k", &id, 1, Bytes::from("abc"), "deadbeef")
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Storage { .. }));

        let body = Bytes::from("abc");
        let hash = part_checksum(&body);
        assert!(backend.put_part("k", "upl_missing", 1, body.clone(), &hash).await.is_err());
        assert!(backend.put_part("other", &id, 1, body, &hash).await.is_err());
    }

    #[tokio::test]
    async fn complete_rejects_missing_or_stale_parts() {
        let backend = MemoryBackend::new();
        let id = backend.init_multipart("k", "x").await.unwrap();
        let body = Bytes::from("abc");
        let hash = part_checksum(&body);
        backend.put_part("k", &id, 1, body, &hash).await.unwrap();

        let missing = vec![StoredPart { part_number: 2, etag: hash.clone(), size: 3 }];
        assert!(matches!(
            backend.complete_multipart("k", &id, &missing, "fp").await,
            Err(UploadError::Storage { .. })
        ));
        let stale = vec![StoredPart { part_number: 1, etag: "old".into(), size: 3 }];
        assert!(backend.complete_multipart("k", &id, &stale, "fp").await.is_err());
        assert!(matches!(
            backend.complete_multipart("k", &id, &[], "fp").await,
            Err(UploadError::IncompleteParts { .. })
        ));
    }

    #[tokio::test]
    async fn complete_refuses_a_gap_in_part_numbers() {
        let backend = MemoryBackend::new();
        let id = backend.init_multipart("k", "x").await.unwrap();
        for n in [1u32, 3] {
            let body = Bytes::from(format!("part {n}"));
            let hash = part_checksum(&body);
            backend.put_part("k", &id, n, body, &hash).await.unwrap();
        }
        let parts = backend.list_parts("k", &id).await.unwrap();
        assert!(matches!(
            backend.complete_multipart("k", &id, &parts, "fp").await,
            Err(UploadError::Storage { .. })
        ));
        assert_eq!(backend.object_count(), 0);
        assert_eq!(backend.list_parts("k", &id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn missing_objects_and_presign_are_reported() {
        let backend = MemoryBackend::new();
        assert!(matches!(backend.get_object("nope").await, Err(UploadError::NotFound(_))));
        assert!(matches!(
            backend.presigned_url("k", Duration::from_secs(60), &[]).await,
            Err(UploadError::Unsupported(_))
        ));
    }
}

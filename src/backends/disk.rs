//! Local-directory backend.
//!
//! Layout beneath `root`:
//! - `<key>`: object payloads, written to a temp file, fsynced, then renamed
//!   into place.
//! - `.meta/<key>.json`: the object's [`ObjectInfo`].
//! - `.multipart/<upload_id>/`: one staging directory per open multipart
//!   session holding `upload.json`, `<n>.part` payloads and `<n>.json` part
//!   records. The directory is removed once the session completes.

use super::{Backend, ObjectReader, new_upload_id, validate_part_list};
use crate::{
    errors::{UploadError, UploadResult},
    hashing::{SeekableReader, part_checksum},
    models::{ByteRange, ObjectInfo, StoredPart},
    signing::UrlSigner,
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    io::{self, ErrorKind, SeekFrom},
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::{
    fs::{self, File},
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
};
use tracing::debug;
use url::Url;
use uuid::Uuid;

const MAX_OBJECT_KEY_LEN: usize = 1024;
const DEFAULT_SINGLE_PUT_LIMIT: u64 = 100 << 20;
const META_DIR: &str = ".meta";
const MULTIPART_DIR: &str = ".multipart";
const UPLOAD_MANIFEST: &str = "upload.json";

/// What a staging directory is for.
#[derive(Serialize, Deserialize, Debug)]
struct UploadManifest {
    key: String,
    content_type: String,
    initiated_at: DateTime<Utc>,
}

/// Backend storing objects as files under a root directory.
#[derive(Clone, Debug)]
pub struct DiskBackend {
    root: PathBuf,
    single_put_limit: u64,
    signer: Option<UrlSigner>,
}

impl DiskBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            single_put_limit: DEFAULT_SINGLE_PUT_LIMIT,
            signer: None,
        }
    }

    pub fn with_single_put_limit(mut self, limit: u64) -> Self {
        self.single_put_limit = limit;
        self
    }

    /// Enable presigned URLs.
    pub fn with_signer(mut self, signer: UrlSigner) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Basic key validation to avoid trivial path traversal vectors.
    ///
    /// Rejects keys that begin with `/`, contain `..`, or have a segment
    /// starting with `.` (those names are reserved for bookkeeping).
    fn ensure_key_safe(&self, key: &str) -> UploadResult<()> {
        let bad = |reason: &str| Err(UploadError::storage("validate_key", key, reason));
        if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
            return bad("key length out of range");
        }
        if key.starts_with('/') || key.contains("..") {
            return bad("key escapes the storage root");
        }
        if key.split('/').any(|seg| seg.is_empty() || seg.starts_with('.')) {
            return bad("key has an empty or reserved segment");
        }
        if key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
        {
            return bad("key contains control characters");
        }
        Ok(())
    }

    fn ensure_upload_id_safe(&self, key: &str, upload_id: &str) -> UploadResult<()> {
        let ok = !upload_id.is_empty()
            && upload_id
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
        if ok {
            Ok(())
        } else {
            Err(UploadError::storage(
                "validate_upload_id",
                key,
                format!("malformed upload id `{}`", upload_id),
            ))
        }
    }

    fn object_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        self.root.join(META_DIR).join(format!("{}.json", key))
    }

    fn staging_dir(&self, upload_id: &str) -> PathBuf {
        self.root.join(MULTIPART_DIR).join(upload_id)
    }

    /// Staging directory for an upload after checking it belongs to `key`.
    async fn open_upload(
        &self,
        op: &'static str,
        key: &str,
        upload_id: &str,
    ) -> UploadResult<(PathBuf, UploadManifest)> {
        self.ensure_key_safe(key)?;
        self.ensure_upload_id_safe(key, upload_id)?;
        let dir = self.staging_dir(upload_id);
        let raw = match fs::read(dir.join(UPLOAD_MANIFEST)).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(UploadError::storage(
                    op,
                    key,
                    format!("no such upload `{}`", upload_id),
                ));
            }
            Err(err) => return Err(err.into()),
        };
        let manifest: UploadManifest = serde_json::from_slice(&raw)
            .map_err(|err| UploadError::storage(op, key, format!("corrupt upload manifest: {}", err)))?;
        if manifest.key != key {
            return Err(UploadError::storage(
                op,
                key,
                format!("upload `{}` belongs to `{}`", upload_id, manifest.key),
            ));
        }
        Ok((dir, manifest))
    }

    async fn write_object_info(&self, key: &str, info: &ObjectInfo) -> UploadResult<()> {
        let body = serde_json::to_vec(&StoredInfo::from(info))
            .map_err(|err| UploadError::storage("write_meta", key, err))?;
        write_atomically(&self.meta_path(key), &body).await
    }

    async fn open_object(&self, key: &str) -> UploadResult<File> {
        self.ensure_key_safe(key)?;
        File::open(self.object_path(key)).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                UploadError::NotFound(key.to_string())
            } else {
                UploadError::Io(err)
            }
        })
    }
}

/// On-disk form of [`ObjectInfo`].
#[derive(Serialize, Deserialize)]
struct StoredInfo {
    size: u64,
    content_type: String,
    last_modified: DateTime<Utc>,
    fingerprint: Option<String>,
}

impl From<&ObjectInfo> for StoredInfo {
    fn from(info: &ObjectInfo) -> Self {
        Self {
            size: info.size,
            content_type: info.content_type.clone(),
            last_modified: info.last_modified,
            fingerprint: info.fingerprint.clone(),
        }
    }
}

impl From<StoredInfo> for ObjectInfo {
    fn from(info: StoredInfo) -> Self {
        Self {
            size: info.size,
            content_type: info.content_type,
            last_modified: info.last_modified,
            fingerprint: info.fingerprint,
        }
    }
}

/// Create a sibling temp file for `path`, creating parent directories.
async fn create_temp_for(path: &Path) -> UploadResult<(PathBuf, File)> {
    let parent = path.parent().map(Path::to_path_buf).ok_or_else(|| {
        UploadError::Io(io::Error::new(
            ErrorKind::Other,
            "object path missing parent directory",
        ))
    })?;
    fs::create_dir_all(&parent).await?;
    let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
    let file = File::create(&tmp_path).await?;
    Ok((tmp_path, file))
}

/// fsync `file` and move it over `dest`, removing the temp file on failure.
async fn commit_temp(tmp_path: &Path, mut file: File, dest: &Path) -> UploadResult<()> {
    let synced = async {
        file.flush().await?;
        file.sync_all().await
    }
    .await;
    if let Err(err) = synced {
        let _ = fs::remove_file(tmp_path).await;
        return Err(UploadError::Io(err));
    }
    drop(file);

    if let Err(err) = fs::rename(tmp_path, dest).await {
        if err.kind() == ErrorKind::AlreadyExists {
            fs::remove_file(dest).await?;
            fs::rename(tmp_path, dest).await?;
        } else {
            let _ = fs::remove_file(tmp_path).await;
            return Err(UploadError::Io(err));
        }
    }
    Ok(())
}

async fn write_atomically(path: &Path, body: &[u8]) -> UploadResult<()> {
    let (tmp_path, mut file) = create_temp_for(path).await?;
    if let Err(err) = file.write_all(body).await {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(UploadError::Io(err));
    }
    commit_temp(&tmp_path, file, path).await
}

fn part_data_name(part_number: u32) -> String {
    format!("{:05}.part", part_number)
}

fn part_record_name(part_number: u32) -> String {
    format!("{:05}.json", part_number)
}

#[async_trait]
impl Backend for DiskBackend {
    fn name(&self) -> &'static str {
        "disk"
    }

    fn single_put_limit(&self) -> u64 {
        self.single_put_limit
    }

    /// Stream `reader` to a temp file, then rename it over `key`.
    async fn put_object(
        &self,
        key: &str,
        reader: &mut dyn SeekableReader,
        size: u64,
        content_type: &str,
    ) -> UploadResult<()> {
        self.ensure_key_safe(key)?;
        if size > self.single_put_limit {
            return Err(UploadError::storage(
                "put_object",
                key,
                format!("{} bytes exceeds single put limit {}", size, self.single_put_limit),
            ));
        }

        let file_path = self.object_path(key);
        let (tmp_path, mut file) = create_temp_for(&file_path).await?;
        let written = match tokio::io::copy(reader, &mut file).await {
            Ok(n) => n,
            Err(err) => {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(UploadError::Io(err));
            }
        };
        if written != size {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(UploadError::storage(
                "put_object",
                key,
                format!("declared {} bytes but read {}", size, written),
            ));
        }
        commit_temp(&tmp_path, file, &file_path).await?;

        let info = ObjectInfo {
            size,
            content_type: content_type.to_string(),
            last_modified: Utc::now(),
            fingerprint: None,
        };
        self.write_object_info(key, &info).await?;
        debug!("stored {} ({} bytes) at {}", key, size, file_path.display());
        Ok(())
    }

    async fn init_multipart(&self, key: &str, content_type: &str) -> UploadResult<String> {
        self.ensure_key_safe(key)?;
        let upload_id = new_upload_id();
        let dir = self.staging_dir(&upload_id);
        fs::create_dir_all(&dir).await?;

        let manifest = UploadManifest {
            key: key.to_string(),
            content_type: content_type.to_string(),
            initiated_at: Utc::now(),
        };
        let body = serde_json::to_vec(&manifest)
            .map_err(|err| UploadError::storage("init_multipart", key, err))?;
        write_atomically(&dir.join(UPLOAD_MANIFEST), &body).await?;
        debug!("opened multipart upload {} for {}", upload_id, key);
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
        let (dir, _) = self.open_upload("put_part", key, upload_id).await?;
        let etag = part_checksum(&content);
        if etag != content_hash {
            return Err(UploadError::storage(
                "put_part",
                key,
                format!("content hash mismatch on part {}", part_number),
            ));
        }

        write_atomically(&dir.join(part_data_name(part_number)), &content).await?;
        let record = StoredPart {
            part_number,
            etag: etag.clone(),
            size: content.len() as u64,
        };
        let body = serde_json::to_vec(&record)
            .map_err(|err| UploadError::storage("put_part", key, err))?;
        write_atomically(&dir.join(part_record_name(part_number)), &body).await?;
        Ok(etag)
    }

    async fn list_parts(&self, key: &str, upload_id: &str) -> UploadResult<Vec<StoredPart>> {
        let (dir, _) = self.open_upload("list_parts", key, upload_id).await?;
        let mut parts = Vec::new();
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name == UPLOAD_MANIFEST || !name.ends_with(".json") {
                continue;
            }
            let raw = fs::read(entry.path()).await?;
            let part: StoredPart = serde_json::from_slice(&raw).map_err(|err| {
                UploadError::storage("list_parts", key, format!("corrupt part record {}: {}", name, err))
            })?;
            parts.push(part);
        }
        parts.sort_by_key(|part| part.part_number);
        Ok(parts)
    }

    /// Concatenate the listed parts into `key` and drop the staging directory.
    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[StoredPart],
        final_fingerprint: &str,
    ) -> UploadResult<()> {
        validate_part_list(key, upload_id, parts)?;
        let (dir, manifest) = self.open_upload("complete_multipart", key, upload_id).await?;

        let stored = self.list_parts(key, upload_id).await?;
        for wanted in parts {
            let found = stored.iter().find(|p| p.part_number == wanted.part_number);
            match found {
                None => {
                    return Err(UploadError::storage(
                        "complete_multipart",
                        key,
                        format!("part {} was never uploaded", wanted.part_number),
                    ));
                }
                Some(part) if part.etag != wanted.etag => {
                    return Err(UploadError::storage(
                        "complete_multipart",
                        key,
                        format!("etag mismatch on part {}", wanted.part_number),
                    ));
                }
                Some(_) => {}
            }
        }

        let file_path = self.object_path(key);
        let (tmp_path, mut file) = create_temp_for(&file_path).await?;
        let mut size = 0u64;
        for part in parts {
            let copied = async {
                let mut src = File::open(dir.join(part_data_name(part.part_number))).await?;
                tokio::io::copy(&mut src, &mut file).await
            }
            .await;
            match copied {
                Ok(n) => size += n,
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(UploadError::Io(err));
                }
            }
        }
        commit_temp(&tmp_path, file, &file_path).await?;

        let info = ObjectInfo {
            size,
            content_type: manifest.content_type,
            last_modified: Utc::now(),
            fingerprint: Some(final_fingerprint.to_string()),
        };
        self.write_object_info(key, &info).await?;

        if let Err(err) = fs::remove_dir_all(&dir).await {
            debug!("failed to remove staging dir {}: {}", dir.display(), err);
        }
        debug!(
            "merged {} parts of upload {} into {} ({} bytes)",
            parts.len(),
            upload_id,
            key,
            size
        );
        Ok(())
    }

    async fn get_object(&self, key: &str) -> UploadResult<ObjectReader> {
        let file = self.open_object(key).await?;
        Ok(Box::pin(file))
    }

    async fn get_object_range(&self, key: &str, range: ByteRange) -> UploadResult<ObjectReader> {
        let mut file = self.open_object(key).await?;
        let size = file.metadata().await?.len();
        let range = range.resolve(size)?;
        file.seek(SeekFrom::Start(range.start)).await?;
        Ok(Box::pin(file.take(range.len())))
    }

    async fn stat_object(&self, key: &str) -> UploadResult<ObjectInfo> {
        let file = self.open_object(key).await?;
        match fs::read(self.meta_path(key)).await {
            Ok(raw) => {
                let stored: StoredInfo = serde_json::from_slice(&raw)
                    .map_err(|err| UploadError::storage("stat_object", key, err))?;
                Ok(stored.into())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                // payload without sidecar, e.g. copied in by hand
                let meta = file.metadata().await?;
                let last_modified = meta
                    .modified()
                    .map(DateTime::<Utc>::from)
                    .unwrap_or_else(|_| Utc::now());
                Ok(ObjectInfo {
                    size: meta.len(),
                    content_type: "application/octet-stream".to_string(),
                    last_modified,
                    fingerprint: None,
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn presigned_url(
        &self,
        key: &str,
        expiry: Duration,
        params: &[(String, String)],
    ) -> UploadResult<Url> {
        let signer = self
            .signer
            .as_ref()
            .ok_or(UploadError::Unsupported("presigned_url"))?;
        self.ensure_key_safe(key)?;
        let ttl = chrono::Duration::from_std(expiry)
            .map_err(|_| UploadError::storage("presigned_url", key, "expiry out of range"))?;
        Ok(signer.sign(key, ttl, params, Utc::now()))
    }

    /// Write, read back and delete a scratch file under the root.
    async fn health_check(&self) -> UploadResult<()> {
        fs::create_dir_all(&self.root).await?;
        let tmp_path = self.root.join(format!(".readyz-{}", Uuid::new_v4()));
        fs::write(&tmp_path, b"readyz").await?;
        let read = fs::read(&tmp_path).await;
        let _ = fs::remove_file(&tmp_path).await;
        if read? != b"readyz" {
            return Err(UploadError::storage("health_check", tmp_path.display().to_string(), "content mismatch"));
        }
        Ok(())
    }
}

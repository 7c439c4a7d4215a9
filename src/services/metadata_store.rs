//! Persistence of `FileRecord`s keyed by fingerprint.
//!
//! The store is the final arbiter of deduplication: two uploads of the same
//! content may race past `exists`, but `create` only ever keeps the first row.

use crate::{
    errors::{UploadError, UploadResult},
    models::FileRecord,
};
use async_trait::async_trait;
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::{str::FromStr, sync::Arc};
use tracing::{debug, info};

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Whether a record exists for `fingerprint`. No side effects.
    async fn exists(&self, fingerprint: &str) -> UploadResult<bool>;

    /// Fails with [`UploadError::NotFound`] when absent.
    async fn load(&self, fingerprint: &str) -> UploadResult<FileRecord>;

    /// Insert `record` unless its fingerprint is already present, then return
    /// the stored row. Calling twice with the same fingerprint returns equal
    /// records and leaves exactly one row.
    async fn create(&self, record: FileRecord) -> UploadResult<FileRecord>;

    /// Cheap readiness check.
    async fn health_check(&self) -> UploadResult<()> {
        Ok(())
    }
}

/// `MetadataStore` backed by the SQLite `files` table.
#[derive(Clone)]
pub struct SqliteMetadataStore {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,
}

impl SqliteMetadataStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Open a pool for `url`, creating the database file if needed.
    ///
    /// In-memory databases are pinned to a single connection that never
    /// expires, since each SQLite connection would otherwise see its own
    /// empty database.
    pub async fn connect(url: &str, max_connections: u32) -> UploadResult<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = if url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(max_connections)
                .connect_with(options)
                .await?
        };
        Ok(Self::new(Arc::new(pool)))
    }

    /// Apply the embedded schema. Safe to run repeatedly.
    pub async fn migrate(&self) -> UploadResult<()> {
        let statements = SCHEMA
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        info!("Running {} migration statements...", statements.len());
        for stmt in statements {
            debug!("Executing migration SQL: {}", stmt);
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn exists(&self, fingerprint: &str) -> UploadResult<bool> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM files WHERE fingerprint = ?")
            .bind(fingerprint)
            .fetch_one(&*self.db)
            .await?;
        Ok(count > 0)
    }

    async fn load(&self, fingerprint: &str) -> UploadResult<FileRecord> {
        sqlx::query_as::<_, FileRecord>(
            "SELECT fingerprint, format, filename, size, extra, created_at, updated_at
             FROM files WHERE fingerprint = ?",
        )
        .bind(fingerprint)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => UploadError::NotFound(fingerprint.to_string()),
            other => UploadError::Database(other),
        })
    }

    async fn create(&self, record: FileRecord) -> UploadResult<FileRecord> {
        let result = sqlx::query(
            r#"
            INSERT INTO files (
                fingerprint, format, filename, size, extra, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(fingerprint) DO NOTHING
            "#,
        )
        .bind(&record.fingerprint)
        .bind(&record.format)
        .bind(&record.filename)
        .bind(record.size)
        .bind(&record.extra)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&*self.db)
        .await?;

        if result.rows_affected() == 0 {
            debug!("file {} already recorded, keeping existing row", record.fingerprint);
        }
        self.load(&record.fingerprint).await
    }

    async fn health_check(&self) -> UploadResult<()> {
        let one = sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await?;
        if one != 1 {
            return Err(UploadError::storage("health_check", "sqlite", format!("unexpected result: {}", one)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FileHeader;

    async fn store() -> SqliteMetadataStore {
        let store = SqliteMetadataStore::connect("sqlite::memory:", 1).await.unwrap();
        store.migrate().await.unwrap();
        store
    }

    fn record(fp: &str, name: &str) -> FileRecord {
        FileRecord::new(fp, &FileHeader::new(name, 42), "{\"owner\":7}")
    }

    #[tokio::test]
    async fn create_then_load() {
        let store = store().await;
        let fp = "0cc175b9c0f1b6a831c399e269772661";
        assert!(!store.exists(fp).await.unwrap());

        let created = store.create(record(fp, "a.txt")).await.unwrap();
        assert!(store.exists(fp).await.unwrap());
        assert_eq!(store.load(fp).await.unwrap(), created);
        assert_eq!(created.extra, "{\"owner\":7}");
    }

    #[tokio::test]
    async fn create_is_idempotent_and_keeps_first_row() {
        let store = store().await;
        let fp = "92eb5ffee6ae2fec3ad71c777531578f";
        let first = store.create(record(fp, "first.bin")).await.unwrap();
        let second = store.create(record(fp, "second.bin")).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(second.filename, "first.bin");

        let rows = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM files")
            .fetch_one(&*store.db)
            .await
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[tokio::test]
    async fn load_missing_is_not_found() {
        let store = store().await;
        assert!(matches!(
            store.load("ffffffffffffffffffffffffffffffff").await,
            Err(UploadError::NotFound(_))
        ));
        store.migrate().await.unwrap();
        store.health_check().await.unwrap();
    }
}

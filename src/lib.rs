//! Content-addressed upload coordination.
//!
//! Files are identified by the fingerprint of their bytes. Uploading content
//! that is already recorded returns the existing record without touching the
//! storage backend. Large files go through a caller-driven chunked protocol on
//! top of the backend's multipart API.

pub mod backends;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod hashing;
pub mod models;
pub mod naming;
pub mod routes;
pub mod services;
pub mod signing;

pub use backends::{Backend, DiskBackend, MemoryBackend};
pub use config::{AppConfig, UploadLimits};
pub use errors::{AppError, UploadError, UploadResult};
pub use hashing::{ContentHasher, Md5Hasher};
pub use models::{ChunkOutcome, ChunkSession, FileHeader, FileRecord};
pub use naming::{NameMapper, PrefixNameMapper};
pub use services::{
    ChunkedUploadCoordinator, FileService, MetadataStore, SqliteMetadataStore, UploadContext,
    UploadCoordinator,
};
pub use signing::UrlSigner;

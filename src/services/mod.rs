pub mod chunked_upload_service;
pub mod file_service;
pub mod metadata_store;
pub mod upload_service;

pub use chunked_upload_service::ChunkedUploadCoordinator;
pub use file_service::{FileService, RangeRead};
pub use metadata_store::{MetadataStore, SqliteMetadataStore};
pub use upload_service::UploadCoordinator;

use crate::{
    backends::Backend,
    config::UploadLimits,
    hashing::{ContentHasher, Md5Hasher},
    naming::{NameMapper, PrefixNameMapper},
};
use std::sync::Arc;

/// Collaborators shared by every service.
///
/// Backend and metadata store are always supplied by the caller. Hasher, name
/// mapper and limits default to MD5, `<2 hex>/<30 hex>` keys and the standard
/// protocol ceilings.
#[derive(Clone)]
pub struct UploadContext {
    pub hasher: Arc<dyn ContentHasher>,
    pub names: Arc<dyn NameMapper>,
    pub store: Arc<dyn MetadataStore>,
    pub backend: Arc<dyn Backend>,
    pub limits: UploadLimits,
}

impl UploadContext {
    pub fn new(backend: Arc<dyn Backend>, store: Arc<dyn MetadataStore>) -> Self {
        Self {
            hasher: Arc::new(Md5Hasher),
            names: Arc::new(PrefixNameMapper::default()),
            store,
            backend,
            limits: UploadLimits::default(),
        }
    }

    pub fn with_hasher(mut self, hasher: Arc<dyn ContentHasher>) -> Self {
        self.hasher = hasher;
        self
    }

    pub fn with_name_mapper(mut self, names: Arc<dyn NameMapper>) -> Self {
        self.names = names;
        self
    }

    pub fn with_limits(mut self, limits: UploadLimits) -> Self {
        self.limits = limits;
        self
    }
}

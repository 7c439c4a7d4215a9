pub mod chunk_handlers;
pub mod file_handlers;
pub mod health_handlers;
pub mod object_handlers;

use crate::{
    services::{ChunkedUploadCoordinator, FileService, UploadContext, UploadCoordinator},
    signing::UrlSigner,
};
use std::sync::Arc;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub uploads: Arc<UploadCoordinator>,
    pub chunks: Arc<ChunkedUploadCoordinator>,
    pub files: Arc<FileService>,
    /// Present when presigned links are served by this process.
    pub signer: Option<Arc<UrlSigner>>,
}

impl AppState {
    pub fn new(ctx: UploadContext, signer: Option<UrlSigner>) -> Self {
        Self {
            uploads: Arc::new(UploadCoordinator::new(ctx.clone())),
            chunks: Arc::new(ChunkedUploadCoordinator::new(ctx.clone())),
            files: Arc::new(FileService::new(ctx)),
            signer: signer.map(Arc::new),
        }
    }

    pub fn context(&self) -> &UploadContext {
        self.files.context()
    }
}

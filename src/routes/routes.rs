//! Defines the HTTP surface of the upload service.
//!
//! ## Structure
//! - **Health**
//!   - `GET  /healthz` — liveness
//!   - `GET  /readyz` — metadata store and backend readiness
//!
//! - **Uploads**
//!   - `POST /files` — single-shot upload of the request body
//!   - `PUT  /chunks` — one chunk of a multipart upload
//!
//! - **Reads**
//!   - `GET  /files/{fingerprint}` — stored record
//!   - `GET  /files/{fingerprint}/content` — object bytes, `Range` aware
//!   - `GET  /files/{fingerprint}/url` — presigned link
//!   - `GET  /objects/{*key}` — target of presigned links

use crate::handlers::{
    AppState,
    chunk_handlers::upload_chunk,
    file_handlers::{get_file, get_file_content, presign_file, upload_file},
    health_handlers::{healthz, readyz},
    object_handlers::get_signed_object,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post, put},
};

/// Build the router; `body_limit` caps buffered request bodies.
pub fn routes(body_limit: usize) -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/files", post(upload_file))
        .route("/chunks", put(upload_chunk))
        .route("/files/{fingerprint}", get(get_file))
        .route("/files/{fingerprint}/content", get(get_file_content))
        .route("/files/{fingerprint}/url", get(presign_file))
        .route("/objects/{*key}", get(get_signed_object))
        .layer(DefaultBodyLimit::max(body_limit))
}

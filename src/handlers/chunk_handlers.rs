//! HTTP front for the chunked upload protocol.
//!
//! The session travels in the query string and the chunk in the body:
//!
//! `PUT /chunks?origin_fingerprint=..&origin_filename=..&origin_size=..&chunk_number=..`
//! with optional `upload_id`, `chunk_count`, `is_last_chunk` and `extra`.
//!
//! Every response that follows a successful multipart open carries the
//! session's upload id, including error responses, so clients can retry.

use super::AppState;
use crate::{
    errors::AppError,
    models::{ChunkOutcome, ChunkSession, FileRecord, StoredPart},
};
use axum::{
    Json,
    body::Body,
    extract::{Query, State},
    http::{HeaderMap, HeaderValue, header},
    response::{IntoResponse, Response},
};
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use std::io;
use tokio_util::io::StreamReader;

pub const UPLOAD_ID_HEADER: &str = "x-upload-id";

#[derive(Debug, Deserialize)]
pub struct ChunkQuery {
    pub origin_fingerprint: String,
    pub origin_filename: String,
    pub origin_size: u64,
    pub upload_id: Option<String>,
    pub chunk_number: u32,
    pub chunk_count: Option<u32>,
    pub is_last_chunk: Option<bool>,
    pub extra: Option<String>,
}

impl ChunkQuery {
    fn into_session(self, content_type: Option<String>) -> (ChunkSession, String) {
        let session = ChunkSession {
            origin_fingerprint: self.origin_fingerprint,
            origin_filename: self.origin_filename,
            origin_size: self.origin_size,
            upload_id: self.upload_id.unwrap_or_default(),
            chunk_number: self.chunk_number,
            chunk_count: self.chunk_count.unwrap_or_default(),
            is_last_chunk: self.is_last_chunk.unwrap_or_default(),
            content_type,
        };
        (session, self.extra.unwrap_or_default())
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ChunkResponse {
    Pending { upload_id: String, part: StoredPart },
    Completed { file: FileRecord },
    Duplicate { file: FileRecord },
}

impl From<ChunkOutcome> for ChunkResponse {
    fn from(outcome: ChunkOutcome) -> Self {
        match outcome {
            ChunkOutcome::Pending { upload_id, part } => Self::Pending { upload_id, part },
            ChunkOutcome::Completed(file) => Self::Completed { file },
            ChunkOutcome::Duplicate(file) => Self::Duplicate { file },
        }
    }
}

/// PUT `/chunks` — upload one chunk of a file.
pub async fn upload_chunk(
    State(state): State<AppState>,
    Query(q): Query<ChunkQuery>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());
    let (mut session, extra) = q.into_session(content_type);

    let stream = body.into_data_stream().map_err(io::Error::other);
    let mut reader = StreamReader::new(stream);

    let result = state
        .chunks
        .upload_chunk(&mut session, &mut reader, &extra)
        .await;

    let mut response = match result {
        Ok(outcome) => Json(ChunkResponse::from(outcome)).into_response(),
        Err(err) => AppError::from(err).into_response(),
    };
    if session.is_started() {
        if let Ok(value) = HeaderValue::from_str(&session.upload_id) {
            response.headers_mut().insert(UPLOAD_ID_HEADER, value);
        }
    }
    response
}

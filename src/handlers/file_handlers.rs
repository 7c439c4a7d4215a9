//! HTTP handlers for whole-file uploads and reads keyed by fingerprint.

use super::{AppState, object_handlers::object_response};
use crate::{errors::AppError, models::FileHeader};
use axum::{
    Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::{collections::BTreeMap, io::Cursor, time::Duration};

pub const FILENAME_HEADER: &str = "x-filename";
pub const EXTRA_HEADER: &str = "x-file-extra";

const DEFAULT_URL_TTL_SECS: u64 = 3600;
const MAX_URL_TTL_SECS: u64 = 7 * 24 * 3600;

#[derive(Debug, Serialize)]
pub struct PresignResponse {
    pub url: String,
    pub expires_in: u64,
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// POST `/files` — single-shot upload of the request body.
///
/// The filename comes from `x-filename`, opaque metadata from `x-file-extra`.
/// Re-uploading known content returns the existing record.
pub async fn upload_file(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let filename = header_str(&headers, FILENAME_HEADER)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| AppError::bad_request(format!("missing {} header", FILENAME_HEADER)))?;
    let extra = header_str(&headers, EXTRA_HEADER).unwrap_or_default();

    let mut file_header = FileHeader::new(filename, body.len() as u64);
    if let Some(content_type) = header_str(&headers, header::CONTENT_TYPE.as_str()) {
        file_header = file_header.with_content_type(content_type);
    }

    let mut reader = Cursor::new(body);
    let record = state
        .uploads
        .upload(&file_header, &mut reader, extra)
        .await?;
    Ok((StatusCode::OK, Json(record)))
}

/// GET `/files/{fingerprint}` — the stored record.
pub async fn get_file(
    State(state): State<AppState>,
    Path(fingerprint): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let record = state.files.load(&fingerprint).await?;
    Ok(Json(record))
}

/// GET `/files/{fingerprint}/content` — object bytes; honours a single `Range`.
pub async fn get_file_content(
    State(state): State<AppState>,
    Path(fingerprint): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    if let Some(range) = header_str(&headers, header::RANGE.as_str()) {
        let mut read = state.files.read_range(&fingerprint, range).await?;
        read.info.fingerprint.get_or_insert(fingerprint);
        let content_range = format!("bytes {}/{}", read.range, read.info.size);
        let mut response = object_response(
            StatusCode::PARTIAL_CONTENT,
            &read.info,
            read.range.len(),
            read.reader,
        );
        if let Ok(value) = content_range.parse() {
            response.headers_mut().insert(header::CONTENT_RANGE, value);
        }
        return Ok(response);
    }

    let (mut info, reader) = state.files.read_file(&fingerprint).await?;
    info.fingerprint.get_or_insert(fingerprint);
    Ok(object_response(StatusCode::OK, &info, info.size, reader))
}

/// GET `/files/{fingerprint}/url?expires_in=<secs>` — presigned download link.
///
/// Every other query parameter is passed through to the link.
pub async fn presign_file(
    State(state): State<AppState>,
    Path(fingerprint): Path<String>,
    Query(mut query): Query<BTreeMap<String, String>>,
) -> Result<impl IntoResponse, AppError> {
    let expires_in = match query.remove("expires_in") {
        Some(raw) => raw
            .parse::<u64>()
            .map_err(|_| AppError::bad_request(format!("invalid expires_in: {}", raw)))?,
        None => DEFAULT_URL_TTL_SECS,
    };
    if expires_in == 0 || expires_in > MAX_URL_TTL_SECS {
        return Err(AppError::bad_request(format!(
            "expires_in must be between 1 and {} seconds",
            MAX_URL_TTL_SECS
        )));
    }

    let params = query.into_iter().collect::<Vec<_>>();
    let url = state
        .files
        .presigned_url(&fingerprint, Duration::from_secs(expires_in), &params)
        .await?;
    Ok(Json(PresignResponse {
        url: url.to_string(),
        expires_in,
    }))
}

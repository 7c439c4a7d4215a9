//! Serving raw objects by storage key, for presigned links.
//! Bodies are streamed from the backend rather than buffered.

use super::AppState;
use crate::{
    backends::ObjectReader,
    errors::{AppError, UploadError},
    models::ObjectInfo,
};
use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::Response,
};
use chrono::Utc;
use tokio_util::io::ReaderStream;
use tracing::debug;

fn query_value<'a>(query: &'a [(String, String)], name: &str) -> Option<&'a str> {
    query
        .iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.as_str())
}

/// GET `/objects/{*key}?expires=&signature=` — download through a presigned link.
///
/// Any other query parameters must be exactly the ones the link was signed with.
pub async fn get_signed_object(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<Vec<(String, String)>>,
) -> Result<Response, AppError> {
    let Some(signer) = state.signer.as_ref() else {
        return Err(UploadError::NotFound(key).into());
    };
    let expires = query_value(&query, "expires")
        .and_then(|v| v.parse::<i64>().ok())
        .ok_or_else(|| AppError::bad_request("missing or invalid expires"))?;
    let signature = query_value(&query, "signature")
        .ok_or_else(|| AppError::bad_request("missing signature"))?;
    if !signer.verify(&key, expires, signature, &query, Utc::now()) {
        debug!("rejected presigned request for {}", key);
        return Err(AppError::new(
            StatusCode::FORBIDDEN,
            "invalid or expired signature",
        ));
    }

    let (info, reader) = state.files.read_key(&key).await?;
    Ok(object_response(StatusCode::OK, &info, info.size, reader))
}

/// Build a streaming response for `reader` carrying `len` bytes of the object.
pub(crate) fn object_response(
    status: StatusCode,
    info: &ObjectInfo,
    len: u64,
    reader: ObjectReader,
) -> Response {
    let mut response = Response::new(Body::from_stream(ReaderStream::new(reader)));
    *response.status_mut() = status;
    set_object_headers(response.headers_mut(), info, len);
    response
}

fn set_object_headers(headers: &mut HeaderMap, info: &ObjectInfo, len: u64) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&info.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));

    if let Some(fingerprint) = info.fingerprint.as_ref() {
        let quoted = format!("\"{}\"", fingerprint);
        if let Ok(value) = HeaderValue::from_str(&quoted) {
            headers.insert(header::ETAG, value);
        }
    }

    if let Ok(value) = HeaderValue::from_str(&info.last_modified.to_rfc2822()) {
        headers.insert(header::LAST_MODIFIED, value);
    }
}

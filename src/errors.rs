use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::{fmt, io};
use thiserror::Error;

/// Every failure the upload coordinators, backends and metadata store can surface.
///
/// Variants carry the key or fingerprint involved so callers can log and act
/// without having to thread extra context through.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("hashing failed: {0}")]
    Hash(#[source] io::Error),
    #[error("{what} size {size} exceeds limit {limit}")]
    SizeLimitExceeded {
        what: &'static str,
        size: u64,
        limit: u64,
    },
    #[error("chunk {chunk_number} has invalid size {size}: {reason}")]
    PartSizeInvalid {
        chunk_number: u32,
        size: u64,
        reason: String,
    },
    #[error("chunk number {chunk_number} is outside 1..={max}")]
    PartCountExceeded { chunk_number: u32, max: u32 },
    #[error("chunk {chunk_number} is empty")]
    EmptyChunk { chunk_number: u32 },
    #[error("upload `{upload_id}` for `{key}` has no stored parts")]
    IncompleteParts { key: String, upload_id: String },
    #[error("storage backend failed during {op} on `{key}`: {message}")]
    Storage {
        op: &'static str,
        key: String,
        message: String,
    },
    #[error("`{0}` not found")]
    NotFound(String),
    #[error("operation `{0}` is not supported by this backend")]
    Unsupported(&'static str),
    #[error("invalid fingerprint `{0}`")]
    InvalidFingerprint(String),
    #[error("invalid byte range `{0}`")]
    InvalidRange(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type UploadResult<T> = Result<T, UploadError>;

impl UploadError {
    pub fn storage(op: &'static str, key: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Storage {
            op,
            key: key.into(),
            message: message.to_string(),
        }
    }

    pub fn part_size(chunk_number: u32, size: u64, reason: impl Into<String>) -> Self {
        Self::PartSizeInvalid {
            chunk_number,
            size,
            reason: reason.into(),
        }
    }

    /// True for errors the caller may fix by resending a corrected chunk on the same session.
    pub fn is_chunk_violation(&self) -> bool {
        matches!(
            self,
            Self::PartSizeInvalid { .. } | Self::PartCountExceeded { .. } | Self::EmptyChunk { .. }
        )
    }
}

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<UploadError> for AppError {
    fn from(err: UploadError) -> Self {
        let status = match &err {
            UploadError::NotFound(_) => StatusCode::NOT_FOUND,
            UploadError::SizeLimitExceeded { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            UploadError::PartSizeInvalid { .. }
            | UploadError::PartCountExceeded { .. }
            | UploadError::EmptyChunk { .. }
            | UploadError::InvalidFingerprint(_) => StatusCode::BAD_REQUEST,
            UploadError::InvalidRange(_) => StatusCode::RANGE_NOT_SATISFIABLE,
            UploadError::IncompleteParts { .. } => StatusCode::CONFLICT,
            UploadError::Unsupported(_) => StatusCode::NOT_IMPLEMENTED,
            UploadError::Storage { .. } => StatusCode::BAD_GATEWAY,
            UploadError::Hash(_) | UploadError::Database(_) | UploadError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_server_error() {
            tracing::error!(error = %err, "request failed");
        }
        AppError::new(status, err.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_violations_map_to_bad_request() {
        let err = UploadError::EmptyChunk { chunk_number: 3 };
        assert!(err.is_chunk_violation());
        assert_eq!(AppError::from(err).status, StatusCode::BAD_REQUEST);

        let err = UploadError::IncompleteParts {
            key: "ab/cd".into(),
            upload_id: "u1".into(),
        };
        assert!(!err.is_chunk_violation());
        assert_eq!(AppError::from(err).status, StatusCode::CONFLICT);
    }

    #[test]
    fn not_found_is_distinguished_from_storage_failures() {
        let missing = AppError::from(UploadError::NotFound("ab/cd".into()));
        let failed = AppError::from(UploadError::storage("get_object", "ab/cd", "quota"));
        assert_eq!(missing.status, StatusCode::NOT_FOUND);
        assert_eq!(failed.status, StatusCode::BAD_GATEWAY);
        assert!(failed.message.contains("get_object"));
    }
}

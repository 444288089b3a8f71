use axum::{
    extract::multipart::MultipartError,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use std::error::Error;
use std::fmt;

use crate::{compress::CompressError, pool::PoolError, storage::StorageError, store::StoreError};

/// Errors surfaced by HTTP handlers and middleware.
#[derive(Debug)]
pub enum AppError {
    /// For internal server errors that are not expected to be handled by the client.
    Internal(anyhow::Error),
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    /// The database is temporarily unreachable or saturated.
    ServiceUnavailable(String),
    Database(String),
    InvalidInput(String),
    /// No credentials were presented.
    Unauthorized(String),
    /// Credentials were presented but are wrong.
    Forbidden(String),
    PayloadTooLarge { limit_bytes: u64 },
    RateLimited {
        /// The number of seconds to wait before retrying the request.
        retry_after_seconds: u64,
    },
    IoError(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(e) => write!(f, "Internal error: {}", e),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            AppError::ServiceUnavailable(msg) => write!(f, "Service unavailable: {}", msg),
            AppError::Database(msg) => write!(f, "Database error: {}", msg),
            AppError::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
            AppError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            AppError::Forbidden(msg) => write!(f, "Forbidden: {}", msg),
            AppError::PayloadTooLarge { limit_bytes } => {
                write!(f, "Payload too large. Limit is {} bytes", limit_bytes)
            }
            AppError::RateLimited { retry_after_seconds } => {
                write!(f, "Rate limited. Retry after {} seconds", retry_after_seconds)
            }
            AppError::IoError(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl Error for AppError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            AppError::Internal(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

/// Logs `detail` under a fresh id and hides it from the client.
fn opaque(code: &'static str, message: &str, detail: &dyn fmt::Debug) -> (StatusCode, &'static str, String, Option<Value>) {
    let error_id = uuid::Uuid::new_v4();
    tracing::error!(%error_id, code, "{:?}", detail);
    (StatusCode::INTERNAL_SERVER_ERROR, code, message.to_string(), Some(json!({ "error_id": error_id.to_string() })))
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let retry_after = match &self {
            AppError::RateLimited { retry_after_seconds } => Some(*retry_after_seconds),
            _ => None,
        };

        let (status, error_code, error_message, details) = match self {
            AppError::Internal(e) => opaque("INTERNAL_ERROR", "An internal server error occurred", &e),
            AppError::Database(msg) => opaque("DATABASE_ERROR", "A database error occurred", &msg),
            AppError::IoError(msg) => opaque("IO_ERROR", "An I/O error occurred", &msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg, None),
            AppError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, "INVALID_INPUT", msg, None),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg, None),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg, None),
            AppError::ServiceUnavailable(msg) => {
                tracing::warn!("Service unavailable: {}", msg);
                (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE", msg, None)
            }
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg, None),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg, None),
            AppError::PayloadTooLarge { limit_bytes } => (
                StatusCode::PAYLOAD_TOO_LARGE,
                "PAYLOAD_TOO_LARGE",
                format!("File exceeds the maximum upload size of {} bytes", limit_bytes),
                Some(json!({ "limit_bytes": limit_bytes })),
            ),
            AppError::RateLimited { retry_after_seconds } => (
                StatusCode::TOO_MANY_REQUESTS,
                "RATE_LIMITED",
                format!("Too many requests. Please retry after {} seconds", retry_after_seconds),
                Some(json!({ "retry_after_seconds": retry_after_seconds })),
            ),
        };

        let mut body = json!({
            "error": { "code": error_code, "message": error_message },
            "status": status.as_u16(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });
        if let Some(details) = details {
            body["error"]["details"] = details;
        }

        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            response.headers_mut().insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err)
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(path) => AppError::NotFound(format!("File not found: {}", path)),
            StoreError::Conflict(path) => AppError::Conflict(format!("File already exists: {}", path)),
            StoreError::Invalid(msg) => AppError::InvalidInput(msg),
            StoreError::PoolExhausted(waited) => AppError::ServiceUnavailable(format!(
                "No database connection available after {} ms",
                waited.as_millis()
            )),
            StoreError::StorageUnavailable(msg) => AppError::ServiceUnavailable(msg),
            StoreError::Database(e) => AppError::Database(e.to_string()),
        }
    }
}

impl From<PoolError> for AppError {
    fn from(err: PoolError) -> Self {
        StoreError::from(err).into()
    }
}

impl From<CompressError> for AppError {
    fn from(err: CompressError) -> Self {
        match err {
            CompressError::Unsupported(msg) => AppError::BadRequest(msg),
            CompressError::Image(e) => AppError::BadRequest(format!("Could not process image: {}", e)),
            CompressError::WebP(msg) => AppError::Internal(anyhow::anyhow!(msg)),
            CompressError::Io(e) => e.into(),
            CompressError::Join(e) => AppError::Internal(e.into()),
        }
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::TooLarge { limit } => AppError::PayloadTooLarge { limit_bytes: limit },
            StorageError::InvalidName(name) => AppError::NotFound(format!("File not found: {}", name)),
            StorageError::Body(msg) => AppError::BadRequest(format!("Upload interrupted: {}", msg)),
            StorageError::Io(e) if e.kind() == std::io::ErrorKind::NotFound => {
                AppError::NotFound("File not found in storage".to_string())
            }
            StorageError::Io(e) => e.into(),
        }
    }
}

impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        AppError::BadRequest(format!("Invalid multipart body: {}", err.body_text()))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::IoError(format!("{}: {}", err.kind(), err))
    }
}

/// A type alias for `Result<T, AppError>`, used throughout the application.
pub type AppResult<T> = Result<T, AppError>;

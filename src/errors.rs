use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::{fmt, io};
use thiserror::Error;

/// Errors raised by the object services.
///
/// Not-found, owner mismatch and missing backing files are all reported as
/// `NoAccess` at the HTTP boundary so that responses never reveal whether
/// another owner's record exists.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid content hash: {0}")]
    InvalidHash(String),
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("no access")]
    NoAccess,
    #[error("no backing file available")]
    NoBackingFile,
    #[error("quota exceeded: {usage} bytes requested, {quota} allowed")]
    QuotaExceeded { usage: i64, quota: i64 },
    #[error("{0} timed out")]
    Timeout(&'static str),
    #[error("storage backend: {0}")]
    Backend(String),
    #[error("token signing failed: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

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

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::InvalidHash(_) | ServiceError::Validation(_) => {
                AppError::bad_request(err.to_string())
            }
            ServiceError::NoAccess | ServiceError::NoBackingFile => {
                AppError::new(StatusCode::FORBIDDEN, "no access")
            }
            ServiceError::QuotaExceeded { .. } => {
                AppError::new(StatusCode::PRECONDITION_FAILED, err.to_string())
            }
            ServiceError::Timeout(_) | ServiceError::Backend(_) => {
                tracing::error!("downstream failure: {}", err);
                AppError::new(StatusCode::SERVICE_UNAVAILABLE, err.to_string())
            }
            ServiceError::Signing(_) | ServiceError::Sqlx(_) | ServiceError::Io(_) => {
                tracing::error!("internal failure: {}", err);
                AppError::internal("internal server error")
            }
        }
    }
}

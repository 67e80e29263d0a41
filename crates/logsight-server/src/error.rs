// logsight-server/src/error.rs
//! HTTP error mapping.
//!
//! Handlers never leak raw engine or filesystem messages: every failure
//! maps to a stable error code and a client-safe message, with the
//! underlying detail included only in development builds. The body keeps
//! the legacy `error` field beside `{code, message, details?}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use logsight_core::Error;

/// API error kinds, each with a fixed status code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    BadRequest,
    Validation,
    NotFound,
    Conflict,
    Internal,
    ServiceUnavailable,
    UnknownFormat,
}

impl ErrorCode {
    fn status(self) -> StatusCode {
        match self {
            ErrorCode::BadRequest | ErrorCode::Validation => StatusCode::BAD_REQUEST,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::Conflict => StatusCode::CONFLICT,
            ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::UnknownFormat => StatusCode::UNPROCESSABLE_ENTITY,
        }
    }
}

/// A handler-level error ready for serialization
#[derive(Debug)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    pub details: Option<String>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadRequest, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Validation, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    code: ErrorCode,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<&'a str>,
    /// Legacy field older clients still read
    error: &'a str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let details = if cfg!(debug_assertions) {
            self.details.as_deref()
        } else {
            None
        };
        let body = ErrorBody {
            code: self.code,
            message: &self.message,
            details,
            error: &self.message,
        };
        (self.code.status(), Json(body)).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match &err {
            Error::FileNotFound(_) => ApiError::not_found("file not found"),
            Error::SessionNotFound { id } => {
                ApiError::not_found(format!("session {id} not found"))
            }
            Error::JobNotFound { id } => ApiError::not_found(format!("job {id} not found")),
            Error::SessionNotReady { id, status } => ApiError::new(
                ErrorCode::Conflict,
                format!("session {id} is {status}, not queryable"),
            ),
            Error::DuplicateUpload { id } => {
                ApiError::new(ErrorCode::Conflict, format!("upload {id} already completed"))
            }
            Error::StoreFinalized => {
                ApiError::new(ErrorCode::Conflict, "session already finalized")
            }
            Error::UnknownFormat(_) => {
                ApiError::new(ErrorCode::UnknownFormat, "no parser recognized the file")
            }
            Error::MissingField { field } => {
                ApiError::validation(format!("missing required field: {field}"))
            }
            Error::InvalidData { message } | Error::InvalidChunk { message } => {
                ApiError::bad_request(message.clone())
            }
            Error::Unavailable { message } => {
                ApiError::new(ErrorCode::ServiceUnavailable, message.clone())
            }
            Error::Cancelled => {
                ApiError::new(ErrorCode::ServiceUnavailable, "request cancelled")
            }
            Error::Timeout { seconds } => ApiError::new(
                ErrorCode::ServiceUnavailable,
                format!("timed out after {seconds}s"),
            ),
            other => {
                ApiError::new(ErrorCode::Internal, "internal error")
                    .with_details(other.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ErrorCode::BadRequest.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorCode::NotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(ErrorCode::Conflict.status(), StatusCode::CONFLICT);
        assert_eq!(
            ErrorCode::ServiceUnavailable.status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_domain_error_conversion() {
        let api: ApiError = Error::SessionNotFound { id: "s1".into() }.into();
        assert_eq!(api.code, ErrorCode::NotFound);

        let api: ApiError = Error::UnknownFormat("trace.bin".into()).into();
        assert_eq!(api.code, ErrorCode::UnknownFormat);

        // Engine messages never surface in the client-facing message.
        let api: ApiError = Error::store("duckdb exploded at /private/path").into();
        assert_eq!(api.code, ErrorCode::Internal);
        assert_eq!(api.message, "internal error");
    }
}

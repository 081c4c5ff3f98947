use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// Failures a client can observe from the stream supervisor.
///
/// Transient read failures never appear here: the producer absorbs them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    #[error("source unreachable")]
    SourceUnreachable { detail: String },
    #[error("source ended")]
    SourceEnded { detail: String },
    #[error("stream is not running")]
    StreamNotRunning,
    #[error("timed out waiting for a captured frame")]
    CaptureTimeout,
    #[error("failed to encode frame as jpeg: {0}")]
    EncodeFailure(String),
    #[error("stop the stream before changing its source")]
    SourceLocked,
    #[error("invalid source url: {0}")]
    InvalidSource(String),
}

impl StreamError {
    pub fn source_unreachable(detail: impl Into<String>) -> Self {
        Self::SourceUnreachable {
            detail: detail.into(),
        }
    }

    pub fn source_ended(detail: impl Into<String>) -> Self {
        Self::SourceEnded {
            detail: detail.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::SourceUnreachable { .. } => "source_unreachable",
            Self::SourceEnded { .. } => "source_ended",
            Self::StreamNotRunning => "stream_not_running",
            Self::CaptureTimeout => "capture_timeout",
            Self::EncodeFailure(_) => "encode_failure",
            Self::SourceLocked => "source_locked",
            Self::InvalidSource(_) => "invalid_source",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::StreamNotRunning => StatusCode::SERVICE_UNAVAILABLE,
            Self::SourceLocked => StatusCode::CONFLICT,
            Self::InvalidSource(_) => StatusCode::BAD_REQUEST,
            Self::SourceUnreachable { .. }
            | Self::SourceEnded { .. }
            | Self::CaptureTimeout
            | Self::EncodeFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl AppError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
    }
}

impl From<StreamError> for AppError {
    fn from(value: StreamError) -> Self {
        Self::new(value.status_code(), value.code(), value.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        Self::internal(value.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = json!({ "error": self.message, "code": self.code });
        (self.status, Json(body)).into_response()
    }
}

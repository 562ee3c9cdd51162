//! Error taxonomy for the streaming endpoints and its HTTP mapping.
//!
//! Handlers return `Result<T, StreamError>`; the response body is always
//! `{"error": <message>, "code": <machine code>}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Errors raised while starting, serving, or stopping a session.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Path outside media root: {0}")]
    PathForbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Too many active streams (limit {max})")]
    CapacityExceeded { max: usize },

    /// The transcoder could not be spawned.
    #[error("Failed to start transcoder: {0}")]
    LaunchFailed(String),

    /// The transcoder exited with an error before producing any output.
    #[error("Transcoding failed: {0}")]
    RuntimeFailed(String),

    /// ffprobe could not read the file.
    #[error("Probe failed: {0}")]
    ProbeFailed(String),

    /// A segment did not become ready within the wait bound.
    #[error("Timed out waiting for {0}")]
    DeliveryTimeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StreamError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn http_status(&self) -> StatusCode {
        match self {
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::PathForbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::CapacityExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::LaunchFailed(_) | Self::RuntimeFailed(_) | Self::ProbeFailed(_) | Self::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::DeliveryTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::PathForbidden(_) => "path_forbidden",
            Self::NotFound(_) => "not_found",
            Self::CapacityExceeded { .. } => "capacity_exceeded",
            Self::LaunchFailed(_) => "launch_failed",
            Self::RuntimeFailed(_) => "runtime_failed",
            Self::ProbeFailed(_) => "probe_failed",
            Self::DeliveryTimeout(_) => "delivery_timeout",
            Self::Io(_) => "io_error",
        }
    }
}

impl From<kino_common::Error> for StreamError {
    fn from(e: kino_common::Error) -> Self {
        match e {
            kino_common::Error::NotFound(msg) => Self::NotFound(msg),
            kino_common::Error::Forbidden(msg) => Self::PathForbidden(msg),
            kino_common::Error::InvalidInput(msg) => Self::InvalidInput(msg),
            kino_common::Error::Io(e) => Self::Io(e),
        }
    }
}

impl IntoResponse for StreamError {
    fn into_response(self) -> Response {
        let status = self.http_status();

        match &self {
            Self::CapacityExceeded { max } => {
                tracing::info!(max_sessions = *max, "Rejected stream start at capacity");
            }
            _ if status.is_server_error() => {
                tracing::error!(status = %status, error = %self, "Stream request failed");
            }
            _ => {}
        }

        let body = json!({
            "error": self.to_string(),
            "code": self.code(),
        });

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            StreamError::invalid_input("x").http_status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            StreamError::PathForbidden("x".into()).http_status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            StreamError::CapacityExceeded { max: 2 }.http_status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            StreamError::DeliveryTimeout("segment_3.ts".into()).http_status(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            StreamError::RuntimeFailed("exit 1".into()).http_status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_from_common_error() {
        let err: StreamError = kino_common::Error::forbidden("../etc").into();
        assert!(matches!(err, StreamError::PathForbidden(_)));

        let err: StreamError = kino_common::Error::not_found("a.mkv").into();
        assert!(matches!(err, StreamError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_response_body_shape() {
        let response = StreamError::CapacityExceeded { max: 1 }.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["code"], "capacity_exceeded");
        assert!(body["error"].as_str().unwrap().contains("limit 1"));
    }
}

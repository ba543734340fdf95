//! Error types and handling for the recording proxy.
//!
//! [`AppError`] covers every failure that changes what the caller receives.
//! Each variant carries two texts: the detailed one stored in the recording
//! and the minimal safe one sent to the client.

use crate::core::recording::Provider;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Main error type for the request path.
#[derive(Error, Debug)]
pub enum AppError {
    /// Client provided an unreadable request
    #[error("{0}")]
    BadRequest(String),

    /// Path matches no known provider
    #[error("unknown API endpoint")]
    UnknownEndpoint,

    /// Provider recognized but absent from the upstream configuration
    #[error("provider {0} not configured")]
    ProviderNotConfigured(Provider),

    /// Transport failure talking to the upstream (DNS, connect, timeout)
    #[error("upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),

    /// Generic internal server errors with custom message
    #[error("{0}")]
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::UnknownEndpoint => StatusCode::NOT_FOUND,
            AppError::ProviderNotConfigured(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Upstream(_) => StatusCode::BAD_GATEWAY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Text sent to the client. Upstream failure details are never echoed.
    pub fn client_message(&self) -> String {
        match self {
            AppError::Upstream(_) => "upstream request failed".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = format!("{}\n", self.client_message());
        (
            status,
            [("content-type", "text/plain; charset=utf-8")],
            body,
        )
            .into_response()
    }
}

/// Convenience type alias for Results using [`AppError`].
pub type Result<T> = std::result::Result<T, AppError>;

/// Failures looking up a recording by id or id prefix.
#[derive(Error, Debug)]
pub enum LookupError {
    #[error("no recordings found in {0}")]
    NoRecordings(String),

    #[error("recording not found: {0}")]
    NotFound(String),

    #[error("ambiguous recording ID '{prefix}' matches {} recordings", candidates.len())]
    Ambiguous {
        prefix: String,
        candidates: Vec<String>,
    },

    #[error("failed to list recordings: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[test]
    fn test_error_display() {
        assert_eq!(AppError::UnknownEndpoint.to_string(), "unknown API endpoint");
        assert_eq!(
            AppError::ProviderNotConfigured(Provider::Gemini).to_string(),
            "provider gemini not configured"
        );
        assert_eq!(
            AppError::BadRequest("failed to read request body".to_string()).to_string(),
            "failed to read request body"
        );
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            AppError::BadRequest("x".to_string()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(AppError::UnknownEndpoint.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            AppError::ProviderNotConfigured(Provider::Claude).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            AppError::Internal("boom".to_string()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_into_response_plain_text() {
        let response = AppError::UnknownEndpoint.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"unknown API endpoint\n");
    }

    #[tokio::test]
    async fn test_upstream_error_hides_details() {
        let client = reqwest::Client::new();
        // Port 9 (discard) on localhost is almost never listening
        let err = client
            .get("http://127.0.0.1:9/")
            .send()
            .await
            .expect_err("connection should be refused");
        let app_err = AppError::from(err);

        assert!(app_err.to_string().starts_with("upstream request failed: "));
        assert_eq!(app_err.client_message(), "upstream request failed");
        assert_eq!(app_err.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_lookup_error_display() {
        let err = LookupError::Ambiguous {
            prefix: "ab".to_string(),
            candidates: vec!["abc".to_string(), "abd".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "ambiguous recording ID 'ab' matches 2 recordings"
        );
        assert_eq!(
            LookupError::NotFound("zz".to_string()).to_string(),
            "recording not found: zz"
        );
    }
}

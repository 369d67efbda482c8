//! Error types for the API client.

use reqwest::StatusCode;
use thiserror::Error;

/// Errors that can occur while talking to the InsightOps backend.
#[derive(Debug, Error)]
pub enum ApiError {
    /// HTTP request failed before a response was received.
    #[error("HTTP request failed: {0}")]
    HttpRequest(#[from] reqwest::Error),

    /// HTTP client configuration error.
    #[error("HTTP client error: {0}")]
    HttpClient(String),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Response body could not be decoded.
    #[error("JSON parsing error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// Backend answered with a non-success status.
    #[error("backend returned {status}: {}", message.as_deref().unwrap_or("no message"))]
    Status {
        /// HTTP status code.
        status: StatusCode,
        /// The backend's `message` field, when present.
        message: Option<String>,
    },

    /// A 401 that survived the refresh-and-retry cycle.
    #[error("request unauthorized after token refresh")]
    Unauthorized {
        /// The backend's `message` field, when present.
        message: Option<String>,
    },

    /// The session can no longer be trusted; the user must log in again.
    #[error("session expired, please log in again")]
    ReauthenticationRequired,

    /// Input rejected before any network call.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Session persistence error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ApiError {
    /// HTTP status carried by this error, if it came from a response.
    #[must_use]
    pub const fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Unauthorized { .. } => Some(StatusCode::UNAUTHORIZED),
            _ => None,
        }
    }

    /// The backend's own message, suitable for showing verbatim.
    #[must_use]
    pub fn server_message(&self) -> Option<&str> {
        match self {
            Self::Status { message, .. } | Self::Unauthorized { message } => message.as_deref(),
            _ => None,
        }
    }

    /// Check whether this is a transport-level failure (no response).
    #[must_use]
    pub const fn is_network(&self) -> bool {
        matches!(self, Self::HttpRequest(_) | Self::HttpClient(_))
    }
}

impl From<tokio_rusqlite::Error> for ApiError {
    fn from(err: tokio_rusqlite::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

/// Convenience result alias for client operations.
pub type ApiResult<T> = Result<T, ApiError>;

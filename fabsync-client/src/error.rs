//! Client error types.

use thiserror::Error;

/// Errors that can occur when talking to the fabric controller.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Connection-level failure: DNS, TLS, refused connection, timeout.
    #[error("request to {path} failed: {source}")]
    Transport {
        path: String,
        #[source]
        source: reqwest::Error,
    },

    /// The controller answered with a non-2xx status.
    #[error("controller returned {status} for {path}: {message}")]
    Controller {
        path: String,
        status: u16,
        message: String,
    },

    /// Login was rejected or no token could be obtained.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The response body was not the JSON document we expected.
    #[error("invalid response body for {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

impl ApiError {
    /// True for a controller-side 404, which lifecycle managers treat as
    /// "resource does not exist yet" rather than a failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::Controller { status: 404, .. })
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ApiError>;

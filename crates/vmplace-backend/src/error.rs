//! Error types for the compute backend.

use thiserror::Error;

/// A result type using `BackendError`.
pub type Result<T> = std::result::Result<T, BackendError>;

/// Errors that can occur while talking to a compute backend.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The HTTP request could not be completed.
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    /// The backend answered with a non-success status.
    #[error("backend returned {status}: {message}")]
    Api {
        /// HTTP status code returned by the backend.
        status: u16,
        /// Body or reason phrase returned alongside the status.
        message: String,
    },

    /// The requested node or instance does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The backend returned a payload that could not be decoded.
    #[error("malformed backend response: {0}")]
    Decode(String),

    /// The backend client is misconfigured.
    #[error("configuration error: {0}")]
    Config(String),
}

impl BackendError {
    /// Check if this error is retriable.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::Api { status, .. } => *status >= 500 || *status == 429,
            Self::NotFound(_) | Self::Decode(_) | Self::Config(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_errors_retry_on_server_side_failures() {
        let unavailable = BackendError::Api {
            status: 503,
            message: "proxy loop".to_string(),
        };
        let forbidden = BackendError::Api {
            status: 403,
            message: "permission check failed".to_string(),
        };

        assert!(unavailable.is_retriable());
        assert!(!forbidden.is_retriable());
        assert!(!BackendError::NotFound("pve9".to_string()).is_retriable());
    }
}

//! Remote backend errors

use thiserror::Error;

use super::RemoteRecord;

/// Errors from the remote authority
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    /// The authority already holds a different winning version of the record
    #[error("Conflict with remote {}", .remote.record_id())]
    Conflict { remote: Box<RemoteRecord> },

    #[error("Remote authority unavailable")]
    Unavailable,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl BackendError {
    /// Transport-level failures worth retrying later
    pub fn is_retryable(&self) -> bool {
        match self {
            BackendError::Network(_) => true,
            BackendError::Unavailable => true,
            BackendError::Api { status, .. } => is_retryable_status(*status),
            BackendError::Conflict { .. } => false,
            BackendError::Json(_) => false,
            BackendError::InvalidResponse(_) => false,
        }
    }
}

/// Check if an HTTP status code is retryable
pub(crate) fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500 | 502 | 503 | 504)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_statuses() {
        assert!(is_retryable_status(503));
        assert!(is_retryable_status(429));
        assert!(!is_retryable_status(400));
        assert!(!is_retryable_status(409));
    }

    #[test]
    fn test_error_retryability() {
        assert!(BackendError::Unavailable.is_retryable());
        assert!(
            BackendError::Api {
                status: 502,
                message: String::new()
            }
            .is_retryable()
        );
        assert!(!BackendError::InvalidResponse("x".to_string()).is_retryable());
    }
}

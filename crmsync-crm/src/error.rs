//! Error types for CRM calls.

use std::time::Duration;

use thiserror::Error;

/// Failure of a single CRM API call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// Transient failure: transport error, timeout, HTTP 429 or 5xx.
    #[error("retryable API error: {message}")]
    Retryable {
        status: Option<u16>,
        message: String,
        /// Server-provided `Retry-After` hint.
        retry_after: Option<Duration>,
    },

    /// Non-retryable rejection: validation, permission, malformed payload.
    #[error("API error: {message}")]
    Permanent { status: Option<u16>, message: String },

    /// A retryable failure persisted past the retry budget.
    #[error("gave up after {attempts} attempt(s): {last}")]
    RetriesExhausted { attempts: u32, last: Box<ApiError> },
}

impl ApiError {
    pub fn retryable(message: impl Into<String>) -> Self {
        ApiError::Retryable {
            status: None,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        ApiError::Permanent {
            status: None,
            message: message.into(),
        }
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, detail: &str, retry_after: Option<Duration>) -> Self {
        let message = if detail.is_empty() {
            format!("HTTP {status}")
        } else {
            format!("HTTP {status}: {detail}")
        };
        if status == 429 || status >= 500 {
            ApiError::Retryable {
                status: Some(status),
                message,
                retry_after,
            }
        } else {
            ApiError::Permanent {
                status: Some(status),
                message,
            }
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ApiError::Retryable { .. })
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Retryable { status, .. } | ApiError::Permanent { status, .. } => *status,
            ApiError::RetriesExhausted { last, .. } => last.status(),
        }
    }
}

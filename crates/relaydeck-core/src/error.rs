//! Error taxonomy for the access layer.
//!
//! Every component speaks `ApiError`. The classification helpers here drive
//! both the retry loop (`is_retryable`) and the circuit breaker feedback
//! path (`counts_as_breaker_failure`): a 4xx other than 429 is a caller
//! bug, not backend unhealthiness, and must never trip the breaker.

use std::time::Duration;
use thiserror::Error;

use crate::circuit::CircuitBreakerStatus;

/// A specialized `Result` type for access-layer operations.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// HTTP statuses worth retrying.
pub const RETRYABLE_STATUS: [u16; 5] = [429, 500, 502, 503, 504];

/// Represents errors surfaced by the access layer.
///
/// The type is `Clone` so deduplicated callers can all observe the same
/// eventual error; failure sources are captured as messages rather than
/// boxed causes.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum ApiError {
    /// Connection-level failure (DNS, TCP, TLS, aborted transfer).
    #[error("Transport failure: {0}")]
    Transport(String),

    /// The attempt did not complete within its timeout.
    #[error("Request timed out after {timeout:?} for {operation}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The timeout that was exceeded.
        timeout: Duration,
    },

    /// The backend answered with a non-success HTTP status.
    #[error("HTTP {status}: {message}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Response body or canonical reason, truncated.
        message: String,
    },

    /// The circuit breaker is denying calls; no network attempt was made.
    #[error("Service unavailable: circuit breaker is {}", .0.state)]
    CircuitOpen(CircuitBreakerStatus),

    /// The response body could not be parsed into the expected shape.
    #[error("Invalid response body: {0}")]
    Validation(String),

    /// The caller cancelled the request.
    #[error("Request cancelled by caller")]
    Cancelled,

    /// The gateway was configured with invalid parameters.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl ApiError {
    /// Whether the retry loop may absorb this failure and try again.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout { .. } => true,
            Self::Http { status, .. } => RETRYABLE_STATUS.contains(status),
            _ => false,
        }
    }

    /// Whether this failure is evidence of backend unhealthiness.
    ///
    /// Client errors other than 429 indicate a caller bug and must not
    /// trip the breaker. Cancellation is a caller decision, not a
    /// backend signal.
    pub fn counts_as_breaker_failure(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout { .. } => true,
            Self::Http { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// The HTTP status carried by this error, when there is one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        Self::Validation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http(status: u16) -> ApiError {
        ApiError::Http {
            status,
            message: String::new(),
        }
    }

    #[test]
    fn retryable_statuses_match_the_configured_set() {
        for status in RETRYABLE_STATUS {
            assert!(http(status).is_retryable(), "{status} should retry");
        }
        for status in [400, 401, 403, 404, 409, 422, 501] {
            assert!(!http(status).is_retryable(), "{status} should not retry");
        }
    }

    #[test]
    fn transport_and_timeout_always_retry() {
        assert!(ApiError::Transport("connection refused".into()).is_retryable());
        assert!(
            ApiError::Timeout {
                operation: "GET /agents".into(),
                timeout: Duration::from_secs(15),
            }
            .is_retryable()
        );
    }

    #[test]
    fn client_errors_do_not_count_against_the_breaker() {
        assert!(!http(400).counts_as_breaker_failure());
        assert!(!http(404).counts_as_breaker_failure());
        assert!(http(429).counts_as_breaker_failure());
        assert!(http(500).counts_as_breaker_failure());
        assert!(http(503).counts_as_breaker_failure());
        assert!(!ApiError::Cancelled.counts_as_breaker_failure());
        assert!(!ApiError::Validation("bad json".into()).counts_as_breaker_failure());
        assert!(!ApiError::CircuitOpen(CircuitBreakerStatus::default()).counts_as_breaker_failure());
    }

    #[test]
    fn circuit_open_never_retries_locally() {
        let err = ApiError::CircuitOpen(CircuitBreakerStatus::default());
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("circuit breaker is closed"));
    }

    #[test]
    fn status_extraction() {
        assert_eq!(http(503).status(), Some(503));
        assert_eq!(ApiError::Cancelled.status(), None);
    }
}

//! Huginn error types

use std::time::Duration;

/// Huginn error types.
///
/// Every variant is `Clone`: a single transport outcome is shared by all
/// coalesced subscribers of the same fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HuginnError {
    // Network errors
    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    // Status errors
    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("client error ({status}): {message}")]
    Client { status: u16, message: String },

    // Data errors
    #[error("could not decode response body (status {status}): {message}")]
    Decode { status: u16, message: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    // Configuration errors
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("optimizer has been disposed")]
    Disposed,
}

impl HuginnError {
    /// Whether this error is worth retrying.
    ///
    /// Transport failures, timeouts, rate limits and 5xx responses are
    /// transient. Client errors, decode failures and local errors are not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            HuginnError::Transport(_)
                | HuginnError::Timeout(_)
                | HuginnError::RateLimited { .. }
                | HuginnError::Server { .. }
        )
    }

    /// Server-supplied retry hint, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            HuginnError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// HTTP status carried by the error, if it came from a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            HuginnError::RateLimited { .. } => Some(429),
            HuginnError::Server { status, .. }
            | HuginnError::Client { status, .. }
            | HuginnError::Decode { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Classify a non-success HTTP status into an error.
    ///
    /// `message` is the response body (or a reason phrase) kept intact for
    /// the caller. Returns `None` for 1xx-3xx statuses.
    pub fn from_status(
        status: u16,
        message: impl Into<String>,
        retry_after: Option<Duration>,
    ) -> Option<Self> {
        match status {
            429 => Some(HuginnError::RateLimited { retry_after }),
            400..=499 => Some(HuginnError::Client {
                status,
                message: message.into(),
            }),
            500..=599 => Some(HuginnError::Server {
                status,
                message: message.into(),
            }),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for HuginnError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            HuginnError::Decode {
                status: err.status().map(|s| s.as_u16()).unwrap_or_default(),
                message: err.to_string(),
            }
        } else {
            HuginnError::Transport(err.to_string())
        }
    }
}

/// Result type alias for Huginn operations
pub type Result<T> = std::result::Result<T, HuginnError>;

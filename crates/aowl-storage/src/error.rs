use chrono::{DateTime, Utc};
use thiserror::Error;

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Every HTTP status and transport failure lands in exactly one variant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("authentication failed: token rejected by remote")]
    AuthenticationFailed,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    ConflictError(String),

    #[error("rate limit exceeded{}", reset_suffix(.reset_at))]
    RateLimitExceeded { reset_at: Option<DateTime<Utc>> },

    #[error("access forbidden: {0}")]
    AccessForbidden(String),

    #[error("network error: {0}")]
    NetworkError(String),

    #[error("server error: HTTP {status}")]
    ServerError { status: u16 },

    #[error("unexpected response: HTTP {status}: {message}")]
    UnknownError { status: u16, message: String },
}

impl RemoteError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, RemoteError::ConflictError(_))
    }
}

fn reset_suffix(reset_at: &Option<DateTime<Utc>>) -> String {
    match reset_at {
        Some(at) => format!(" (resets at {})", at.to_rfc3339()),
        None => String::new(),
    }
}

//! Session error types.

use std::time::Duration;

/// Errors from token storage.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Why a refresh attempt did not produce new tokens.
#[derive(Debug, thiserror::Error)]
pub enum RefreshError {
    /// The previous attempt was too recent.
    #[error("refresh throttled, retry in {0:?}")]
    Throttled(Duration),

    #[error("refresh already in flight")]
    InFlight,

    #[error("no refresh token stored")]
    MissingRefreshToken,

    /// The auth endpoint answered with a non-2xx status.
    #[error("refresh rejected ({status}): {body}")]
    Http { status: u16, body: String },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("malformed refresh response: {0}")]
    MalformedResponse(String),

    #[error("storage error: {0}")]
    Storage(#[from] SessionError),

    /// Tokens were removed while the request was in flight.
    #[error("session cleared during refresh")]
    SessionCleared,
}

impl RefreshError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Http { status: 401, .. })
    }

    /// Failures that count toward the circuit breaker. Guard rejections
    /// (throttle, in-flight, no refresh token) never reach the network.
    pub fn counts_as_failure(&self) -> bool {
        matches!(
            self,
            Self::Http { .. } | Self::Network(_) | Self::MalformedResponse(_) | Self::Storage(_)
        )
    }
}

//! Error types for token manager operations

use std::time::Duration;

/// Errors returned by `TokenManager::access_token` and carried in events.
///
/// `Clone` because one refresh outcome fans out to every waiting caller.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("token manager not started")]
    NotStarted,

    #[error("refresh token expired")]
    RefreshTokenExpired,

    #[error("token endpoint transport error: {0}")]
    Transport(String),

    #[error("token endpoint rejected refresh ({status}): {error}")]
    BackendRejected {
        status: u16,
        error: String,
        description: Option<String>,
    },

    #[error("malformed token response: {0}")]
    MalformedResponse(String),

    #[error("timed out after {0:?} waiting for token refresh")]
    Timeout(Duration),

    #[error("invalid client configuration: {0}")]
    Config(String),
}

impl Error {
    /// Whether retrying the same refresh later can succeed.
    ///
    /// Only transport trouble qualifies: a rejected or expired refresh token
    /// stays rejected, and a malformed 200 means we are talking to the wrong
    /// endpoint.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transport(_))
    }

    /// Short label for metrics and logs.
    pub fn label(&self) -> &'static str {
        match self {
            Error::NotStarted => "not_started",
            Error::RefreshTokenExpired => "refresh_token_expired",
            Error::Transport(_) => "transport",
            Error::BackendRejected { .. } => "backend_rejected",
            Error::MalformedResponse(_) => "malformed_response",
            Error::Timeout(_) => "timeout",
            Error::Config(_) => "config",
        }
    }
}

impl From<tidepool_auth::Error> for Error {
    fn from(err: tidepool_auth::Error) -> Self {
        match err {
            tidepool_auth::Error::Transport(msg) => Error::Transport(msg),
            tidepool_auth::Error::BackendRejected {
                status,
                error,
                description,
            } => Error::BackendRejected {
                status,
                error,
                description,
            },
            tidepool_auth::Error::MalformedResponse(msg) => Error::MalformedResponse(msg),
            tidepool_auth::Error::InvalidConfig(msg) => Error::Config(msg),
        }
    }
}

/// Result alias for token manager operations.
pub type Result<T> = std::result::Result<T, Error>;

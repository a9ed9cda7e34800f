//! Session header injection for Tidepool API requests
//!
//! Request invokers hold an `Arc<dyn SessionAuth>` and call
//! `prepare_request` once per dispatch attempt. `ManagedSession` pulls the
//! token from a running `TokenManager`; `StaticSession` injects a fixed one.

pub mod managed;
pub mod static_token;

pub use managed::ManagedSession;
pub use static_token::StaticSession;

use std::future::Future;
use std::pin::Pin;

use reqwest::header::HeaderName;

/// Header carrying the access token on Tidepool API requests.
pub const SESSION_TOKEN_HEADER: HeaderName = HeaderName::from_static("x-tidepool-session-token");

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// No token manager session is running.
    #[error("session not started")]
    NotStarted,

    /// A token could not be obtained right now (refresh failed, timed out,
    /// or the refresh token expired).
    #[error("session token unavailable: {0}")]
    Unavailable(String),

    #[error("internal session error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, SessionError>;

impl From<tidepool_token::Error> for SessionError {
    fn from(e: tidepool_token::Error) -> Self {
        use tidepool_token::Error;
        match e {
            Error::NotStarted => SessionError::NotStarted,
            Error::Config(msg) => SessionError::Internal(msg),
            other => SessionError::Unavailable(other.to_string()),
        }
    }
}

/// Attaches session credentials to outgoing requests.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility (`Arc<dyn SessionAuth>`).
pub trait SessionAuth: Send + Sync {
    /// Identifier for logging (e.g. "managed", "static")
    fn id(&self) -> &str;

    /// Insert session headers into `headers`, fetching a token at most once.
    fn prepare_request<'a>(
        &'a self,
        headers: &'a mut reqwest::header::HeaderMap,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn maps_manager_errors() {
        assert_eq!(
            SessionError::from(tidepool_token::Error::NotStarted),
            SessionError::NotStarted
        );
        assert!(matches!(
            SessionError::from(tidepool_token::Error::Timeout(Duration::from_secs(30))),
            SessionError::Unavailable(msg) if msg.contains("30")
        ));
        assert!(matches!(
            SessionError::from(tidepool_token::Error::RefreshTokenExpired),
            SessionError::Unavailable(_)
        ));
        assert_eq!(
            SessionError::from(tidepool_token::Error::Config("bad endpoint".into())),
            SessionError::Internal("bad endpoint".into())
        );
    }

    #[test]
    fn header_name_is_lowercase_wire_form() {
        assert_eq!(SESSION_TOKEN_HEADER.as_str(), "x-tidepool-session-token");
    }
}

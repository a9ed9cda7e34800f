//! Fixed-token session for scripts and tests.
//!
//! Injects a token obtained elsewhere. Unlike `ManagedSession`, a caller
//! that already set `Authorization` keeps it; only the Tidepool session
//! header is written then.

use std::future::Future;
use std::pin::Pin;

use common::Secret;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use tracing::warn;

use crate::{Result, SESSION_TOKEN_HEADER, SessionAuth, SessionError};

pub struct StaticSession {
    token: Secret<String>,
}

impl StaticSession {
    pub fn new(token: impl Into<Secret<String>>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl SessionAuth for StaticSession {
    fn id(&self) -> &str {
        "static"
    }

    fn prepare_request<'a>(
        &'a self,
        headers: &'a mut HeaderMap,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            if self.token.is_empty() {
                return Err(SessionError::Unavailable("static session token is empty".into()));
            }
            let token = self.token.expose();

            let mut session = HeaderValue::from_str(token)
                .map_err(|e| SessionError::Internal(format!("invalid session token: {e}")))?;
            session.set_sensitive(true);
            headers.insert(SESSION_TOKEN_HEADER, session);

            if headers.contains_key(AUTHORIZATION) {
                warn!("refusing to overwrite caller authorization header");
                return Ok(());
            }
            let mut bearer = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| SessionError::Internal(format!("invalid session token: {e}")))?;
            bearer.set_sensitive(true);
            headers.insert(AUTHORIZATION, bearer);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn injects_session_and_bearer() {
        let session = StaticSession::new("fixed-token");
        let mut headers = HeaderMap::new();
        session.prepare_request(&mut headers).await.unwrap();

        assert_eq!(headers.get("x-tidepool-session-token").unwrap(), "fixed-token");
        assert_eq!(headers.get("authorization").unwrap(), "Bearer fixed-token");
    }

    #[tokio::test]
    async fn protects_caller_authorization_header() {
        let session = StaticSession::new("fixed-token");
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic dXNlcjpwYXNz"));
        session.prepare_request(&mut headers).await.unwrap();

        assert_eq!(headers.get("authorization").unwrap(), "Basic dXNlcjpwYXNz");
        assert_eq!(headers.get("x-tidepool-session-token").unwrap(), "fixed-token");
    }

    #[tokio::test]
    async fn replaces_existing_session_header() {
        let session = StaticSession::new("fixed-token");
        let mut headers = HeaderMap::new();
        headers.insert(SESSION_TOKEN_HEADER, HeaderValue::from_static("old"));
        session.prepare_request(&mut headers).await.unwrap();

        assert_eq!(headers.get("x-tidepool-session-token").unwrap(), "fixed-token");
    }

    #[tokio::test]
    async fn rejects_token_with_control_characters() {
        let session = StaticSession::new("bad\ntoken");
        let mut headers = HeaderMap::new();
        let err = session.prepare_request(&mut headers).await.unwrap_err();

        assert!(matches!(err, SessionError::Internal(_)));
        assert!(headers.is_empty());
    }

    #[tokio::test]
    async fn empty_token_is_unavailable() {
        let session = StaticSession::new("");
        let mut headers = HeaderMap::new();
        let err = session.prepare_request(&mut headers).await.unwrap_err();
        assert!(matches!(err, SessionError::Unavailable(_)));
    }

    #[test]
    fn id_returns_static() {
        assert_eq!(StaticSession::new("t").id(), "static");
    }
}

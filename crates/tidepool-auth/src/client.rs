//! Token endpoint client
//!
//! `TokenClient` is the seam between the token manager and the network: the
//! manager only ever asks "exchange this grant for a token pair". The reqwest
//! implementation posts to the realm's token endpoint; tests substitute fakes.

use std::future::Future;
use std::pin::Pin;

use reqwest::StatusCode;
use reqwest::header::{ACCEPT, HeaderValue};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::state::TokenState;
use crate::token::{ErrorResponse, Grant, TokenResponse};

/// Performs one token-endpoint exchange.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility (`Arc<dyn TokenClient>`).
pub trait TokenClient: Send + Sync {
    fn exchange<'a>(
        &'a self,
        config: &'a ClientConfig,
        grant: &'a Grant,
    ) -> Pin<Box<dyn Future<Output = Result<TokenState>> + Send + 'a>>;
}

/// `TokenClient` backed by a shared `reqwest::Client`.
///
/// Timeouts are whatever the supplied client was built with.
#[derive(Debug, Clone)]
pub struct HttpTokenClient {
    http: reqwest::Client,
}

impl HttpTokenClient {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    async fn post(&self, config: &ClientConfig, grant: &Grant) -> Result<TokenState> {
        debug!(
            grant_type = grant.grant_type(),
            endpoint = config.token_endpoint(),
            environment = %config.environment(),
            "requesting token"
        );

        let response = self
            .http
            .post(config.token_endpoint())
            .header(ACCEPT, HeaderValue::from_static("application/json"))
            .form(&grant.form_params(config))
            .send()
            .await
            .map_err(|e| Error::Transport(format!("token request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::Transport(format!("reading token response: {e}")))?;

        interpret_response(status, &body, Instant::now())
    }
}

impl TokenClient for HttpTokenClient {
    fn exchange<'a>(
        &'a self,
        config: &'a ClientConfig,
        grant: &'a Grant,
    ) -> Pin<Box<dyn Future<Output = Result<TokenState>> + Send + 'a>> {
        Box::pin(self.post(config, grant))
    }
}

/// Map a token endpoint response onto a `TokenState` or a classified error.
///
/// 2xx must decode as a `TokenResponse`. 4xx carries the backend's
/// `error`/`error_description`; bodies that are not JSON are kept verbatim as
/// the error code. Anything else (5xx, 3xx) is treated as transport trouble,
/// since the request never reached a realm that could judge it.
pub fn interpret_response(status: StatusCode, body: &str, received_at: Instant) -> Result<TokenState> {
    if status.is_success() {
        let response: TokenResponse = serde_json::from_str(body)
            .map_err(|e| Error::MalformedResponse(format!("invalid token response: {e}")))?;
        return TokenState::from_response(response, received_at);
    }

    if status.is_client_error() {
        let (error, description) = match serde_json::from_str::<ErrorResponse>(body) {
            Ok(parsed) => (parsed.error, parsed.error_description),
            Err(_) => {
                let raw = body.trim();
                let error = if raw.is_empty() {
                    status.canonical_reason().unwrap_or("unknown").to_string()
                } else {
                    raw.to_string()
                };
                (error, None)
            }
        };
        warn!(status = status.as_u16(), error = %error, "token endpoint rejected request");
        return Err(Error::BackendRejected {
            status: status.as_u16(),
            error,
            description,
        });
    }

    Err(Error::Transport(format!(
        "token endpoint returned {status}: {}",
        body.trim()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn success_builds_state() {
        let now = Instant::now();
        let body = r#"{"access_token":"a1","expires_in":10,"refresh_token":"rt2","refresh_expires_in":100}"#;
        let state = interpret_response(StatusCode::OK, body, now).unwrap();
        assert_eq!(state.access_token().expose(), "a1");
        assert_eq!(state.access_token_expiry(), now + Duration::from_secs(10));
        assert_eq!(state.refresh_token_expiry(), now + Duration::from_secs(100));
    }

    #[tokio::test(start_paused = true)]
    async fn success_with_missing_field_is_malformed() {
        let body = r#"{"access_token":"a1","expires_in":10}"#;
        let err = interpret_response(StatusCode::OK, body, Instant::now()).unwrap_err();
        assert!(matches!(err, Error::MalformedResponse(_)), "got: {err:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn success_with_unrepresentable_lifetime_is_malformed() {
        let body = r#"{"access_token":"a1","expires_in":18446744073709551615,"refresh_token":"rt2","refresh_expires_in":18446744073709551615}"#;
        let err = interpret_response(StatusCode::OK, body, Instant::now()).unwrap_err();
        assert!(matches!(err, Error::MalformedResponse(ref m) if m.contains("out of range")), "got: {err:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn success_with_refresh_shorter_than_access_is_malformed() {
        let body = r#"{"access_token":"a1","expires_in":300,"refresh_token":"rt2","refresh_expires_in":60}"#;
        let err = interpret_response(StatusCode::OK, body, Instant::now()).unwrap_err();
        assert!(matches!(err, Error::MalformedResponse(_)), "got: {err:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn success_with_html_is_malformed() {
        let err = interpret_response(StatusCode::OK, "<html>login</html>", Instant::now())
            .unwrap_err();
        assert!(matches!(err, Error::MalformedResponse(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn client_error_carries_backend_code() {
        let body = r#"{"error":"invalid_grant","error_description":"Token is not active"}"#;
        let err = interpret_response(StatusCode::BAD_REQUEST, body, Instant::now()).unwrap_err();
        match err {
            Error::BackendRejected {
                status,
                error,
                description,
            } => {
                assert_eq!(status, 400);
                assert_eq!(error, "invalid_grant");
                assert_eq!(description.as_deref(), Some("Token is not active"));
            }
            other => panic!("expected BackendRejected, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn client_error_with_plain_body() {
        let err = interpret_response(StatusCode::UNAUTHORIZED, "", Instant::now()).unwrap_err();
        match err {
            Error::BackendRejected { status, error, .. } => {
                assert_eq!(status, 401);
                assert_eq!(error, "Unauthorized");
            }
            other => panic!("expected BackendRejected, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn server_error_is_transport() {
        let err = interpret_response(StatusCode::BAD_GATEWAY, "upstream down", Instant::now())
            .unwrap_err();
        assert!(matches!(err, Error::Transport(ref m) if m.contains("502")), "got: {err:?}");
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_transport() {
        // Port 9 (discard) on loopback is closed in test environments.
        let config = ClientConfig::new(crate::Environment::Dev, "uploader")
            .unwrap()
            .with_token_endpoint("http://127.0.0.1:9/realms/dev1/protocol/openid-connect/token")
            .unwrap();
        let client = HttpTokenClient::new(reqwest::Client::new());
        let err = client
            .exchange(&config, &Grant::refresh("rt"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transport(_)), "got: {err:?}");
    }
}

//! Session backed by a `TokenManager`.

use std::future::Future;
use std::pin::Pin;

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use tidepool_token::TokenManager;
use tracing::debug;

use crate::{Result, SESSION_TOKEN_HEADER, SessionAuth, SessionError};

/// Sets `X-Tidepool-Session-Token` and `Authorization: Bearer` from the
/// manager's current access token.
#[derive(Clone)]
pub struct ManagedSession {
    manager: TokenManager,
}

impl ManagedSession {
    pub fn new(manager: TokenManager) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &TokenManager {
        &self.manager
    }
}

fn sensitive_value(value: &str) -> Result<HeaderValue> {
    let mut value = HeaderValue::from_str(value).map_err(|e| {
        SessionError::Internal(format!("access token is not a valid header value: {e}"))
    })?;
    value.set_sensitive(true);
    Ok(value)
}

impl SessionAuth for ManagedSession {
    fn id(&self) -> &str {
        "managed"
    }

    fn prepare_request<'a>(
        &'a self,
        headers: &'a mut HeaderMap,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let token = self.manager.access_token().await.inspect_err(|e| {
                debug!(error = %e, "no access token for request");
            })?;

            headers.insert(SESSION_TOKEN_HEADER, sensitive_value(&token)?);
            headers.insert(AUTHORIZATION, sensitive_value(&format!("Bearer {token}"))?);
            Ok(())
        })
    }
}

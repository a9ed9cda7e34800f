//! Token endpoint grants and response decoding
//!
//! Every interaction with the realm's token endpoint is a form-encoded POST
//! carrying `grant_type`, `client_id` and the grant-specific fields. Three
//! grants are supported:
//! 1. `refresh_token` (the manager's background and on-demand refresh)
//! 2. `authorization_code` with a PKCE verifier (initial sign-in)
//! 3. RFC 8693 token exchange (trading an external token for a Tidepool one)

use std::fmt;

use common::Secret;
use serde::{Deserialize, Deserializer};

use crate::config::ClientConfig;

pub const GRANT_REFRESH_TOKEN: &str = "refresh_token";
pub const GRANT_AUTHORIZATION_CODE: &str = "authorization_code";
pub const GRANT_TOKEN_EXCHANGE: &str = "urn:ietf:params:oauth:grant-type:token-exchange";

/// Kind of token presented as `subject_token` in a token exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubjectTokenType {
    AccessToken,
    Jwt,
}

impl SubjectTokenType {
    pub fn urn(self) -> &'static str {
        match self {
            SubjectTokenType::AccessToken => "urn:ietf:params:oauth:token-type:access_token",
            SubjectTokenType::Jwt => "urn:ietf:params:oauth:token-type:jwt",
        }
    }
}

/// Kind of token requested back from a token exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestedTokenType {
    AccessToken,
    RefreshToken,
}

impl RequestedTokenType {
    pub fn urn(self) -> &'static str {
        match self {
            RequestedTokenType::AccessToken => "urn:ietf:params:oauth:token-type:access_token",
            RequestedTokenType::RefreshToken => "urn:ietf:params:oauth:token-type:refresh_token",
        }
    }
}

#[derive(Debug, Clone)]
pub enum Grant {
    RefreshToken {
        refresh_token: Secret<String>,
    },
    AuthorizationCode {
        code: Secret<String>,
        code_verifier: Secret<String>,
        redirect_uri: Option<String>,
    },
    TokenExchange {
        subject_token: Secret<String>,
        subject_token_type: SubjectTokenType,
        requested_token_type: RequestedTokenType,
        subject_issuer: Option<String>,
    },
}

impl Grant {
    pub fn refresh(refresh_token: impl Into<Secret<String>>) -> Self {
        Grant::RefreshToken {
            refresh_token: refresh_token.into(),
        }
    }

    pub fn grant_type(&self) -> &'static str {
        match self {
            Grant::RefreshToken { .. } => GRANT_REFRESH_TOKEN,
            Grant::AuthorizationCode { .. } => GRANT_AUTHORIZATION_CODE,
            Grant::TokenExchange { .. } => GRANT_TOKEN_EXCHANGE,
        }
    }

    /// Form body for the token endpoint, in the order the fields are sent.
    pub fn form_params(&self, config: &ClientConfig) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("grant_type", self.grant_type().to_string()),
            ("client_id", config.client_id().to_string()),
        ];
        if let Some(secret) = config.client_secret() {
            params.push(("client_secret", secret.expose_owned()));
        }
        match self {
            Grant::RefreshToken { refresh_token } => {
                params.push(("refresh_token", refresh_token.expose_owned()));
            }
            Grant::AuthorizationCode {
                code,
                code_verifier,
                redirect_uri,
            } => {
                params.push(("code", code.expose_owned()));
                params.push(("code_verifier", code_verifier.expose_owned()));
                if let Some(uri) = redirect_uri {
                    params.push(("redirect_uri", uri.clone()));
                }
            }
            Grant::TokenExchange {
                subject_token,
                subject_token_type,
                requested_token_type,
                subject_issuer,
            } => {
                params.push(("subject_token", subject_token.expose_owned()));
                params.push(("subject_token_type", subject_token_type.urn().to_string()));
                params.push((
                    "requested_token_type",
                    requested_token_type.urn().to_string(),
                ));
                if let Some(issuer) = subject_issuer {
                    params.push(("subject_issuer", issuer.clone()));
                }
            }
        }
        params
    }
}

/// Successful response from the token endpoint.
///
/// Both lifetimes are deltas in seconds from the response time. Keycloak
/// sends them as integers, some proxies in front of it stringify them, so
/// both encodings are accepted.
#[derive(Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(deserialize_with = "seconds")]
    pub expires_in: u64,
    pub refresh_token: String,
    #[serde(deserialize_with = "seconds")]
    pub refresh_expires_in: u64,
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"[REDACTED]")
            .field("expires_in", &self.expires_in)
            .field("refresh_token", &"[REDACTED]")
            .field("refresh_expires_in", &self.refresh_expires_in)
            .finish()
    }
}

/// Error body returned with 4xx responses.
#[derive(Debug, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
}

fn seconds<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Seconds {
        Number(u64),
        Text(String),
    }

    match Seconds::deserialize(deserializer)? {
        Seconds::Number(n) => Ok(n),
        Seconds::Text(s) => s
            .trim()
            .parse()
            .map_err(|e| serde::de::Error::custom(format!("invalid seconds value {s:?}: {e}"))),
    }
}

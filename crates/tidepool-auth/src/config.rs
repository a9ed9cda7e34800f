//! Client identity and token endpoint selection

use common::Secret;

use crate::environment::Environment;
use crate::error::{Error, Result};

/// Immutable client configuration handed to `TokenManager::start`.
///
/// The token endpoint defaults to the environment's realm endpoint and can be
/// overridden (e.g. to point at a local Keycloak).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    environment: Environment,
    client_id: String,
    client_secret: Option<Secret<String>>,
    token_endpoint: String,
}

impl ClientConfig {
    pub fn new(environment: Environment, client_id: impl Into<String>) -> Result<Self> {
        let client_id = client_id.into();
        if client_id.trim().is_empty() {
            return Err(Error::InvalidConfig("client_id must not be empty".into()));
        }
        Ok(Self {
            environment,
            client_id,
            client_secret: None,
            token_endpoint: environment.token_endpoint(),
        })
    }

    pub fn with_token_endpoint(mut self, endpoint: impl Into<String>) -> Result<Self> {
        let endpoint = endpoint.into();
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            return Err(Error::InvalidConfig(format!(
                "token_endpoint must start with http:// or https://, got: {endpoint}"
            )));
        }
        self.token_endpoint = endpoint;
        Ok(self)
    }

    /// Confidential clients send `client_secret` with every grant.
    pub fn with_client_secret(mut self, secret: impl Into<Secret<String>>) -> Self {
        self.client_secret = Some(secret.into());
        self
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn client_secret(&self) -> Option<&Secret<String>> {
        self.client_secret.as_ref()
    }

    pub fn token_endpoint(&self) -> &str {
        &self.token_endpoint
    }
}

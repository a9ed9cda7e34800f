//! Tidepool backend environments
//!
//! Each environment pins a Keycloak realm, the API server that serves data
//! requests, and the auth server that hosts the realm's token endpoint. The
//! table is fixed; callers pick an environment, they do not assemble URLs.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Path of the OpenID Connect token endpoint under a realm, after the realm id.
const TOKEN_PATH: &str = "protocol/openid-connect/token";

/// Path of the OpenID Connect authorization endpoint under a realm.
const AUTHORIZE_PATH: &str = "protocol/openid-connect/auth";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Qa1,
    Qa2,
    #[serde(alias = "int")]
    Integration,
    #[serde(alias = "prod")]
    Production,
}

impl Environment {
    pub const ALL: [Environment; 5] = [
        Environment::Dev,
        Environment::Qa1,
        Environment::Qa2,
        Environment::Integration,
        Environment::Production,
    ];

    /// Short name used in config files and logs.
    pub fn name(self) -> &'static str {
        match self {
            Environment::Dev => "dev",
            Environment::Qa1 => "qa1",
            Environment::Qa2 => "qa2",
            Environment::Integration => "integration",
            Environment::Production => "production",
        }
    }

    /// Keycloak realm id, as it appears in the token endpoint path.
    pub fn realm(self) -> &'static str {
        match self {
            Environment::Dev => "dev1",
            Environment::Qa1 => "qa1",
            Environment::Qa2 => "qa2",
            Environment::Integration => "integration",
            Environment::Production => "tidepool",
        }
    }

    /// Base URL of the data API for this environment.
    pub fn api_server(self) -> &'static str {
        match self {
            Environment::Dev => "https://dev1.dev.tidepool.org",
            Environment::Qa1 => "https://qa1.development.tidepool.org",
            Environment::Qa2 => "https://qa2.development.tidepool.org",
            Environment::Integration => "https://external.integration.tidepool.org",
            Environment::Production => "https://api.tidepool.org",
        }
    }

    /// Base URL of the auth server hosting this environment's realm.
    pub fn auth_server(self) -> &'static str {
        match self {
            Environment::Dev => "https://auth.dev.tidepool.org",
            Environment::Qa1 => "https://auth.qa1.tidepool.org",
            Environment::Qa2 => "https://auth.qa2.tidepool.org",
            Environment::Integration => "https://auth.external.tidepool.org",
            Environment::Production => "https://auth.tidepool.org",
        }
    }

    /// `{auth}/realms/{realm}/protocol/openid-connect/token`
    pub fn token_endpoint(self) -> String {
        format!(
            "{}/realms/{}/{TOKEN_PATH}",
            self.auth_server(),
            self.realm()
        )
    }

    /// `{auth}/realms/{realm}/protocol/openid-connect/auth`
    pub fn authorize_endpoint(self) -> String {
        format!(
            "{}/realms/{}/{AUTHORIZE_PATH}",
            self.auth_server(),
            self.realm()
        )
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Environment {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "qa1" => Ok(Environment::Qa1),
            "qa2" => Ok(Environment::Qa2),
            "integration" | "int" => Ok(Environment::Integration),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(Error::InvalidConfig(format!(
                "unknown environment {other:?} (expected dev, qa1, qa2, integration or production)"
            ))),
        }
    }
}

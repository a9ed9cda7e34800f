//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The refresh token and client secret are loaded from env vars or files,
//! never stored in the TOML directly to avoid leaking secrets.

use common::Secret;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tidepool_auth::{ClientConfig, Environment};
use tidepool_token::{FailurePolicy, ManagerOptions};

pub const REFRESH_TOKEN_ENV: &str = "TIDEPOOL_REFRESH_TOKEN";
pub const CLIENT_SECRET_ENV: &str = "TIDEPOOL_CLIENT_SECRET";

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub tidepool: TidepoolConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
    pub server: ServerConfig,
}

/// Realm and client identity
#[derive(Debug, Deserialize)]
pub struct TidepoolConfig {
    pub environment: Environment,
    pub client_id: String,
    /// Overrides the environment's token endpoint (local Keycloak, test realms)
    #[serde(default)]
    pub token_endpoint: Option<String>,
    /// File containing the seed refresh token (alternative to TIDEPOOL_REFRESH_TOKEN)
    #[serde(default)]
    pub refresh_token_file: Option<PathBuf>,
    /// File containing the client secret (alternative to TIDEPOOL_CLIENT_SECRET)
    #[serde(default)]
    pub client_secret_file: Option<PathBuf>,
    #[serde(skip)]
    pub refresh_token: Option<Secret<String>>,
    #[serde(skip)]
    pub client_secret: Option<Secret<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    Retry,
    FailClosed,
}

/// Refresh behavior
#[derive(Debug, Deserialize)]
pub struct RefreshConfig {
    #[serde(default = "default_policy")]
    pub policy: PolicyKind,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_secs: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,
    /// How long a `/token` request waits for a refresh
    #[serde(default = "default_wait_timeout")]
    pub wait_timeout_secs: u64,
    /// Timeout for each token endpoint request
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
}

/// Local HTTP surface
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

fn default_policy() -> PolicyKind {
    PolicyKind::Retry
}

/// Upper bound on `max_backoff_secs`: one day.
const MAX_BACKOFF_LIMIT_SECS: u64 = 86_400;

fn default_initial_backoff() -> u64 {
    1
}

fn default_max_backoff() -> u64 {
    60
}

fn default_wait_timeout() -> u64 {
    30
}

fn default_http_timeout() -> u64 {
    10
}

fn default_max_connections() -> usize {
    64
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            policy: default_policy(),
            initial_backoff_secs: default_initial_backoff(),
            max_backoff_secs: default_max_backoff(),
            wait_timeout_secs: default_wait_timeout(),
            http_timeout_secs: default_http_timeout(),
        }
    }
}

impl RefreshConfig {
    pub fn failure_policy(&self) -> FailurePolicy {
        match self.policy {
            PolicyKind::FailClosed => FailurePolicy::FailClosed,
            PolicyKind::Retry => FailurePolicy::Retry {
                initial_backoff: Duration::from_secs(self.initial_backoff_secs),
                max_backoff: Duration::from_secs(self.max_backoff_secs),
            },
        }
    }

    pub fn manager_options(&self) -> ManagerOptions {
        ManagerOptions {
            wait_timeout: Duration::from_secs(self.wait_timeout_secs),
            failure_policy: self.failure_policy(),
            ..Default::default()
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    fn validate(&self) -> common::Result<()> {
        for (name, value) in [
            ("initial_backoff_secs", self.initial_backoff_secs),
            ("max_backoff_secs", self.max_backoff_secs),
            ("wait_timeout_secs", self.wait_timeout_secs),
            ("http_timeout_secs", self.http_timeout_secs),
        ] {
            if value == 0 {
                return Err(common::Error::Config(format!(
                    "{name} must be greater than 0"
                )));
            }
        }
        if self.initial_backoff_secs > self.max_backoff_secs {
            return Err(common::Error::Config(format!(
                "initial_backoff_secs ({}) must not exceed max_backoff_secs ({})",
                self.initial_backoff_secs, self.max_backoff_secs
            )));
        }
        if self.max_backoff_secs > MAX_BACKOFF_LIMIT_SECS {
            return Err(common::Error::Config(format!(
                "max_backoff_secs ({}) must not exceed {MAX_BACKOFF_LIMIT_SECS}",
                self.max_backoff_secs
            )));
        }
        Ok(())
    }
}

impl TidepoolConfig {
    /// Validated client configuration for the token endpoint.
    pub fn client_config(&self) -> common::Result<ClientConfig> {
        let mut client = ClientConfig::new(self.environment, self.client_id.as_str())
            .map_err(|e| common::Error::Config(e.to_string()))?;
        if let Some(endpoint) = &self.token_endpoint {
            client = client
                .with_token_endpoint(endpoint.as_str())
                .map_err(|e| common::Error::Config(e.to_string()))?;
        }
        if let Some(secret) = &self.client_secret {
            client = client.with_client_secret(secret.clone());
        }
        Ok(client)
    }
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Refresh token resolution order:
    /// 1. TIDEPOOL_REFRESH_TOKEN env var
    /// 2. refresh_token_file path from config
    ///
    /// The client secret resolves the same way from TIDEPOOL_CLIENT_SECRET
    /// and client_secret_file; without either the client is public.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        config.refresh.validate()?;

        if config.server.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        let tidepool = &mut config.tidepool;
        tidepool.refresh_token = resolve_secret(
            REFRESH_TOKEN_ENV,
            tidepool.refresh_token_file.as_deref(),
            "refresh_token_file",
        )?;
        if tidepool.refresh_token.is_none() {
            return Err(common::Error::Config(format!(
                "no refresh token: set {REFRESH_TOKEN_ENV} or refresh_token_file"
            )));
        }
        tidepool.client_secret = resolve_secret(
            CLIENT_SECRET_ENV,
            tidepool.client_secret_file.as_deref(),
            "client_secret_file",
        )?;

        // Surface client_id and endpoint problems at load time
        tidepool.client_config()?;

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("tidepool-token-agent.toml")
    }
}

/// Env var first, then file; blank values count as absent.
fn resolve_secret(
    env_var: &str,
    file: Option<&Path>,
    field: &str,
) -> common::Result<Option<Secret<String>>> {
    if let Ok(value) = std::env::var(env_var) {
        let value = value.trim();
        if !value.is_empty() {
            return Ok(Some(Secret::new(value.to_owned())));
        }
    }
    let Some(file) = file else {
        return Ok(None);
    };
    let value = std::fs::read_to_string(file).map_err(|e| {
        common::Error::Config(format!("failed to read {field} {}: {e}", file.display()))
    })?;
    let value = value.trim();
    Ok((!value.is_empty()).then(|| Secret::new(value.to_owned())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Mutex to serialize tests that mutate environment variables, preventing
    /// data races when tests run in parallel.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// SAFETY: Callers must hold ENV_MUTEX to prevent concurrent env mutation.
    unsafe fn set_env(key: &str, val: &str) {
        unsafe { std::env::set_var(key, val) };
    }

    unsafe fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) };
    }

    fn clear_secret_env() {
        unsafe {
            remove_env(REFRESH_TOKEN_ENV);
            remove_env(CLIENT_SECRET_ENV);
        }
    }

    fn valid_toml() -> &'static str {
        r#"
[tidepool]
environment = "qa2"
client_id = "tidepool-uploader"

[server]
listen_addr = "127.0.0.1:8787"
"#
    }

    fn write_config(dir: &tempfile::TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("config.toml");
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn load_valid_config_with_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, valid_toml());
        clear_secret_env();
        unsafe { set_env(REFRESH_TOKEN_ENV, "rt-env") };

        let config = Config::load(&path).unwrap();
        assert_eq!(config.tidepool.environment, Environment::Qa2);
        assert_eq!(config.tidepool.client_id, "tidepool-uploader");
        assert_eq!(config.refresh.policy, PolicyKind::Retry);
        assert_eq!(config.refresh.wait_timeout_secs, 30);
        assert_eq!(config.refresh.http_timeout_secs, 10);
        assert_eq!(config.server.max_connections, 64);
        assert!(config.tidepool.client_secret.is_none());
        assert_eq!(
            config.tidepool.refresh_token.as_ref().unwrap().expose(),
            "rt-env"
        );

        let client = config.tidepool.client_config().unwrap();
        assert_eq!(
            client.token_endpoint(),
            "https://auth.qa2.tidepool.org/realms/qa2/protocol/openid-connect/token"
        );

        clear_secret_env();
    }

    #[test]
    fn load_missing_file() {
        let result = Config::load(Path::new("/nonexistent/path/config.toml"));
        assert!(matches!(result, Err(common::Error::Io(_))));
    }

    #[test]
    fn load_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "not valid {{{{ toml");
        assert!(matches!(Config::load(&path), Err(common::Error::Toml(_))));
    }

    #[test]
    fn unknown_environment_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, &valid_toml().replace("qa2", "staging"));
        assert!(matches!(Config::load(&path), Err(common::Error::Toml(_))));
    }

    #[test]
    fn missing_refresh_token_is_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, valid_toml());
        clear_secret_env();

        let err = Config::load(&path).unwrap_err();
        assert!(err.to_string().contains(REFRESH_TOKEN_ENV), "got: {err}");
    }

    #[test]
    fn refresh_token_from_file() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let token_path = dir.path().join("refresh_token");
        std::fs::write(&token_path, "rt-file\n").unwrap();
        let contents = valid_toml().replace(
            "client_id = \"tidepool-uploader\"",
            &format!(
                "client_id = \"tidepool-uploader\"\nrefresh_token_file = \"{}\"",
                token_path.display()
            ),
        );
        let path = write_config(&dir, &contents);
        clear_secret_env();

        let config = Config::load(&path).unwrap();
        assert_eq!(
            config.tidepool.refresh_token.as_ref().unwrap().expose(),
            "rt-file"
        );
    }

    #[test]
    fn env_refresh_token_takes_precedence_over_file() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let token_path = dir.path().join("refresh_token");
        std::fs::write(&token_path, "rt-file").unwrap();
        let contents = valid_toml().replace(
            "client_id = \"tidepool-uploader\"",
            &format!(
                "client_id = \"tidepool-uploader\"\nrefresh_token_file = \"{}\"",
                token_path.display()
            ),
        );
        let path = write_config(&dir, &contents);
        clear_secret_env();
        unsafe { set_env(REFRESH_TOKEN_ENV, "rt-env") };

        let config = Config::load(&path).unwrap();
        assert_eq!(
            config.tidepool.refresh_token.as_ref().unwrap().expose(),
            "rt-env"
        );
        clear_secret_env();
    }

    #[test]
    fn unreadable_refresh_token_file_is_config_error() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let contents = valid_toml().replace(
            "client_id = \"tidepool-uploader\"",
            "client_id = \"tidepool-uploader\"\nrefresh_token_file = \"/nonexistent/rt\"",
        );
        let path = write_config(&dir, &contents);
        clear_secret_env();

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, common::Error::Config(ref msg) if msg.contains("refresh_token_file")));
    }

    #[test]
    fn client_secret_from_env() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, valid_toml());
        clear_secret_env();
        unsafe {
            set_env(REFRESH_TOKEN_ENV, "rt-env");
            set_env(CLIENT_SECRET_ENV, "s3cret");
        }

        let config = Config::load(&path).unwrap();
        let client = config.tidepool.client_config().unwrap();
        assert_eq!(client.client_secret().unwrap().expose(), "s3cret");
        clear_secret_env();
    }

    #[test]
    fn refresh_section_overrides() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let contents = format!(
            "{}\n[refresh]\npolicy = \"fail_closed\"\nwait_timeout_secs = 5\n",
            valid_toml()
        );
        let path = write_config(&dir, &contents);
        clear_secret_env();
        unsafe { set_env(REFRESH_TOKEN_ENV, "rt-env") };

        let config = Config::load(&path).unwrap();
        assert_eq!(config.refresh.failure_policy(), FailurePolicy::FailClosed);
        let options = config.refresh.manager_options();
        assert_eq!(options.wait_timeout, Duration::from_secs(5));
        assert_eq!(options.failure_policy, FailurePolicy::FailClosed);
        clear_secret_env();
    }

    #[test]
    fn retry_policy_carries_backoff() {
        let refresh = RefreshConfig {
            initial_backoff_secs: 2,
            max_backoff_secs: 30,
            ..Default::default()
        };
        assert_eq!(
            refresh.failure_policy(),
            FailurePolicy::Retry {
                initial_backoff: Duration::from_secs(2),
                max_backoff: Duration::from_secs(30),
            }
        );
    }

    #[test]
    fn zero_values_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_secret_env();
        unsafe { set_env(REFRESH_TOKEN_ENV, "rt-env") };
        let dir = tempfile::tempdir().unwrap();

        for (section, field) in [
            ("refresh", "wait_timeout_secs"),
            ("refresh", "http_timeout_secs"),
            ("refresh", "initial_backoff_secs"),
            ("server", "max_connections"),
        ] {
            let contents = if section == "server" {
                valid_toml().replace(
                    "listen_addr = \"127.0.0.1:8787\"",
                    &format!("listen_addr = \"127.0.0.1:8787\"\n{field} = 0"),
                )
            } else {
                format!("{}\n[refresh]\n{field} = 0\n", valid_toml())
            };
            let path = write_config(&dir, &contents);
            let err = Config::load(&path).unwrap_err();
            assert!(err.to_string().contains(field), "{field}: got {err}");
        }
        clear_secret_env();
    }

    #[test]
    fn inverted_backoff_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_secret_env();
        unsafe { set_env(REFRESH_TOKEN_ENV, "rt-env") };
        let dir = tempfile::tempdir().unwrap();
        let contents = format!(
            "{}\n[refresh]\ninitial_backoff_secs = 120\nmax_backoff_secs = 60\n",
            valid_toml()
        );
        let path = write_config(&dir, &contents);

        let err = Config::load(&path).unwrap_err();
        assert!(err.to_string().contains("must not exceed"), "got: {err}");
        clear_secret_env();
    }

    #[test]
    fn oversized_backoff_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_secret_env();
        unsafe { set_env(REFRESH_TOKEN_ENV, "rt-env") };
        let dir = tempfile::tempdir().unwrap();
        let contents = format!(
            "{}\n[refresh]\nmax_backoff_secs = 9223372036854775807\n",
            valid_toml()
        );
        let path = write_config(&dir, &contents);

        let err = Config::load(&path).unwrap_err();
        assert!(err.to_string().contains("max_backoff_secs"), "got: {err}");
        clear_secret_env();
    }

    #[test]
    fn bad_token_endpoint_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_secret_env();
        unsafe { set_env(REFRESH_TOKEN_ENV, "rt-env") };
        let dir = tempfile::tempdir().unwrap();
        let contents = valid_toml().replace(
            "client_id = \"tidepool-uploader\"",
            "client_id = \"tidepool-uploader\"\ntoken_endpoint = \"ftp://auth.local/token\"",
        );
        let path = write_config(&dir, &contents);

        assert!(matches!(
            Config::load(&path),
            Err(common::Error::Config(_))
        ));
        clear_secret_env();
    }

    #[test]
    fn blank_client_id_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_secret_env();
        unsafe { set_env(REFRESH_TOKEN_ENV, "rt-env") };
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, &valid_toml().replace("tidepool-uploader", "  "));

        assert!(matches!(
            Config::load(&path),
            Err(common::Error::Config(_))
        ));
        clear_secret_env();
    }

    #[test]
    fn resolve_path_prefers_cli_then_env() {
        let _lock = ENV_MUTEX.lock().unwrap();

        unsafe { set_env("CONFIG_PATH", "/etc/agent.toml") };
        assert_eq!(
            Config::resolve_path(Some("/tmp/cli.toml")),
            PathBuf::from("/tmp/cli.toml")
        );
        assert_eq!(Config::resolve_path(None), PathBuf::from("/etc/agent.toml"));

        unsafe { remove_env("CONFIG_PATH") };
        assert_eq!(
            Config::resolve_path(None),
            PathBuf::from("tidepool-token-agent.toml")
        );
    }
}

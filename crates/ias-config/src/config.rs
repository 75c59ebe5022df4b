use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use ias_auth::config::PBKDF2_ITERATIONS;
use ias_auth::{AuthConfig, Endpoints, HttpTimeouts};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::ConfigError;

/// Persisted settings of the switcher, stored as `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IasConfig {
    /// Overrides the registered Azure application.
    pub client_id: Option<String>,
    /// Roots every endpoint at this URL. Used against local mock servers.
    pub endpoint_base: Option<String>,
    /// Parent folder of the account store; the platform config folder when unset.
    pub storage_dir: Option<PathBuf>,
    /// Sign in through the browser redirect instead of the device code.
    pub browser_flow: bool,
    pub http: HttpConfig,
    pub loopback: LoopbackConfig,
    pub crypt: CryptConfig,
    pub user_agent: UserAgentConfig,
    /// Extra or replacement XSTS `XErr` mappings, keyed by the decimal code.
    pub xsts_errors: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopbackConfig {
    pub first_port: u16,
    pub last_port: u16,
    pub browser_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptConfig {
    /// Iterations used when a store is sealed with a new password.
    pub pbkdf2_iterations: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserAgentConfig {
    pub loader: Option<String>,
    pub loader_version: Option<String>,
    pub game_version: Option<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        let timeouts = HttpTimeouts::default();
        Self {
            connect_timeout_secs: timeouts.connect.as_secs(),
            request_timeout_secs: timeouts.request.as_secs(),
        }
    }
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        let defaults = AuthConfig::default();
        Self {
            first_port: *defaults.loopback_ports.start(),
            last_port: *defaults.loopback_ports.end(),
            browser_timeout_secs: defaults.browser_timeout.as_secs(),
        }
    }
}

impl Default for CryptConfig {
    fn default() -> Self {
        Self {
            pbkdf2_iterations: PBKDF2_ITERATIONS,
        }
    }
}

impl IasConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.http.connect_timeout_secs == 0 || self.http.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid("HTTP timeouts must be positive".to_string()));
        }
        if self.loopback.first_port > self.loopback.last_port {
            return Err(ConfigError::Invalid(format!(
                "loopback port range {}..={} is empty",
                self.loopback.first_port, self.loopback.last_port
            )));
        }
        if self.loopback.browser_timeout_secs == 0 {
            return Err(ConfigError::Invalid("browser timeout must be positive".to_string()));
        }
        if self.crypt.pbkdf2_iterations == 0 {
            return Err(ConfigError::Invalid("PBKDF2 iterations must be positive".to_string()));
        }
        if let Some(base) = &self.endpoint_base {
            if !(base.starts_with("http://") || base.starts_with("https://")) {
                return Err(ConfigError::Invalid(format!("endpoint base is not an HTTP URL: {base}")));
            }
        }
        Ok(())
    }

    /// Runtime configuration of the authentication core.
    pub fn auth_config(&self) -> AuthConfig {
        let mut config = AuthConfig::default();
        if let Some(client_id) = &self.client_id {
            config.client_id = client_id.clone();
        }
        if let Some(base) = &self.endpoint_base {
            config.endpoints = Endpoints::with_base(base);
        }
        config.http_timeouts = HttpTimeouts {
            connect: Duration::from_secs(self.http.connect_timeout_secs),
            request: Duration::from_secs(self.http.request_timeout_secs),
        };
        config.loopback_ports = self.loopback.first_port..=self.loopback.last_port;
        config.browser_timeout = Duration::from_secs(self.loopback.browser_timeout_secs);

        if let Some(loader) = &self.user_agent.loader {
            config.user_agent.loader = loader.clone();
        }
        if let Some(version) = &self.user_agent.loader_version {
            config.user_agent.loader_version = version.clone();
        }
        if let Some(game) = &self.user_agent.game_version {
            config.user_agent.game_version = game.clone();
        }

        let overrides = self.xsts_errors.iter().filter_map(|(code, key)| match code.parse::<u64>() {
            Ok(xerr) => Some((xerr, key.clone())),
            Err(_) => {
                warn!("Ignoring XSTS error mapping with non-numeric code {:?}", code);
                None
            }
        });
        config.xsts_errors.extend(overrides);
        config
    }
}

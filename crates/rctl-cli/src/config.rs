//! Client configuration at `~/.rctl/config.toml`.
//!
//! Provides the default endpoint and session tuning. CLI arguments always
//! override config file values.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use rctl_client::{BackoffConfig, SessionConfig};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub endpoint: EndpointConfig,

    #[serde(default)]
    pub session: SessionSettings,
}

/// Which endpoint to talk to when none is given on the command line.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// `tcp://host:port`, `host:port`, `ws://…` or `wss://…` (empty = none).
    #[serde(default)]
    pub address: String,
}

/// Session tuning in file-friendly units.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    #[serde(default = "default_log_capacity")]
    pub log_capacity: usize,

    #[serde(default = "default_timeout_secs")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_timeout_secs")]
    pub write_timeout_secs: u64,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_backoff_initial_ms")]
    pub backoff_initial_ms: u64,

    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,

    #[serde(default = "default_jitter")]
    pub jitter: bool,

    /// Uptime after which a connection no longer counts toward `max_attempts`.
    #[serde(default = "default_backoff_reset_ms")]
    pub backoff_reset_ms: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            log_capacity: default_log_capacity(),
            connect_timeout_secs: default_timeout_secs(),
            write_timeout_secs: default_timeout_secs(),
            max_attempts: default_max_attempts(),
            backoff_initial_ms: default_backoff_initial_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            jitter: default_jitter(),
            backoff_reset_ms: default_backoff_reset_ms(),
        }
    }
}

fn default_log_capacity() -> usize {
    500
}

fn default_timeout_secs() -> u64 {
    5
}

fn default_max_attempts() -> u32 {
    5
}

fn default_backoff_initial_ms() -> u64 {
    250
}

fn default_backoff_max_ms() -> u64 {
    8000
}

fn default_jitter() -> bool {
    true
}

fn default_backoff_reset_ms() -> u64 {
    5000
}

impl SessionSettings {
    pub fn to_session_config(&self) -> SessionConfig {
        SessionConfig {
            log_capacity: self.log_capacity,
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            write_timeout: Duration::from_secs(self.write_timeout_secs),
            backoff: BackoffConfig {
                initial: Duration::from_millis(self.backoff_initial_ms),
                max: Duration::from_millis(self.backoff_max_ms),
                max_attempts: self.max_attempts,
                jitter: self.jitter,
                reset_after: Duration::from_millis(self.backoff_reset_ms),
            },
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, returning defaults if the file
    /// does not exist.
    pub fn load(path: &str) -> Result<Self> {
        let path = Path::new(path);
        if !path.exists() {
            debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("failed to parse config at {}", path.display()))?;

        debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// `~/.rctl/config.toml`.
    pub fn default_path() -> String {
        let home = dirs::home_dir().unwrap_or_default();
        home.join(".rctl")
            .join("config.toml")
            .to_string_lossy()
            .to_string()
    }

    /// The address given on the command line, or the configured one.
    pub fn resolve_address(&self, given: Option<&str>) -> Result<String> {
        match given {
            Some(address) => Ok(address.to_string()),
            None if !self.endpoint.address.is_empty() => Ok(self.endpoint.address.clone()),
            None => anyhow::bail!(
                "no address given and no [endpoint] address configured"
            ),
        }
    }
}

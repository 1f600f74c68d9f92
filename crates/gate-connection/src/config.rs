//! Client configuration.
//!
//! Configuration is stored as TOML:
//! - Linux: `~/.config/gate-remote/gate.toml`
//! - Windows: `%APPDATA%/gate-remote/gate.toml`

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use gate_protocol::ViewingSide;

use crate::types::{ManagerConfig, ReconnectConfig};

/// Errors loading or saving configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Broker endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 8883,
            tls: true,
        }
    }
}

/// Retry policy, in file units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_retries: u32,
    pub backoff_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff_ms: 2000,
        }
    }
}

/// Heartbeat evaluation, in file units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LivenessSection {
    pub timeout_secs: u64,
    pub poll_interval_secs: u64,
}

impl Default for LivenessSection {
    fn default() -> Self {
        Self {
            timeout_secs: 120,
            poll_interval_secs: 5,
        }
    }
}

/// Gate client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    pub keep_alive_secs: u64,
    pub connect_timeout_secs: u64,
    pub reconnect_watchdog_secs: u64,
    pub command_timeout_secs: u64,
    pub viewing_side: ViewingSide,
    /// Overrides the default credential file location.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credentials_path: Option<PathBuf>,
    pub broker: BrokerConfig,
    pub retry: RetrySection,
    pub liveness: LivenessSection,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            keep_alive_secs: 30,
            connect_timeout_secs: 5,
            reconnect_watchdog_secs: 10,
            command_timeout_secs: 30,
            viewing_side: ViewingSide::Inside,
            credentials_path: None,
            broker: BrokerConfig::default(),
            retry: RetrySection::default(),
            liveness: LivenessSection::default(),
        }
    }
}

impl GateConfig {
    /// Loads configuration from `path`, falling back to defaults if absent.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Saves the configuration to `path`.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    /// Runtime settings for the connection manager.
    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            keep_alive: Duration::from_secs(self.keep_alive_secs),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            reconnect: ReconnectConfig {
                max_retries: self.retry.max_retries,
                backoff: Duration::from_millis(self.retry.backoff_ms),
                watchdog: Duration::from_secs(self.reconnect_watchdog_secs),
            },
            heartbeat_timeout: Duration::from_secs(self.liveness.timeout_secs),
            poll_interval: Duration::from_secs(self.liveness.poll_interval_secs.max(1)),
            command_timeout: Duration::from_secs(self.command_timeout_secs),
        }
    }

    /// Credential file location: the override, else the platform default.
    pub fn credentials_path(&self) -> Option<PathBuf> {
        self.credentials_path
            .clone()
            .or_else(|| config_dir().map(|d| d.join("gate-remote").join("credentials.json")))
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("gate-remote").join("gate.toml"))
}

/// Returns the platform-specific config directory.
fn config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var("HOME")
                    .ok()
                    .map(|h| PathBuf::from(h).join(".config"))
            })
    }

    #[cfg(target_os = "windows")]
    {
        std::env::var("APPDATA").ok().map(PathBuf::from)
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join(".config"))
    }
}

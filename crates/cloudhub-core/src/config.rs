//! Configuration system for the cloud hub.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $CLOUDHUB_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/cloudhub/config.toml
//!   3. ~/.config/cloudhub/config.toml

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::identity::IdType;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    pub identity: IdentityConfig,
    pub hub: HubSettings,
    pub session: SessionSettings,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// How the replica identity is derived.
    pub id_type: IdType,
    /// Explicit identity, used when `id_type = "configured"`.
    pub id: String,
    /// File holding the replica id. Overrides `id` in configured mode.
    pub node_id_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubSettings {
    /// Maximum edge nodes attached to this replica.
    pub node_limit: usize,
    /// HTTPS listen address. Part of the hash identity input.
    pub https_address: String,
    /// WebSocket listen address. Part of the hash identity input.
    pub websocket_address: String,
    /// Local status API port.
    pub api_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Session is terminated when no keepalive arrives within this window.
    pub keepalive_interval_secs: u64,
    /// How long to wait for an ack before resending.
    pub ack_timeout_secs: u64,
    /// Resends before an unacknowledged message is dropped.
    pub ack_max_retries: u32,
    /// Capacity of each outbound queue.
    pub queue_capacity: usize,
}

impl SessionSettings {
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_secs(self.ack_timeout_secs)
    }
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            node_limit: 1000,
            https_address: "0.0.0.0:10002".to_string(),
            websocket_address: "0.0.0.0:10000".to_string(),
            api_port: 10550,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            keepalive_interval_secs: 30,
            ack_timeout_secs: 5,
            ack_max_retries: 3,
            queue_capacity: 1024,
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("cloudhub")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("failed to read node id file {0}: {1}")]
    NodeIdFile(PathBuf, std::io::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl HubConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            HubConfig::default()
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parse a config file without applying env overrides.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        let mut config: HubConfig =
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?;
        config.normalize();
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("CLOUDHUB_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&HubConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply CLOUDHUB_* overrides. `lookup` is `std::env::var` in production.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("CLOUDHUB_IDENTITY__ID_TYPE") {
            match v.parse() {
                Ok(t) => self.identity.id_type = t,
                Err(e) => tracing::warn!(value = %v, error = %e, "ignoring id type override"),
            }
        }
        if let Some(v) = lookup("CLOUDHUB_IDENTITY__ID") {
            self.identity.id = v;
        }
        if let Some(v) = lookup("CLOUDHUB_HUB__NODE_LIMIT") {
            if let Ok(n) = v.parse() {
                self.hub.node_limit = n;
            }
        }
        if let Some(v) = lookup("CLOUDHUB_HUB__API_PORT") {
            if let Ok(p) = v.parse() {
                self.hub.api_port = p;
            }
        }
        if let Some(v) = lookup("CLOUDHUB_SESSION__KEEPALIVE_INTERVAL_SECS") {
            if let Ok(s) = v.parse() {
                self.session.keepalive_interval_secs = s;
            }
        }
        self.normalize();
    }

    /// Replace values no session can run with by their defaults.
    fn normalize(&mut self) {
        let defaults = SessionSettings::default();
        if self.session.keepalive_interval_secs == 0 {
            tracing::warn!(
                default = defaults.keepalive_interval_secs,
                "keepalive_interval_secs must be positive, using default"
            );
            self.session.keepalive_interval_secs = defaults.keepalive_interval_secs;
        }
        if self.session.ack_timeout_secs == 0 {
            tracing::warn!(
                default = defaults.ack_timeout_secs,
                "ack_timeout_secs must be positive, using default"
            );
            self.session.ack_timeout_secs = defaults.ack_timeout_secs;
        }
    }

    /// Default node id file, next to the config file.
    pub fn default_node_id_path() -> PathBuf {
        config_dir().join("node_id")
    }

    /// Read the replica id from the node id file.
    ///
    /// `identity.node_id_file` wins when it exists, else the default path is
    /// tried. In configured mode a non-empty file value replaces
    /// `identity.id`. Returns the value read, or `None` when no file exists.
    pub fn resolve_node_id(&mut self) -> Result<Option<String>, ConfigError> {
        self.resolve_node_id_from(&Self::default_node_id_path())
    }

    pub fn resolve_node_id_from(
        &mut self,
        default_path: &Path,
    ) -> Result<Option<String>, ConfigError> {
        let configured = self.identity.node_id_file.clone();
        let path = match configured.as_deref() {
            Some(p) if p.exists() => p.to_path_buf(),
            _ if default_path.exists() => default_path.to_path_buf(),
            // no file at all: only an error when nothing else names us
            Some(p) if self.identity.id.is_empty() => {
                return Err(ConfigError::NodeIdFile(
                    p.to_path_buf(),
                    std::io::Error::from(std::io::ErrorKind::NotFound),
                ));
            }
            _ => return Ok(None),
        };

        let data =
            std::fs::read_to_string(&path).map_err(|e| ConfigError::NodeIdFile(path.clone(), e))?;
        let node_id = data.trim().to_string();

        if self.identity.id_type == IdType::Configured && !node_id.is_empty() {
            tracing::info!(file = %path.display(), node_id = %node_id, "using node id file as cloud id");
            self.identity.id = node_id.clone();
        }
        Ok(Some(node_id))
    }
}

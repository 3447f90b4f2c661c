//! Configuration for the meridian daemons.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $MERIDIAN_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/meridian/config.toml
//!   3. ~/.config/meridian/config.toml

use std::net::SocketAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::id::{self, NodeId};

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeridianConfig {
    pub network: NetworkConfig,
    pub registration: RegistrationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address the peer listener binds to. Port 0 = OS-assigned.
    pub listen_addr: SocketAddr,
    /// Port the discovery service listens on.
    pub discovery_port: u16,
    /// Outbound connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationConfig {
    /// Fixed identifier (four hex digits). Empty = generate from timestamp.
    pub identifier: String,
    /// Collision retry bound for generated identifiers.
    pub max_attempts: u32,
    /// Initial collision backoff in milliseconds. Doubles per retry.
    pub backoff_ms: u64,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for MeridianConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            registration: RegistrationConfig::default(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:18081".parse().unwrap(),
            discovery_port: 18080,
            connect_timeout_ms: 5_000,
        }
    }
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            identifier: String::new(),
            max_attempts: 8,
            backoff_ms: 100,
        }
    }
}

impl RegistrationConfig {
    /// Parse the configured fixed identifier, if any.
    pub fn fixed_identifier(&self) -> Result<Option<NodeId>, id::ParseIdError> {
        if self.identifier.is_empty() {
            Ok(None)
        } else {
            self.identifier.parse().map(Some)
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("meridian")
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
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl MeridianConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            MeridianConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("MERIDIAN_CONFIG")
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
            let text = toml::to_string_pretty(&MeridianConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text)
                .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply MERIDIAN_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("MERIDIAN_NETWORK__LISTEN_ADDR") {
            if let Ok(a) = v.parse() {
                self.network.listen_addr = a;
            }
        }
        if let Ok(v) = std::env::var("MERIDIAN_NETWORK__DISCOVERY_PORT") {
            if let Ok(p) = v.parse() {
                self.network.discovery_port = p;
            }
        }
        if let Ok(v) = std::env::var("MERIDIAN_NETWORK__CONNECT_TIMEOUT_MS") {
            if let Ok(t) = v.parse() {
                self.network.connect_timeout_ms = t;
            }
        }
        if let Ok(v) = std::env::var("MERIDIAN_REGISTRATION__IDENTIFIER") {
            self.registration.identifier = v;
        }
        if let Ok(v) = std::env::var("MERIDIAN_REGISTRATION__MAX_ATTEMPTS") {
            if let Ok(n) = v.parse() {
                self.registration.max_attempts = n;
            }
        }
    }
}

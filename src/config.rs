// Configuration loading and parsing (relay.toml).

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::relay::{RelayConfig, DEFAULT_HEARTBEAT, DEFAULT_PORT};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub heartbeat_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: DEFAULT_PORT,
            heartbeat_secs: DEFAULT_HEARTBEAT.as_secs(),
        }
    }
}

impl Config {
    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            port: self.port,
            heartbeat: Duration::from_secs(self.heartbeat_secs),
        }
    }
}

// ---------------------------------------------------------------------------
// relay.toml structs
// ---------------------------------------------------------------------------

/// Wrapper for the top-level `[relay]` table in relay.toml.
#[derive(Debug, Deserialize)]
struct ConfigFile {
    relay: RelaySection,
}

#[derive(Debug, Deserialize)]
struct RelaySection {
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_heartbeat_secs")]
    heartbeat_secs: u64,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_heartbeat_secs() -> u64 {
    DEFAULT_HEARTBEAT.as_secs()
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load configuration from `config/relay.toml` relative to the given
/// `base_dir`. The file is optional: when it is absent the built-in
/// defaults apply.
pub fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let path = base_dir.join("config").join("relay.toml");
    if !path.exists() {
        return Ok(Config::default());
    }

    let text = read_file(&path)?;
    let file: ConfigFile = toml::from_str(&text).map_err(|e| ConfigError::ParseError {
        path: path.clone(),
        source: e,
    })?;

    let config = Config {
        port: file.relay.port,
        heartbeat_secs: file.relay.heartbeat_secs,
    };

    validate(&config)?;

    Ok(config)
}

/// Convenience wrapper: loads config relative to the current working
/// directory.
pub fn load_config() -> Result<Config, ConfigError> {
    let cwd = std::env::current_dir().map_err(|_| ConfigError::FileNotFound {
        path: PathBuf::from("."),
    })?;
    load_config_from(&cwd)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.heartbeat_secs == 0 {
        return Err(ConfigError::ValidationError {
            field: "relay.heartbeat_secs".into(),
            message: "must be greater than 0".into(),
        });
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

//! Broker configuration.
//!
//! Values come from built-in defaults, optionally overlaid by a TOML file.
//! Command-line flags are applied on top by the binary.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Default listen port
pub const DEFAULT_PORT: u16 = 8123;

/// Default inbound line limit in bytes
pub const DEFAULT_MAX_LINE_LENGTH: usize = 16_384;

/// Default per-session outbox capacity, in lines
pub const DEFAULT_OUTBOUND_BUFFER: usize = 256;

/// Default per-line write timeout
pub const DEFAULT_WRITE_TIMEOUT_SECS: u64 = 10;

/// Runtime settings for the broker server.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BrokerConfig {
    /// Address to listen on
    pub bind: IpAddr,

    /// Port to listen on
    pub port: u16,

    /// Longest accepted inbound line, terminator excluded
    pub max_line_length: usize,

    /// Lines queued per session before new ones are dropped
    pub outbound_buffer: usize,

    /// Seconds a single line write may take before the connection is closed
    pub write_timeout_secs: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
            write_timeout_secs: DEFAULT_WRITE_TIMEOUT_SECS,
        }
    }
}

impl BrokerConfig {
    /// Parses a TOML document; missing keys keep their defaults.
    ///
    /// # Errors
    ///
    /// - `ConfigError::Parse` for malformed TOML or unknown keys
    /// - `ConfigError::Invalid` if a value is out of range
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a TOML file.
    ///
    /// # Errors
    ///
    /// - `ConfigError::Io` if the file cannot be read
    /// - anything `from_toml_str` returns
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
        Self::from_toml_str(&contents)
    }

    /// Checks that every value is usable.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field: &'static str, reason: &'static str| -> Result<(), ConfigError> {
            Err(ConfigError::Invalid { field, reason })
        };

        if self.port == 0 {
            return invalid("port", "must be between 1 and 65535");
        }
        if self.max_line_length == 0 {
            return invalid("max_line_length", "must be greater than zero");
        }
        if self.outbound_buffer == 0 {
            return invalid("outbound_buffer", "must be greater than zero");
        }
        if self.write_timeout_secs == 0 {
            return invalid("write_timeout_secs", "must be greater than zero");
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid value for {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

//! # Configuration Management
//!
//! Centralized configuration for the channel server and its sessions.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Environment-variable overrides via `from_env()`
//!
//! The wire protocol itself is not configurable — the key seed, rotation
//! deltas, and header layout are fixed by the client binary. What lives
//! here is deployment policy: bind address, connection limits, send-queue
//! depth, and the optional per-connection write deadline that bounds how
//! long a stalled peer can hold the writer task.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::Level;

use crate::error::{ProtocolError, Result};

/// Main configuration structure that contains all configurable settings.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct NetworkConfig {
    /// Channel server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Per-connection session configuration
    #[serde(default)]
    pub session: SessionConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl NetworkConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ProtocolError::ConfigError(format!("failed to read config file: {e}")))?;
        Self::from_toml(&contents)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables on top of defaults.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("FRONTIER_SERVER_ADDRESS") {
            config.server.address = addr;
        }

        if let Ok(max) = std::env::var("FRONTIER_MAX_CONNECTIONS") {
            if let Ok(val) = max.parse::<usize>() {
                config.server.max_connections = val;
            }
        }

        if let Ok(depth) = std::env::var("FRONTIER_SEND_QUEUE_DEPTH") {
            if let Ok(val) = depth.parse::<usize>() {
                config.session.send_queue_depth = val;
            }
        }

        if let Ok(deadline) = std::env::var("FRONTIER_WRITE_DEADLINE_MS") {
            if let Ok(val) = deadline.parse::<u64>() {
                config.session.write_deadline = Some(Duration::from_millis(val));
            }
        }

        if let Ok(level) = std::env::var("FRONTIER_LOG_LEVEL") {
            if let Ok(val) = level.parse::<Level>() {
                config.logging.level = val;
            }
        }

        Ok(config)
    }

    /// Validate the configuration for common misconfigurations.
    ///
    /// Returns a list of validation errors. Empty list means the
    /// configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.server.validate());
        errors.extend(self.session.validate());
        errors
    }

    /// Validate and return Result - convenience method.
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::ConfigError(format!(
                "configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Channel server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Listen address (e.g., "0.0.0.0:54001")
    pub address: String,

    /// Maximum number of concurrent connections
    pub max_connections: usize,

    /// Whether clients initialize the connection with the 8-byte null buffer
    pub expect_null_init: bool,

    /// Timeout for graceful server shutdown
    #[serde(with = "duration_serde")]
    pub shutdown_timeout: Duration,

    /// Well-known lobby stages created at startup
    #[serde(default)]
    pub default_stages: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: String::from("0.0.0.0:54001"),
            max_connections: 1000,
            expect_null_init: true,
            shutdown_timeout: Duration::from_secs(10),
            default_stages: Vec::new(),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.address.is_empty() {
            errors.push("server address cannot be empty".to_string());
        } else if self.address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "invalid server address format: '{}' (expected format: '0.0.0.0:54001')",
                self.address
            ));
        }

        if self.max_connections == 0 {
            errors.push("max connections must be greater than 0".to_string());
        } else if self.max_connections > 100_000 {
            errors.push(format!(
                "max connections very high: {} (ensure system resources can support this)",
                self.max_connections
            ));
        }

        if self.shutdown_timeout.as_secs() < 1 {
            errors.push("shutdown timeout too short (minimum: 1s)".to_string());
        } else if self.shutdown_timeout.as_secs() > 60 {
            errors.push("shutdown timeout too long (maximum: 60s)".to_string());
        }

        errors
    }
}

/// Per-connection session configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    /// Maximum number of packets queued for send per session; broadcast
    /// packets beyond this are dropped rather than blocking the sender
    pub send_queue_depth: usize,

    /// Optional per-packet write deadline; a peer that stalls its socket
    /// longer than this is disconnected instead of pinning the queue
    #[serde(
        default,
        with = "opt_duration_serde",
        skip_serializing_if = "Option::is_none"
    )]
    pub write_deadline: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            send_queue_depth: 20,
            write_deadline: None,
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.send_queue_depth == 0 {
            errors.push("send queue depth must be greater than 0".to_string());
        } else if self.send_queue_depth > 100_000 {
            errors.push(format!(
                "send queue depth too large: {} (max recommended: 100,000)",
                self.send_queue_depth
            ));
        }

        if let Some(deadline) = self.write_deadline {
            if deadline.as_millis() < 10 {
                errors.push("write deadline too short (minimum: 10ms)".to_string());
            } else if deadline.as_secs() > 300 {
                errors.push("write deadline too long (maximum: 300s)".to_string());
            }
        }

        errors
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(with = "log_level_serde")]
    pub level: Level,

    /// Optional tracing filter directives (overrides `level` when set)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            filter: None,
        }
    }
}

/// Helper module for Duration serialization/deserialization (milliseconds).
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for Option<Duration> (milliseconds, absent = disabled).
mod opt_duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration
            .map(|d| d.as_millis() as u64)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization.
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("invalid log level: {level_str}")))
    }
}

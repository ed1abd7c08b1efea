//! # Configuration Management
//!
//! Centralized configuration for channels, servers and clients.
//!
//! This module provides structured configuration for the call channel
//! (timeouts, ticket pool, frame limits), the session server (grace period,
//! capacity, shutdown) and the client (dialing, heartbeat, reconnection).
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - TOML strings via `from_toml()`
//! - Environment overrides via `from_env()` (`OBJWIRE_*` variables)
//! - Direct instantiation with defaults
//!
//! Durations are written as integer milliseconds, log levels by name.
//!
//! ```rust
//! use objwire::config::NetworkConfig;
//! use std::time::Duration;
//!
//! let config = NetworkConfig::from_toml(r#"
//!     [channel]
//!     call_timeout = 2500
//!     ticket_pool_limit = 8
//! "#).unwrap();
//! assert_eq!(config.channel.call_timeout, Duration::from_millis(2500));
//! assert!(config.validate().is_empty());
//! ```

use crate::core::frame::DEFAULT_MAX_FRAME_SIZE;
use crate::error::{ProtocolError, Result};
use crate::transport::Endpoint;
use crate::utils::timeout;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Default bound on recycled tickets per channel.
pub const DEFAULT_TICKET_POOL_LIMIT: usize = 32;

/// Maximum session key length in bytes.
pub const MAX_SESSION_KEY_LEN: usize = 256;

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "OBJWIRE_";

/// Main configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct NetworkConfig {
    /// Server-specific configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Client-specific configuration
    #[serde(default)]
    pub client: ClientConfig,

    /// Per-channel call settings, shared by both roles
    #[serde(default)]
    pub channel: ChannelConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl NetworkConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;
        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Defaults overridden by `OBJWIRE_*` environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_overrides(|key| std::env::var(format!("{ENV_PREFIX}{key}")).ok())?;
        Ok(config)
    }

    /// Apply overrides from `lookup`, which maps an unprefixed variable name
    /// (e.g. `CALL_TIMEOUT_MS`) to its value.
    ///
    /// Unparseable values are a `ConfigError` rather than silently ignored.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("SERVER_ADDRESS") {
            self.server.address = addr;
        }
        if let Some(addr) = lookup("CLIENT_ADDRESS") {
            self.client.address = addr;
        }
        if let Some(id) = lookup("CLIENT_ID") {
            self.client.client_id = id;
        }
        if let Some(ms) = parse_env::<u64>(&lookup, "CONNECTION_TIMEOUT_MS")? {
            self.client.connection_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_env::<u64>(&lookup, "HEARTBEAT_INTERVAL_MS")? {
            self.client.heartbeat_interval = Duration::from_millis(ms);
        }
        if let Some(flag) = parse_env::<bool>(&lookup, "AUTO_RECONNECT")? {
            self.client.auto_reconnect = flag;
        }
        if let Some(ms) = parse_env::<u64>(&lookup, "SESSION_GRACE_PERIOD_MS")? {
            self.server.session_grace_period = Duration::from_millis(ms);
        }
        if let Some(count) = parse_env::<usize>(&lookup, "MAX_SESSIONS")? {
            self.server.max_sessions = count;
        }
        if let Some(ms) = parse_env::<u64>(&lookup, "CALL_TIMEOUT_MS")? {
            self.channel.call_timeout = Duration::from_millis(ms);
        }
        if let Some(limit) = parse_env::<usize>(&lookup, "TICKET_POOL_LIMIT")? {
            self.channel.ticket_pool_limit = limit;
        }
        if let Some(size) = parse_env::<usize>(&lookup, "MAX_FRAME_SIZE")? {
            self.channel.max_frame_size = size;
        }
        if let Some(level) = lookup("LOG_LEVEL") {
            self.logging.log_level = level
                .parse::<Level>()
                .map_err(|_| ProtocolError::ConfigError(format!("Invalid log level: {level}")))?;
        }
        Ok(())
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to serialize config: {e}")))?;

        fs::write(path, content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.server.validate());
        errors.extend(self.client.validate());
        errors.extend(self.channel.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

fn parse_env<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
            ProtocolError::ConfigError(format!("Invalid value for {ENV_PREFIX}{key}: '{raw}'"))
        }),
    }
}

/// Server-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// TCP listen address (e.g., "127.0.0.1:9000")
    pub address: String,

    /// Deadline for a new connection to present its session key
    #[serde(with = "duration_serde")]
    pub handshake_timeout: Duration,

    /// How long a detached session stays resumable
    #[serde(with = "duration_serde")]
    pub session_grace_period: Duration,

    /// How often expired sessions are evicted
    #[serde(with = "duration_serde")]
    pub eviction_interval: Duration,

    /// Timeout for graceful server shutdown
    #[serde(with = "duration_serde")]
    pub shutdown_timeout: Duration,

    /// Maximum number of stored sessions, live or detached
    pub max_sessions: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: String::from("127.0.0.1:9000"),
            handshake_timeout: timeout::DEFAULT_TIMEOUT,
            session_grace_period: timeout::SESSION_GRACE_PERIOD,
            eviction_interval: Duration::from_secs(5),
            shutdown_timeout: timeout::SHUTDOWN_TIMEOUT,
            max_sessions: 1000,
        }
    }
}

impl ServerConfig {
    /// Validate server configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.address.is_empty() {
            errors.push("Server address cannot be empty".to_string());
        } else if self.address.parse::<Endpoint>().is_err() {
            errors.push(format!(
                "Invalid server address format: '{}' (expected '0.0.0.0:8080' or 'unix:/path')",
                self.address
            ));
        }

        if self.handshake_timeout.as_millis() < 100 {
            errors.push("Handshake timeout too short (minimum: 100ms)".to_string());
        } else if self.handshake_timeout.as_secs() > 300 {
            errors.push("Handshake timeout too long (maximum: 300s)".to_string());
        }

        if self.session_grace_period.as_millis() < 100 {
            errors.push("Session grace period too short (minimum: 100ms)".to_string());
        } else if self.session_grace_period.as_secs() > 86_400 {
            errors.push("Session grace period too long (maximum: 24 hours)".to_string());
        }

        if self.eviction_interval.as_millis() < 10 {
            errors.push("Eviction interval too short (minimum: 10ms)".to_string());
        }

        if self.shutdown_timeout.as_secs() < 1 {
            errors.push("Shutdown timeout too short (minimum: 1s)".to_string());
        } else if self.shutdown_timeout.as_secs() > 60 {
            errors.push("Shutdown timeout too long (maximum: 60s)".to_string());
        }

        if self.max_sessions == 0 {
            errors.push("Max sessions must be greater than 0".to_string());
        } else if self.max_sessions > 100_000 {
            errors.push(format!(
                "Max sessions very high: {} (ensure system resources can support this)",
                self.max_sessions
            ));
        }

        errors
    }
}

/// Client-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Target server address
    pub address: String,

    /// Identity presented to the server's access control
    pub client_id: String,

    /// Timeout for connection attempts
    #[serde(with = "duration_serde")]
    pub connection_timeout: Duration,

    /// Whether to ping the server periodically
    pub heartbeat_enabled: bool,

    /// Interval for heartbeat pings
    #[serde(with = "duration_serde")]
    pub heartbeat_interval: Duration,

    /// Whether to redial automatically when the link is lost
    pub auto_reconnect: bool,

    /// Maximum number of consecutive redial attempts before giving up
    pub max_reconnect_attempts: u32,

    /// Delay between redial attempts
    #[serde(with = "duration_serde")]
    pub reconnect_delay: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: String::from("127.0.0.1:9000"),
            client_id: String::from("anonymous"),
            connection_timeout: timeout::DEFAULT_TIMEOUT,
            heartbeat_enabled: true,
            heartbeat_interval: timeout::KEEPALIVE_INTERVAL,
            auto_reconnect: true,
            max_reconnect_attempts: 3,
            reconnect_delay: Duration::from_secs(1),
        }
    }
}

impl ClientConfig {
    /// Validate client configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.address.is_empty() {
            errors.push("Client address cannot be empty".to_string());
        } else if self.address.parse::<Endpoint>().is_err() {
            errors.push(format!(
                "Invalid client address format: '{}' (expected '127.0.0.1:8080' or 'unix:/path')",
                self.address
            ));
        }

        if self.client_id.is_empty() {
            errors.push("Client id cannot be empty".to_string());
        }

        if self.connection_timeout.as_millis() < 100 {
            errors.push("Connection timeout too short (minimum: 100ms)".to_string());
        }

        if self.heartbeat_enabled && self.heartbeat_interval.as_millis() < 100 {
            errors.push("Heartbeat interval too short (minimum: 100ms)".to_string());
        }

        if self.auto_reconnect && self.max_reconnect_attempts == 0 {
            errors.push(
                "Max reconnect attempts must be greater than 0 when auto_reconnect is enabled"
                    .to_string(),
            );
        }

        if self.reconnect_delay.as_millis() < 10 {
            errors.push("Reconnect delay too short (minimum: 10ms)".to_string());
        } else if self.reconnect_delay.as_secs() > 60 {
            errors.push("Reconnect delay too long (maximum: 60s)".to_string());
        }

        errors
    }
}

/// Per-channel call settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Deadline for one remote call, blocking or async
    #[serde(with = "duration_serde")]
    pub call_timeout: Duration,

    /// Maximum number of idle tickets kept for reuse
    pub ticket_pool_limit: usize,

    /// Maximum frame length field in bytes
    pub max_frame_size: usize,

    /// Whether a server channel rejects application calls before the handshake
    pub require_handshake: bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            call_timeout: timeout::CALL_TIMEOUT,
            ticket_pool_limit: DEFAULT_TICKET_POOL_LIMIT,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            require_handshake: true,
        }
    }
}

impl ChannelConfig {
    /// Validate channel configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.call_timeout.as_millis() < 10 {
            errors.push("Call timeout too short (minimum: 10ms)".to_string());
        }

        if self.ticket_pool_limit > 65_536 {
            errors.push(format!(
                "Ticket pool limit too large: {} (maximum: 65536)",
                self.ticket_pool_limit
            ));
        }

        if self.max_frame_size < 1024 {
            errors.push("Max frame size too small (minimum: 1 KB)".to_string());
        } else if self.max_frame_size > i32::MAX as usize {
            errors.push(format!(
                "Max frame size too large: {} bytes (must fit a 32-bit length)",
                self.max_frame_size
            ));
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to log to console
    pub log_to_console: bool,

    /// Whether to log to file
    pub log_to_file: bool,

    /// Path to log file (if log_to_file is true)
    pub log_file_path: Option<String>,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("objwire"),
            log_level: Level::INFO,
            log_to_console: true,
            log_to_file: false,
            log_file_path: None,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        if self.log_to_file {
            if let Some(ref path) = self.log_file_path {
                if let Some(parent) = Path::new(path).parent() {
                    if !parent.as_os_str().is_empty() && !parent.exists() {
                        errors.push(format!(
                            "Log file directory does not exist: {}",
                            parent.display()
                        ));
                    }
                }
            } else {
                errors.push("log_file_path must be specified when log_to_file is true".to_string());
            }
        }

        if !self.log_to_console && !self.log_to_file {
            errors
                .push("At least one logging output (console or file) must be enabled".to_string());
        }

        errors
    }
}

/// Helper module for Duration serialization/deserialization
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

/// Helper module for tracing::Level serialization/deserialization
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
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}

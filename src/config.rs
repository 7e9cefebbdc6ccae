//! Configuration system for taskwire
//!
//! Supports multiple configuration sources with the following precedence (highest to lowest):
//! 1. CLI arguments
//! 2. Environment variables (TASKWIRE_* prefix)
//! 3. Configuration file (TOML)
//! 4. Default values

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::channel::{ChannelConfig, ReconnectPolicy};
use crate::error::{Error, Result};
use crate::log_store::DEFAULT_MAX_ENTRIES;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Channel connection settings
    pub channel: ChannelSettings,

    /// Logging configuration
    pub logging: LoggingSettings,
}

/// Channel connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelSettings {
    /// Base WebSocket URL of the backend (task routes hang off it)
    pub url: String,

    /// Delay before the first reconnect in milliseconds
    pub base_delay_ms: u64,

    /// Upper bound for any reconnect delay in milliseconds
    pub max_delay_ms: u64,

    /// Consecutive failed reconnects before giving up (0 = never reconnect)
    pub max_reconnect_attempts: u32,

    /// Heartbeat interval in milliseconds
    pub heartbeat_interval_ms: u64,

    /// WebSocket handshake timeout in milliseconds
    pub connect_timeout_ms: u64,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level: trace, debug, info, warn, error
    pub level: String,

    /// Log file path (empty = no file logging)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    /// Maximum log file size in MB before rotation
    pub max_file_size_mb: u64,

    /// Number of rotated log files to keep
    pub max_files: u32,

    /// Enable JSON formatted logging
    pub json_format: bool,

    /// Entries kept by the in-memory log store
    pub max_entries: usize,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8000".to_string(),
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            max_reconnect_attempts: 5,
            heartbeat_interval_ms: 30_000,
            connect_timeout_ms: 10_000,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            max_file_size_mb: 100,
            max_files: 5,
            json_format: false,
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }
}

impl ChannelSettings {
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            max_attempts: self.max_reconnect_attempts,
        }
    }

    /// Channel configuration for a concrete endpoint
    pub fn channel_config(&self, endpoint: impl Into<String>) -> ChannelConfig {
        ChannelConfig {
            endpoint: endpoint.into(),
            reconnect: self.reconnect_policy(),
            heartbeat_interval: Duration::from_millis(self.heartbeat_interval_ms),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
        }
    }
}

impl AppConfig {
    /// Load configuration from file with environment variable overrides
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut config = match Self::find_config_file(config_path)? {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };

        config.apply_env_overrides();
        config.expand_paths();
        config.validate()?;

        Ok(config)
    }

    /// Parse a configuration file without overrides or validation
    pub fn from_file(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "Loading configuration file");
        let content = fs::read_to_string(path).map_err(|e| Error::IoRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: Self = toml::from_str(&content).map_err(|e: toml::de::Error| Error::ConfigParse {
            message: format!("{}: {}", path.display(), e.message()),
            source: Some(e),
        })?;
        info!(path = %path.display(), "Configuration loaded from file");
        Ok(config)
    }

    /// Find the configuration file to use
    pub fn find_config_file(explicit_path: Option<&str>) -> Result<Option<PathBuf>> {
        // An explicit path must exist
        if let Some(path) = explicit_path {
            let path = PathBuf::from(expand_path(path));
            if path.exists() {
                return Ok(Some(path));
            }
            return Err(Error::ConfigNotFound { path });
        }

        let search_paths = [
            PathBuf::from("taskwire.toml"),
            PathBuf::from("config.toml"),
            dirs::config_dir()
                .map(|p| p.join("taskwire").join("config.toml"))
                .unwrap_or_default(),
            dirs::home_dir()
                .map(|p| p.join(".taskwire").join("config.toml"))
                .unwrap_or_default(),
            PathBuf::from("/etc/taskwire/config.toml"),
        ];

        for path in &search_paths {
            if !path.as_os_str().is_empty() && path.exists() {
                debug!(path = %path.display(), "Found configuration file");
                return Ok(Some(path.clone()));
            }
        }

        debug!("No configuration file found, using defaults");
        Ok(None)
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        fn parsed<T: std::str::FromStr>(value: Option<String>) -> Option<T> {
            value.and_then(|v| v.trim().parse().ok())
        }
        fn flag(value: &str) -> bool {
            value.eq_ignore_ascii_case("true") || value == "1"
        }

        // Channel settings
        if let Some(val) = var("TASKWIRE_URL") {
            self.channel.url = val;
        }
        if let Some(n) = parsed(var("TASKWIRE_BASE_DELAY_MS")) {
            self.channel.base_delay_ms = n;
        }
        if let Some(n) = parsed(var("TASKWIRE_MAX_DELAY_MS")) {
            self.channel.max_delay_ms = n;
        }
        if let Some(n) = parsed(var("TASKWIRE_MAX_RECONNECT_ATTEMPTS")) {
            self.channel.max_reconnect_attempts = n;
        }
        if let Some(n) = parsed(var("TASKWIRE_HEARTBEAT_INTERVAL_MS")) {
            self.channel.heartbeat_interval_ms = n;
        }
        if let Some(n) = parsed(var("TASKWIRE_CONNECT_TIMEOUT_MS")) {
            self.channel.connect_timeout_ms = n;
        }

        // Logging settings
        if let Some(val) = var("TASKWIRE_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Some(val) = var("TASKWIRE_LOG_FILE") {
            self.logging.file = Some(val);
        }
        if let Some(val) = var("TASKWIRE_LOG_JSON") {
            self.logging.json_format = flag(&val);
        }
        if let Some(n) = parsed(var("TASKWIRE_LOG_MAX_ENTRIES")) {
            self.logging.max_entries = n;
        }
    }

    /// Expand ~ and other path variables
    fn expand_paths(&mut self) {
        if let Some(ref file) = self.logging.file {
            self.logging.file = Some(expand_path(file));
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let url = &self.channel.url;
        if url.trim().is_empty() {
            return Err(Error::config_field_invalid("channel.url", "URL cannot be empty"));
        }
        if !url.starts_with("ws://") && !url.starts_with("wss://") {
            return Err(Error::config_field_invalid(
                "channel.url",
                format!("'{}' must start with ws:// or wss://", url),
            ));
        }
        crate::channel::parse_endpoint(url)
            .map_err(|e| Error::config_field_invalid("channel.url", e.to_string()))?;

        if self.channel.base_delay_ms == 0 {
            return Err(Error::config_field_invalid(
                "channel.base_delay_ms",
                "base delay must be greater than zero",
            ));
        }
        if self.channel.max_delay_ms < self.channel.base_delay_ms {
            return Err(Error::config_field_invalid(
                "channel.max_delay_ms",
                format!(
                    "max delay ({}ms) must not be below base delay ({}ms)",
                    self.channel.max_delay_ms, self.channel.base_delay_ms
                ),
            ));
        }
        if self.channel.heartbeat_interval_ms == 0 {
            return Err(Error::config_field_invalid(
                "channel.heartbeat_interval_ms",
                "heartbeat interval must be greater than zero",
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(Error::config_field_invalid(
                "logging.level",
                format!(
                    "invalid log level '{}'. Must be one of: {}",
                    self.logging.level,
                    valid_levels.join(", ")
                ),
            ));
        }

        Ok(())
    }
}

/// Expand ~ and environment variables in paths
fn expand_path(path: &str) -> String {
    shellexpand::full(path)
        .unwrap_or_else(|_| std::borrow::Cow::Borrowed(path))
        .into_owned()
}

/// Default location written by `config init`
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".taskwire")
        .join("config.toml")
}

/// Initialize a new configuration file, returning where it was written
pub fn init_config(path: Option<&str>, force: bool) -> Result<PathBuf> {
    let config_path = path
        .map(|p| PathBuf::from(expand_path(p)))
        .unwrap_or_else(default_config_path);

    if config_path.exists() && !force {
        return Err(Error::Config(format!(
            "Configuration file already exists: {}. Use --force to overwrite.",
            config_path.display()
        )));
    }

    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::IoWrite {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }

    fs::write(&config_path, generate_default_config()).map_err(|e| Error::IoWrite {
        path: config_path.clone(),
        source: e,
    })?;

    Ok(config_path)
}

/// Generate default configuration content with comments
pub fn generate_default_config() -> String {
    r#"# taskwire configuration

[channel]
# Base WebSocket URL of the backend; tasks live under /task/<id>
url = "ws://localhost:8000"

# Delay before the first reconnect in milliseconds (doubles per attempt)
base_delay_ms = 1000

# Upper bound for any reconnect delay in milliseconds
max_delay_ms = 30000

# Consecutive failed reconnects before giving up (0 = never reconnect)
max_reconnect_attempts = 5

# Heartbeat interval in milliseconds
heartbeat_interval_ms = 30000

# WebSocket handshake timeout in milliseconds
connect_timeout_ms = 10000

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log file path (comment out to disable file logging)
# file = "~/.taskwire/logs/taskwire.log"

# Maximum log file size in MB before rotation
max_file_size_mb = 100

# Number of rotated log files to keep
max_files = 5

# Enable JSON formatted logging
json_format = false

# Entries kept by the in-memory log store
max_entries = 1000
"#
    .to_string()
}

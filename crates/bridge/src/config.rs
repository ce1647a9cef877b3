//! Configuration management for the bridge process.
//!
//! Loads the TOML configuration file, validates it and converts it into the
//! library's [`ServerConfig`].

use anyhow::Context;
use serde::{Deserialize, Serialize};
use socket_bridge::config::{
    DEFAULT_HOST, DEFAULT_MAX_FRAME_LEN, DEFAULT_PORT, DEFAULT_READ_BUFFER_SIZE,
};
use socket_bridge::{Framing, ServerConfig};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Socket server settings
    #[serde(default)]
    pub server: ServerSettings,
    /// Logging settings
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Socket server settings.
///
/// Durations are in milliseconds; `0` disables the timeout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Host or IP address to listen on
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Per-connection read buffer size in bytes
    pub read_buffer_size: usize,
    /// Wire framing, `raw` or `newline`
    pub framing: Framing,
    /// Longest buffered inbound line under newline framing, in bytes
    pub max_frame_len: usize,
    /// Idle timeout in milliseconds
    pub idle_timeout_ms: u64,
    /// Write timeout in milliseconds
    pub write_timeout_ms: u64,
    /// Maximum number of concurrent connections, `0` for unlimited
    pub max_connections: usize,
    /// Listen backlog
    pub backlog: i32,
    /// Rebroadcast every received message to all connections
    pub relay: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            framing: Framing::Raw,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            idle_timeout_ms: 0,
            write_timeout_ms: 0,
            max_connections: 1000,
            backlog: 1024,
            relay: false,
        }
    }
}

/// Logging system configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to output logs in JSON format
    pub json_format: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

fn millis(value: u64) -> Option<Duration> {
    (value > 0).then(|| Duration::from_millis(value))
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, writes the default configuration to that
    /// path and returns it.
    pub async fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("failed to read {}", path.display()))?;
            let config: AppConfig = toml::from_str(&content)
                .with_context(|| format!("failed to parse {}", path.display()))?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content)
                .await
                .with_context(|| format!("failed to write {}", path.display()))?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Converts the file settings into the library configuration.
    pub fn to_server_config(&self) -> ServerConfig {
        let server = &self.server;
        ServerConfig {
            host: server.host.clone(),
            port: server.port,
            read_buffer_size: server.read_buffer_size,
            framing: server.framing,
            max_frame_len: server.max_frame_len,
            idle_timeout: millis(server.idle_timeout_ms),
            write_timeout: millis(server.write_timeout_ms),
            max_connections: server.max_connections,
            backlog: server.backlog,
            ..ServerConfig::default()
        }
    }

    /// Validates the configuration for consistency and correctness.
    ///
    /// Returns an error string describing the first issue found.
    pub fn validate(&self) -> Result<(), String> {
        self.to_server_config()
            .validate()
            .map_err(|e| e.to_string())?;

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        Ok(())
    }
}

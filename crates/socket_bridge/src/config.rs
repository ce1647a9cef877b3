//! Server configuration types and defaults.
//!
//! This module contains the configuration structure used to construct a
//! [`SocketServer`](crate::SocketServer), along with the framing modes the
//! server can speak on the wire.

use crate::error::ServerError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default host the server binds to.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default port the server binds to.
pub const DEFAULT_PORT: u16 = 8080;

/// Default size of the per-connection read buffer in bytes.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8192;

/// Default cap on a buffered newline-framed message, 128 read buffers.
pub const DEFAULT_MAX_FRAME_LEN: usize = 128 * DEFAULT_READ_BUFFER_SIZE;

/// How payloads are delimited on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Framing {
    /// One payload per read/write operation, no delimiter.
    ///
    /// Payloads larger than one read buffer, or several payloads arriving in
    /// the same segment, are delivered exactly as the socket hands them over.
    #[default]
    Raw,
    /// Every payload is terminated by `\n`.
    ///
    /// Outbound payloads may not contain a line break; inbound data is split
    /// on `\n` and blank lines are dropped.
    Newline,
}

/// Configuration structure for the socket server.
///
/// Contains the bind address plus the per-connection tuning knobs. Timeouts
/// are disabled (`None`) by default: a silent peer then holds its connection
/// open until it closes or the server stops.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host name or IP address to bind to
    pub host: String,

    /// Port to bind to, `0` requests an ephemeral port
    pub port: u16,

    /// Size of the reusable read buffer of each connection
    pub read_buffer_size: usize,

    /// Wire framing used for both directions
    pub framing: Framing,

    /// Longest inbound message newline framing will buffer, in bytes
    pub max_frame_len: usize,

    /// Maximum time a connection may stay silent before it is disconnected
    pub idle_timeout: Option<Duration>,

    /// Maximum time a single write may take before it fails
    pub write_timeout: Option<Duration>,

    /// Maximum number of live connections, `0` means unlimited
    pub max_connections: usize,

    /// Pending-connection queue length passed to `listen(2)`
    pub backlog: i32,

    /// Whether to set `SO_REUSEADDR` on the listening socket
    pub reuse_address: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            framing: Framing::Raw,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            idle_timeout: None,
            write_timeout: None,
            max_connections: 1000,
            backlog: 1024,
            reuse_address: true,
        }
    }
}

impl ServerConfig {
    /// Creates a configuration for the given address with default tuning.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// Returns the `host:port` string handed to the resolver.
    ///
    /// Bare IPv6 literals are wrapped in brackets.
    pub fn bind_target(&self) -> String {
        let host = self.host.trim();
        if host.contains(':') && !host.starts_with('[') {
            format!("[{}]:{}", host, self.port)
        } else {
            format!("{}:{}", host, self.port)
        }
    }

    /// Validates the configuration for consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ServerError> {
        if self.host.trim().is_empty() {
            return Err(ServerError::Config("Host cannot be empty".to_string()));
        }

        if self.read_buffer_size == 0 {
            return Err(ServerError::Config(
                "Read buffer size must be greater than zero".to_string(),
            ));
        }

        if self.max_frame_len == 0 {
            return Err(ServerError::Config(
                "Maximum frame length must be greater than zero".to_string(),
            ));
        }

        if self.backlog <= 0 {
            return Err(ServerError::Config(
                "Listen backlog must be greater than zero".to_string(),
            ));
        }

        if matches!(self.idle_timeout, Some(d) if d.is_zero()) {
            return Err(ServerError::Config(
                "Idle timeout must be non-zero when set".to_string(),
            ));
        }

        if matches!(self.write_timeout, Some(d) if d.is_zero()) {
            return Err(ServerError::Config(
                "Write timeout must be non-zero when set".to_string(),
            ));
        }

        Ok(())
    }
}

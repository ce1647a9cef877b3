//! Connection management for accepted sockets.
//!
//! This module handles the lifecycle of a single client connection: the read
//! loop, guarded writes, the disconnect notice and idempotent closing.

pub mod client;
pub mod framing;

pub use client::Connection;
pub(crate) use client::ConnectionContext;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier of a connection.
///
/// Connection ids are assigned at accept time and key the server's registry
/// for the whole lifetime of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    /// Generates a new random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

//! Payloads the server itself puts on the wire.

use crate::error::ServerError;
use serde::{Deserialize, Serialize};

/// Reason sent to every connection when the server shuts down.
pub const REASON_SHUTDOWN: &str = "shutdown";

/// Reason sent to a connection refused because the server is full.
pub const REASON_SERVER_FULL: &str = "server full";

/// Reason sent to a connection that stayed silent past the idle timeout.
pub const REASON_IDLE_TIMEOUT: &str = "idle timeout";

/// Reason sent to a connection whose inbound message outgrew the frame limit.
pub const REASON_FRAME_TOO_LARGE: &str = "frame too large";

/// Notice sent to a peer immediately before the server closes its connection.
///
/// Serialized as `{"reason":"..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisconnectPayload {
    /// Human-readable explanation of why the connection is being closed
    pub reason: String,
}

impl DisconnectPayload {
    /// Creates a disconnect notice with the given reason.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    /// Serializes the notice as compact JSON text.
    pub fn to_json(&self) -> Result<String, ServerError> {
        Ok(serde_json::to_string(self)?)
    }
}

//! Error types for the socket bridge.
//!
//! Every fallible operation in this crate returns [`ServerError`]. The variants
//! are grouped by how far a failure reaches: configuration and bind errors are
//! fatal to a server instance, validation errors are rejected before any I/O
//! happens, and I/O errors stay local to the connection that produced them.

use thiserror::Error;

/// Errors produced by the server, its connections and payload validation.
#[derive(Error, Debug)]
pub enum ServerError {
    /// The server configuration is unusable (empty host, zero buffer size, ...)
    #[error("Configuration error: {0}")]
    Config(String),

    /// The listening socket could not be created or bound
    #[error("Bind failed for {address}: {source}")]
    Bind {
        /// The `host:port` pair the server tried to bind
        address: String,
        /// The underlying socket error
        #[source]
        source: std::io::Error,
    },

    /// The operation is not allowed in the server's current lifecycle state
    #[error("Invalid server state: {0}")]
    InvalidState(String),

    /// The payload was empty or contained only whitespace
    #[error("Payload is empty")]
    EmptyPayload,

    /// The payload is not syntactically valid JSON
    #[error("Payload is not valid JSON: {0}")]
    InvalidJson(String),

    /// The payload cannot be expressed with the configured framing
    #[error("Payload violates framing: {0}")]
    InvalidFraming(String),

    /// An inbound message grew past the configured frame length
    #[error("Inbound frame exceeds {limit} bytes")]
    FrameTooLarge {
        /// The configured `max_frame_len`
        limit: usize,
    },

    /// The connection has already been closed
    #[error("Connection is closed")]
    ConnectionClosed,

    /// No live connection is registered under the given id
    #[error("Connection not found: {0}")]
    NotFound(String),

    /// A read or write did not complete within the configured timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Transport-level failure on a socket
    #[error("Network error: {0}")]
    Io(#[from] std::io::Error),

    /// A payload value could not be serialized to JSON
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ServerError {
    /// Returns `true` for errors raised by payload validation.
    ///
    /// Validation errors are raised before any byte reaches the network, so a
    /// caller can retry with a corrected payload on the same connection.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ServerError::EmptyPayload | ServerError::InvalidJson(_) | ServerError::InvalidFraming(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_classification() {
        assert!(ServerError::EmptyPayload.is_validation());
        assert!(ServerError::InvalidJson("eof".to_string()).is_validation());
        assert!(ServerError::InvalidFraming("newline".to_string()).is_validation());
        assert!(!ServerError::ConnectionClosed.is_validation());
        assert!(!ServerError::Timeout("write".to_string()).is_validation());
        assert!(!ServerError::FrameTooLarge { limit: 64 }.is_validation());
    }

    #[test]
    fn test_bind_error_display() {
        let err = ServerError::Bind {
            address: "127.0.0.1:80".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        let text = err.to_string();
        assert!(text.contains("127.0.0.1:80"));
        assert!(text.contains("denied"));
    }
}

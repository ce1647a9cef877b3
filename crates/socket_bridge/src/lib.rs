//! # Socket Bridge
//!
//! An asynchronous TCP socket server that lets a game-server process exchange
//! JSON messages with external clients (dashboards, companion services,
//! automation tools) over a raw socket, independent of the host platform's
//! own messaging bus.
//!
//! ## Architecture Overview
//!
//! * **[`SocketServer`]** - Owns the listening socket, the accept loop, the
//!   registry of live connections, broadcast and the shutdown sequence
//! * **[`Connection`]** - Owns one accepted socket, runs its read loop and
//!   serializes writes behind a per-connection send lock
//! * **[`EventSink`]** - Receives lifecycle notifications (server started and
//!   stopped, connection opened and closed, message received and sent)
//! * **[`ServerLogger`]** - Injected reporting capability
//! * **[`is_valid_json`]** - Guard applied before every outbound write
//!
//! ## Message Flow
//!
//! 1. A client connects; the server registers a [`Connection`] and emits
//!    [`ServerEvent::ConnectionOpened`]
//! 2. Bytes read from the socket are decoded as UTF-8 and emitted as
//!    [`ServerEvent::MessageReceived`]
//! 3. The host answers with [`Connection::write`] or fans a payload out with
//!    [`SocketServer::broadcast`]
//! 4. On [`SocketServer::stop`] every client receives `{"reason":"shutdown"}`
//!    before its socket is closed
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use socket_bridge::{ChannelEventSink, ServerConfig, ServerEvent, SocketServer, TracingLogger};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), socket_bridge::ServerError> {
//! let (sink, mut events) = ChannelEventSink::new();
//! let server = SocketServer::new(
//!     ServerConfig::new("127.0.0.1", 0),
//!     Arc::new(TracingLogger::default()),
//!     Arc::new(sink),
//! );
//! server.start().await?;
//!
//! while let Some(event) = events.recv().await {
//!     if let ServerEvent::MessageReceived { connection, text } = event {
//!         if text.contains("ping") {
//!             connection.write(r#"{"pong":true}"#).await?;
//!         }
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod logging;
pub mod protocol;
pub mod server;
pub mod validation;

mod utils;

#[cfg(test)]
mod test_support;

pub use config::{Framing, ServerConfig};
pub use connection::{Connection, ConnectionId};
pub use error::ServerError;
pub use events::{ChannelEventSink, EventSink, FnEventSink, NoopEventSink, ServerEvent};
pub use logging::{ServerLogger, TracingLogger};
pub use protocol::DisconnectPayload;
pub use server::{BroadcastFailure, BroadcastReport, ServerState, SocketServer};
pub use validation::{is_valid_json, validate_payload};

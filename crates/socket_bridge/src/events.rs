//! Lifecycle notifications emitted by the server.
//!
//! The server never calls back into host code directly; it hands every
//! [`ServerEvent`] to the [`EventSink`] supplied at construction. Events are
//! delivered on the task that produced them, so a slow sink slows down that
//! task (the accept loop, or the read loop of one connection) and nothing
//! else.

use crate::connection::Connection;
use async_trait::async_trait;
use std::net::SocketAddr;
use tokio::sync::mpsc;

/// A lifecycle notification.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// The listening socket is bound and the accept loop is about to start
    ServerStarted {
        /// The address actually bound (resolves ephemeral ports)
        local_addr: SocketAddr,
    },

    /// The shutdown sequence finished
    ServerStopped,

    /// A connection was accepted and registered
    ConnectionOpened {
        /// The new connection
        connection: Connection,
    },

    /// A connection was closed by either side
    ConnectionClosed {
        /// The closed connection; writes to it fail
        connection: Connection,
    },

    /// Text was decoded from a connection
    MessageReceived {
        /// The connection the text arrived on
        connection: Connection,
        /// The decoded text
        text: String,
    },

    /// A payload was written to a connection
    MessageSent {
        /// The connection the payload was written to
        connection: Connection,
        /// The payload as handed to `write`, without framing
        text: String,
    },
}

impl ServerEvent {
    /// Short, stable name of the event kind.
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::ServerStarted { .. } => "server_started",
            ServerEvent::ServerStopped => "server_stopped",
            ServerEvent::ConnectionOpened { .. } => "connection_opened",
            ServerEvent::ConnectionClosed { .. } => "connection_closed",
            ServerEvent::MessageReceived { .. } => "message_received",
            ServerEvent::MessageSent { .. } => "message_sent",
        }
    }

    /// The connection this event concerns, if any.
    pub fn connection(&self) -> Option<&Connection> {
        match self {
            ServerEvent::ConnectionOpened { connection }
            | ServerEvent::ConnectionClosed { connection }
            | ServerEvent::MessageReceived { connection, .. }
            | ServerEvent::MessageSent { connection, .. } => Some(connection),
            ServerEvent::ServerStarted { .. } | ServerEvent::ServerStopped => None,
        }
    }
}

/// Receiver of server lifecycle events.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Handles one event.
    async fn on_event(&self, event: ServerEvent);
}

/// Sink that discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventSink;

#[async_trait]
impl EventSink for NoopEventSink {
    async fn on_event(&self, _event: ServerEvent) {}
}

/// Sink that forwards every event into an unbounded tokio channel.
///
/// Events sent after the receiver has been dropped are discarded.
#[derive(Debug, Clone)]
pub struct ChannelEventSink {
    sender: mpsc::UnboundedSender<ServerEvent>,
}

impl ChannelEventSink {
    /// Creates the sink together with the receiving end of its channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ServerEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl EventSink for ChannelEventSink {
    async fn on_event(&self, event: ServerEvent) {
        let _ = self.sender.send(event);
    }
}

/// Sink that runs a synchronous closure for every event.
pub struct FnEventSink<F>
where
    F: Fn(ServerEvent) + Send + Sync,
{
    handler: F,
}

impl<F> FnEventSink<F>
where
    F: Fn(ServerEvent) + Send + Sync,
{
    /// Wraps `handler` as an event sink.
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl<F> EventSink for FnEventSink<F>
where
    F: Fn(ServerEvent) + Send + Sync,
{
    async fn on_event(&self, event: ServerEvent) {
        (self.handler)(event);
    }
}

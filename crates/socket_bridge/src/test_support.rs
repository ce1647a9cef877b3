//! Shared helpers for unit tests.

use crate::config::ServerConfig;
use crate::connection::{Connection, ConnectionContext};
use crate::events::{ChannelEventSink, ServerEvent};
use crate::logging::ServerLogger;
use crate::server::ConnectionRegistry;
use std::error::Error;
use std::sync::{Arc, Mutex};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{timeout, Duration};

/// Logger that keeps every record in memory.
#[derive(Debug, Default)]
pub struct RecordingLogger {
    records: Mutex<Vec<(&'static str, String)>>,
}

impl RecordingLogger {
    fn push(&self, level: &'static str, message: String) {
        self.records.lock().unwrap().push((level, message));
    }

    fn level(&self, level: &str) -> Vec<String> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, m)| m.clone())
            .collect()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.level("warning")
    }

    pub fn failures(&self) -> Vec<String> {
        let mut all = self.level("severe");
        all.extend(self.level("exception"));
        all
    }
}

impl ServerLogger for RecordingLogger {
    fn info(&self, message: &str) {
        self.push("info", message.to_string());
    }

    fn warning(&self, message: &str) {
        self.push("warning", message.to_string());
    }

    fn severe(&self, message: &str) {
        self.push("severe", message.to_string());
    }

    fn exception(&self, message: &str, error: &dyn Error) {
        self.push("exception", format!("{}: {}", message, error));
    }
}

/// A server-side connection wired to a registry, plus the client end.
pub struct ConnectionHarness {
    pub connection: Connection,
    pub client: TcpStream,
    pub registry: Arc<ConnectionRegistry>,
    pub events: UnboundedReceiver<ServerEvent>,
}

pub async fn connection_pair(config: ServerConfig) -> ConnectionHarness {
    connection_pair_with_logger(config, Arc::new(RecordingLogger::default())).await
}

pub async fn connection_pair_with_logger(
    config: ServerConfig,
    logger: Arc<RecordingLogger>,
) -> ConnectionHarness {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
    let client = client.unwrap();
    let (stream, _) = accepted.unwrap();

    let registry = Arc::new(ConnectionRegistry::new());
    let (sink, events) = ChannelEventSink::new();
    let context = Arc::new(ConnectionContext::new(
        &config,
        logger,
        Arc::new(sink),
        &registry,
    ));

    let connection = Connection::new(stream, context);
    registry.insert(connection.clone());

    ConnectionHarness {
        connection,
        client,
        registry,
        events,
    }
}

pub async fn recv_event(events: &mut UnboundedReceiver<ServerEvent>) -> ServerEvent {
    timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

//! Client connection representation and management.
//!
//! A [`Connection`] owns one accepted socket. Its read half is driven by the
//! read loop on a dedicated task; its write half sits behind a per-connection
//! send lock so concurrent writers never interleave bytes.

use super::framing::{self, FrameSplitter, Utf8Decoder};
use super::ConnectionId;
use crate::config::{Framing, ServerConfig};
use crate::error::ServerError;
use crate::events::{EventSink, ServerEvent};
use crate::logging::ServerLogger;
use crate::protocol::{DisconnectPayload, REASON_FRAME_TOO_LARGE, REASON_IDLE_TIMEOUT};
use crate::server::ConnectionRegistry;
use crate::utils::wait_until_set;
use crate::validation::validate_payload;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, SystemTime};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::debug;

/// Remote address reported when the peer address cannot be resolved.
pub const UNKNOWN_ADDRESS: &str = "unknown";

/// Upper bound on delivering a disconnect notice, including the wait for the
/// send lock. A peer that stopped reading cannot hold up `close()` longer.
pub const DISCONNECT_NOTICE_TIMEOUT: Duration = Duration::from_secs(1);

/// Resources a connection borrows from the server that accepted it.
pub(crate) struct ConnectionContext {
    pub framing: Framing,
    pub read_buffer_size: usize,
    pub max_frame_len: usize,
    pub idle_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
    pub logger: Arc<dyn ServerLogger>,
    pub events: Arc<dyn EventSink>,
    /// Non-owning: a connection never keeps the registry alive
    pub registry: Weak<ConnectionRegistry>,
}

impl ConnectionContext {
    pub fn new(
        config: &ServerConfig,
        logger: Arc<dyn ServerLogger>,
        events: Arc<dyn EventSink>,
        registry: &Arc<ConnectionRegistry>,
    ) -> Self {
        Self {
            framing: config.framing,
            read_buffer_size: config.read_buffer_size,
            max_frame_len: config.max_frame_len,
            idle_timeout: config.idle_timeout,
            write_timeout: config.write_timeout,
            logger,
            events,
            registry: Arc::downgrade(registry),
        }
    }
}

/// Handle to one accepted client connection.
///
/// Cloning the handle is cheap; every clone refers to the same socket.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

struct ConnectionInner {
    id: ConnectionId,
    remote_address: String,
    connected_at: SystemTime,
    /// Taken once by the read loop
    reader: Mutex<Option<OwnedReadHalf>>,
    /// Per-connection send lock; `None` once closed
    writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
    closed: AtomicBool,
    close_signal: watch::Sender<bool>,
    context: Arc<ConnectionContext>,
}

impl Connection {
    /// Wraps an accepted socket.
    ///
    /// The remote address is resolved here, once; failure to resolve it is
    /// logged and recorded as [`UNKNOWN_ADDRESS`].
    pub(crate) fn new(stream: TcpStream, context: Arc<ConnectionContext>) -> Self {
        let remote_address = match stream.peer_addr() {
            Ok(addr) => addr.to_string(),
            Err(e) => {
                context
                    .logger
                    .warning(&format!("Could not resolve remote address: {}", e));
                UNKNOWN_ADDRESS.to_string()
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY for {}: {}", remote_address, e);
        }

        let (reader, writer) = stream.into_split();
        let (close_signal, _) = watch::channel(false);

        Self {
            inner: Arc::new(ConnectionInner {
                id: ConnectionId::new(),
                remote_address,
                connected_at: SystemTime::now(),
                reader: Mutex::new(Some(reader)),
                writer: tokio::sync::Mutex::new(Some(writer)),
                closed: AtomicBool::new(false),
                close_signal,
                context,
            }),
        }
    }

    /// The connection's unique id.
    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    /// The peer address as resolved at accept time.
    pub fn remote_address(&self) -> &str {
        &self.inner.remote_address
    }

    /// When the connection was accepted.
    pub fn connected_at(&self) -> SystemTime {
        self.inner.connected_at
    }

    /// Returns `true` once [`close`](Self::close) has started.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Runs the read loop until the peer closes, a read fails, the idle
    /// timeout expires or the connection is closed locally.
    ///
    /// Only the first call does anything; the read half is consumed by it.
    pub(crate) async fn run(self) {
        let reader = self
            .inner
            .reader
            .lock()
            .ok()
            .and_then(|mut slot| slot.take());
        let Some(mut reader) = reader else {
            debug!("Read loop for connection {} already started", self.id());
            return;
        };

        let context = &self.inner.context;
        let mut close_rx = self.inner.close_signal.subscribe();
        let mut buffer = vec![0u8; context.read_buffer_size];
        let mut decoder = Utf8Decoder::new();
        let mut splitter = FrameSplitter::new(context.framing, context.max_frame_len);
        let mut notice: Option<&'static str> = None;

        loop {
            let read = tokio::select! {
                biased;
                _ = wait_until_set(&mut close_rx) => break,
                result = read_chunk(&mut reader, &mut buffer, context.idle_timeout) => result,
            };

            match read {
                Ok(0) => {
                    if decoder.pending_len() > 0 {
                        context.logger.warning(&format!(
                            "Dropped {} byte(s) of a truncated UTF-8 sequence from {} at end of stream",
                            decoder.pending_len(),
                            self.remote_address()
                        ));
                    }
                    debug!("Connection {} reached end of stream", self.id());
                    break;
                }
                Ok(n) => {
                    let chunk = decoder.decode(&buffer[..n]);
                    if chunk.malformed > 0 {
                        context.logger.warning(&format!(
                            "Skipped {} malformed UTF-8 sequence(s) from {}",
                            chunk.malformed,
                            self.remote_address()
                        ));
                    }

                    let frames = match splitter.push(chunk.text) {
                        Ok(frames) => frames,
                        Err(e) => {
                            context.logger.warning(&format!(
                                "Disconnecting {} from {}: {}",
                                self.id(),
                                self.remote_address(),
                                e
                            ));
                            notice = Some(REASON_FRAME_TOO_LARGE);
                            break;
                        }
                    };

                    for text in frames {
                        context
                            .events
                            .on_event(ServerEvent::MessageReceived {
                                connection: self.clone(),
                                text,
                            })
                            .await;
                    }
                }
                Err(ServerError::Timeout(reason)) => {
                    context.logger.info(&format!(
                        "Connection {} from {} idle: {}",
                        self.id(),
                        self.remote_address(),
                        reason
                    ));
                    notice = Some(REASON_IDLE_TIMEOUT);
                    break;
                }
                Err(e) => {
                    if !self.is_closed() {
                        context.logger.exception(
                            &format!(
                                "Read failed on connection {} from {}",
                                self.id(),
                                self.remote_address()
                            ),
                            &e,
                        );
                    }
                    break;
                }
            }
        }

        drop(reader);

        match notice {
            Some(reason) => self.disconnect(reason).await,
            None => self.close().await,
        }
    }

    /// Writes one JSON payload to the peer.
    ///
    /// The payload is validated first; an invalid payload is rejected and no
    /// byte is written. Writes are serialized by the per-connection send lock,
    /// so payloads written in sequence by one caller arrive in that sequence.
    /// A transport failure is logged and closes the connection.
    ///
    /// # Errors
    ///
    /// * [`ServerError::EmptyPayload`], [`ServerError::InvalidJson`] or
    ///   [`ServerError::InvalidFraming`] when validation fails
    /// * [`ServerError::ConnectionClosed`] when the connection is closed
    /// * [`ServerError::Io`] or [`ServerError::Timeout`] when the send fails
    pub async fn write(&self, text: &str) -> Result<(), ServerError> {
        validate_payload(text)?;
        let frame = framing::encode(self.inner.context.framing, text)?;
        let result = self.send_frame(text, &frame).await;

        if let Err(e) = &result {
            if !matches!(e, ServerError::ConnectionClosed) {
                self.inner.context.logger.exception(
                    &format!(
                        "Write failed on connection {} from {}",
                        self.id(),
                        self.remote_address()
                    ),
                    e,
                );
            }
        }
        result
    }

    /// Sends an already validated and encoded payload.
    ///
    /// Does not log: every caller reports failures its own way. Both the wait
    /// for the send lock and the write itself give way to `close()`, which
    /// then reports [`ServerError::ConnectionClosed`].
    pub(crate) async fn send_frame(&self, text: &str, frame: &[u8]) -> Result<(), ServerError> {
        if self.is_closed() {
            return Err(ServerError::ConnectionClosed);
        }

        let mut close_rx = self.inner.close_signal.subscribe();
        let result = tokio::select! {
            biased;
            _ = wait_until_set(&mut close_rx) => Err(ServerError::ConnectionClosed),
            result = self.locked_write(frame) => result,
        };

        match result {
            Ok(()) => {
                self.inner
                    .context
                    .events
                    .on_event(ServerEvent::MessageSent {
                        connection: self.clone(),
                        text: text.to_string(),
                    })
                    .await;
                Ok(())
            }
            Err(ServerError::ConnectionClosed) => Err(ServerError::ConnectionClosed),
            Err(e) => {
                self.close().await;
                Err(e)
            }
        }
    }

    async fn locked_write(&self, frame: &[u8]) -> Result<(), ServerError> {
        let mut guard = self.inner.writer.lock().await;
        match guard.as_mut() {
            Some(writer) => write_frame(writer, frame, self.inner.context.write_timeout).await,
            None => Err(ServerError::ConnectionClosed),
        }
    }

    /// Sends a disconnect notice carrying `reason`, then closes.
    ///
    /// The notice gets at most [`DISCONNECT_NOTICE_TIMEOUT`]. Failing to
    /// deliver it is logged as a warning; the connection is closed either way.
    pub async fn disconnect(&self, reason: &str) {
        if self.is_closed() {
            return;
        }

        let notice = self.send_disconnect_notice(reason);
        let sent = match timeout(DISCONNECT_NOTICE_TIMEOUT, notice).await {
            Ok(result) => result,
            Err(_) => Err(ServerError::Timeout(format!(
                "disconnect notice not delivered within {:?}",
                DISCONNECT_NOTICE_TIMEOUT
            ))),
        };
        if let Err(e) = sent {
            self.inner.context.logger.warning(&format!(
                "Failed to send disconnect notice to {} ({}): {}",
                self.id(),
                self.remote_address(),
                e
            ));
        }

        self.close().await;
    }

    async fn send_disconnect_notice(&self, reason: &str) -> Result<(), ServerError> {
        let payload = DisconnectPayload::new(reason).to_json()?;
        let frame = framing::encode(self.inner.context.framing, &payload)?;
        self.send_frame(&payload, &frame).await
    }

    /// Closes the connection.
    ///
    /// Idempotent: the first call deregisters the connection, stops the read
    /// loop, shuts the socket down and emits exactly one connection-closed
    /// event. Later calls return immediately. The close signal goes out
    /// before the send lock is taken, so a write stalled on a peer that
    /// stopped reading is abandoned rather than waited for.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let context = &self.inner.context;

        if let Some(registry) = context.registry.upgrade() {
            registry.remove(self.id());
        }

        self.inner.close_signal.send_replace(true);

        let writer = self.inner.writer.lock().await.take();
        if let Some(mut writer) = writer {
            if let Err(e) = writer.shutdown().await {
                debug!("Socket shutdown for {} failed: {}", self.remote_address(), e);
            }
        }

        context.logger.info(&format!(
            "Connection {} from {} closed",
            self.id(),
            self.remote_address()
        ));

        context
            .events
            .on_event(ServerEvent::ConnectionClosed {
                connection: self.clone(),
            })
            .await;
    }

    /// Refuses a connection that was never registered.
    ///
    /// Sends the notice straight to the socket and shuts it down without
    /// emitting any event: the host never saw this connection open.
    pub(crate) async fn reject(&self, reason: &str) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.close_signal.send_replace(true);

        let context = &self.inner.context;
        let writer = self.inner.writer.lock().await.take();
        let Some(mut writer) = writer else {
            return;
        };

        let notice = DisconnectPayload::new(reason)
            .to_json()
            .and_then(|payload| framing::encode(context.framing, &payload));
        let sent = match notice {
            Ok(frame) => write_frame(&mut writer, &frame, context.write_timeout).await,
            Err(e) => Err(e),
        };
        if let Err(e) = sent {
            context.logger.warning(&format!(
                "Failed to send rejection notice to {}: {}",
                self.remote_address(),
                e
            ));
        }

        if let Err(e) = writer.shutdown().await {
            debug!("Socket shutdown for {} failed: {}", self.remote_address(), e);
        }
    }
}

#[cfg(test)]
impl Connection {
    /// Drops the write half while leaving the connection registered, the way
    /// a socket looks between a transport failure and its detection.
    pub(crate) async fn break_transport(&self) {
        drop(self.inner.writer.lock().await.take());
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("remote_address", &self.inner.remote_address)
            .field("closed", &self.is_closed())
            .finish()
    }
}

async fn read_chunk(
    reader: &mut OwnedReadHalf,
    buffer: &mut [u8],
    idle_timeout: Option<Duration>,
) -> Result<usize, ServerError> {
    match idle_timeout {
        Some(limit) => match timeout(limit, reader.read(buffer)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ServerError::Timeout(format!(
                "no data received for {:?}",
                limit
            ))),
        },
        None => Ok(reader.read(buffer).await?),
    }
}

async fn write_frame(
    writer: &mut OwnedWriteHalf,
    frame: &[u8],
    write_timeout: Option<Duration>,
) -> Result<(), ServerError> {
    let send = async {
        writer.write_all(frame).await?;
        writer.flush().await
    };

    match write_timeout {
        Some(limit) => match timeout(limit, send).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ServerError::Timeout(format!(
                "write did not complete within {:?}",
                limit
            ))),
        },
        None => Ok(send.await?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{connection_pair, recv_event, RecordingLogger};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::time::{sleep, timeout, Duration};

    /// A JSON string big enough to fill both socket buffers on loopback.
    fn oversized_payload() -> String {
        format!("\"{}\"", "x".repeat(32 << 20))
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_write_rejects_invalid_payloads_without_sending() {
        let harness = connection_pair(ServerConfig::default()).await;
        let connection = harness.connection.clone();
        let mut client = harness.client;

        assert!(matches!(
            connection.write("not json").await,
            Err(ServerError::InvalidJson(_))
        ));
        assert!(matches!(connection.write("").await, Err(ServerError::EmptyPayload)));
        assert!(matches!(connection.write("   ").await, Err(ServerError::EmptyPayload)));

        connection.write("{\"a\":1}").await.unwrap();
        connection.close().await;

        let mut received = Vec::new();
        timeout(Duration::from_secs(5), client.read_to_end(&mut received))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, b"{\"a\":1}");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_write_emits_message_sent() {
        let mut harness = connection_pair(ServerConfig::default()).await;

        harness.connection.write("{\"hello\":\"world\"}").await.unwrap();

        match recv_event(&mut harness.events).await {
            ServerEvent::MessageSent { connection, text } => {
                assert_eq!(connection.id(), harness.connection.id());
                assert_eq!(text, "{\"hello\":\"world\"}");
            }
            other => panic!("unexpected event: {:?}", other.name()),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_close_is_idempotent() {
        let mut harness = connection_pair(ServerConfig::default()).await;
        let id = harness.connection.id();
        assert!(harness.registry.contains(id));

        harness.connection.close().await;
        harness.connection.close().await;
        harness.connection.clone().close().await;

        assert!(harness.connection.is_closed());
        assert!(!harness.registry.contains(id));

        let event = recv_event(&mut harness.events).await;
        assert_eq!(event.name(), "connection_closed");
        assert!(harness.events.try_recv().is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_write_after_close_fails() {
        let harness = connection_pair(ServerConfig::default()).await;
        harness.connection.close().await;

        assert!(matches!(
            harness.connection.write("{}").await,
            Err(ServerError::ConnectionClosed)
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_disconnect_sends_reason_then_closes() {
        let harness = connection_pair(ServerConfig::default()).await;
        let mut client = harness.client;

        harness.connection.disconnect("maintenance").await;
        assert!(harness.connection.is_closed());
        assert!(harness.registry.is_empty());

        let mut received = String::new();
        timeout(Duration::from_secs(5), client.read_to_string(&mut received))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, r#"{"reason":"maintenance"}"#);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_read_loop_emits_messages_and_closes_on_eof() {
        let mut harness = connection_pair(ServerConfig::default()).await;
        let task = tokio::spawn(harness.connection.clone().run());

        harness.client.write_all(b"{\"ping\":true}").await.unwrap();
        match recv_event(&mut harness.events).await {
            ServerEvent::MessageReceived { text, .. } => assert_eq!(text, "{\"ping\":true}"),
            other => panic!("unexpected event: {:?}", other.name()),
        }

        drop(harness.client);
        timeout(Duration::from_secs(5), task).await.unwrap().unwrap();

        assert_eq!(recv_event(&mut harness.events).await.name(), "connection_closed");
        assert!(harness.connection.is_closed());
        assert!(harness.registry.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_read_loop_stops_when_closed_locally() {
        let harness = connection_pair(ServerConfig::default()).await;
        let task = tokio::spawn(harness.connection.clone().run());

        harness.connection.close().await;
        timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_newline_framing_splits_messages() {
        let mut config = ServerConfig::default();
        config.framing = Framing::Newline;
        let mut harness = connection_pair(config).await;
        let _task = tokio::spawn(harness.connection.clone().run());

        harness
            .client
            .write_all(b"{\"a\":1}\n{\"b\":2}\n")
            .await
            .unwrap();

        let mut texts = Vec::new();
        for _ in 0..2 {
            match recv_event(&mut harness.events).await {
                ServerEvent::MessageReceived { text, .. } => texts.push(text),
                other => panic!("unexpected event: {:?}", other.name()),
            }
        }
        assert_eq!(texts, vec!["{\"a\":1}", "{\"b\":2}"]);

        assert!(matches!(
            harness.connection.write("{\n}").await,
            Err(ServerError::InvalidFraming(_))
        ));
        harness.connection.write("{\"c\":3}").await.unwrap();

        let mut buf = [0u8; 8];
        timeout(Duration::from_secs(5), harness.client.read_exact(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf, b"{\"c\":3}\n");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_idle_timeout_disconnects() {
        let mut config = ServerConfig::default();
        config.idle_timeout = Some(Duration::from_millis(100));
        let harness = connection_pair(config).await;
        let mut client = harness.client;
        let task = tokio::spawn(harness.connection.clone().run());

        let mut received = String::new();
        timeout(Duration::from_secs(5), client.read_to_string(&mut received))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, r#"{"reason":"idle timeout"}"#);

        timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
        assert!(harness.connection.is_closed());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_malformed_utf8_is_logged_and_skipped() {
        let logger = Arc::new(RecordingLogger::default());
        let mut harness =
            crate::test_support::connection_pair_with_logger(ServerConfig::default(), logger.clone())
                .await;
        let _task = tokio::spawn(harness.connection.clone().run());

        harness.client.write_all(&[b'[', 0xFF, b']']).await.unwrap();
        match recv_event(&mut harness.events).await {
            ServerEvent::MessageReceived { text, .. } => assert_eq!(text, "[]"),
            other => panic!("unexpected event: {:?}", other.name()),
        }
        assert_eq!(logger.warnings().len(), 1);
        assert!(!harness.connection.is_closed());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_reject_sends_notice_without_events() {
        let mut harness = connection_pair(ServerConfig::default()).await;
        let mut client = harness.client;

        harness.connection.reject("server full").await;
        drop(harness.connection);

        let mut received = String::new();
        timeout(Duration::from_secs(5), client.read_to_string(&mut received))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, r#"{"reason":"server full"}"#);
        assert!(harness.events.try_recv().is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_close_abandons_stalled_write() {
        let harness = connection_pair(ServerConfig::default()).await;
        // Peer never reads
        let _client = harness.client;

        let connection = harness.connection.clone();
        let writer = tokio::spawn(async move { connection.write(&oversized_payload()).await });
        sleep(Duration::from_millis(300)).await;

        timeout(Duration::from_secs(2), harness.connection.close())
            .await
            .expect("close waited behind a stalled write");

        let result = timeout(Duration::from_secs(2), writer).await.unwrap().unwrap();
        assert!(matches!(result, Err(ServerError::ConnectionClosed)));
        assert!(harness.registry.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_disconnect_is_bounded_by_stalled_write() {
        let logger = Arc::new(RecordingLogger::default());
        let harness =
            crate::test_support::connection_pair_with_logger(ServerConfig::default(), logger.clone())
                .await;
        let _client = harness.client;

        let connection = harness.connection.clone();
        let writer = tokio::spawn(async move { connection.write(&oversized_payload()).await });
        sleep(Duration::from_millis(300)).await;

        timeout(
            DISCONNECT_NOTICE_TIMEOUT + Duration::from_secs(2),
            harness.connection.disconnect("shutdown"),
        )
        .await
        .expect("disconnect waited behind a stalled write");

        assert!(harness.connection.is_closed());
        assert!(matches!(
            timeout(Duration::from_secs(2), writer).await.unwrap().unwrap(),
            Err(ServerError::ConnectionClosed)
        ));
        assert!(logger
            .warnings()
            .iter()
            .any(|w| w.contains("Failed to send disconnect notice")));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_write_transport_failure_logged_once_and_closes() {
        let logger = Arc::new(RecordingLogger::default());
        let mut config = ServerConfig::default();
        config.write_timeout = Some(Duration::from_millis(200));
        let harness = crate::test_support::connection_pair_with_logger(config, logger.clone()).await;
        let _client = harness.client;

        let result = timeout(
            Duration::from_secs(10),
            harness.connection.write(&oversized_payload()),
        )
        .await
        .unwrap();

        assert!(matches!(result, Err(ServerError::Timeout(_))));
        assert!(harness.connection.is_closed());
        assert!(harness.registry.is_empty());
        assert_eq!(logger.failures().len(), 1);
        assert!(logger.warnings().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_oversized_line_disconnects() {
        let logger = Arc::new(RecordingLogger::default());
        let mut config = ServerConfig::default();
        config.framing = Framing::Newline;
        config.max_frame_len = 64;
        let mut harness =
            crate::test_support::connection_pair_with_logger(config, logger.clone()).await;
        let task = tokio::spawn(harness.connection.clone().run());

        // One segment, read in one go, so nothing is left unread on close
        harness.client.write_all(&[b'1'; 100]).await.unwrap();

        let mut received = String::new();
        timeout(Duration::from_secs(5), harness.client.read_to_string(&mut received))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, "{\"reason\":\"frame too large\"}\n");

        timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
        assert!(harness.connection.is_closed());
        assert!(logger.warnings().iter().any(|w| w.contains("exceeds 64 bytes")));
        assert_eq!(recv_event(&mut harness.events).await.name(), "message_sent");
        assert_eq!(recv_event(&mut harness.events).await.name(), "connection_closed");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_truncated_utf8_at_end_of_stream_is_logged() {
        let logger = Arc::new(RecordingLogger::default());
        let mut harness =
            crate::test_support::connection_pair_with_logger(ServerConfig::default(), logger.clone())
                .await;
        let task = tokio::spawn(harness.connection.clone().run());

        // '"' followed by the first byte of a two-byte character
        harness.client.write_all(&[b'"', 0xC3]).await.unwrap();
        match recv_event(&mut harness.events).await {
            ServerEvent::MessageReceived { text, .. } => assert_eq!(text, "\""),
            other => panic!("unexpected event: {:?}", other.name()),
        }

        harness.client.shutdown().await.unwrap();
        timeout(Duration::from_secs(5), task).await.unwrap().unwrap();

        let warnings = logger.warnings();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("Dropped 1 byte(s) of a truncated UTF-8 sequence"));
    }
}

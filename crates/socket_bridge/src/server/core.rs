//! Core socket server implementation.
//!
//! This module contains [`SocketServer`]: the listening socket, the accept
//! loop, broadcast and the shutdown sequence.

use super::listener;
use super::registry::ConnectionRegistry;
use crate::config::ServerConfig;
use crate::connection::{framing, Connection, ConnectionContext, ConnectionId};
use crate::error::ServerError;
use crate::events::{EventSink, NoopEventSink, ServerEvent};
use crate::logging::{ServerLogger, TracingLogger};
use crate::protocol::{REASON_SERVER_FULL, REASON_SHUTDOWN};
use crate::utils::wait_until_set;
use crate::validation::validate_payload;
use futures::future::join_all;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{sleep, Duration};
use tracing::debug;

/// Pause after a failed accept before trying again.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Lifecycle state of a [`SocketServer`].
///
/// `Created → Running → Stopped`. `Stopped` is terminal: a server whose bind
/// failed, or that has been stopped, cannot be started again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Constructed, not yet bound
    Created,
    /// Bound and accepting connections
    Running,
    /// Shut down, or failed to bind
    Stopped,
}

impl std::fmt::Display for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ServerState::Created => "created",
            ServerState::Running => "running",
            ServerState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// One connection a broadcast could not reach.
#[derive(Debug)]
pub struct BroadcastFailure {
    /// Id of the connection that failed
    pub connection_id: ConnectionId,
    /// Remote address of the connection that failed
    pub remote_address: String,
    /// Why the write failed
    pub error: ServerError,
}

/// Outcome of a [`SocketServer::broadcast`].
#[derive(Debug, Default)]
pub struct BroadcastReport {
    /// Number of connections the payload was written to
    pub delivered: usize,
    /// Connections the payload could not be written to
    pub failures: Vec<BroadcastFailure>,
}

impl BroadcastReport {
    /// Number of connections the payload could not be written to.
    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    /// Returns `true` if every targeted connection received the payload.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// State shared between the server handle and its accept task.
struct ServerShared {
    config: ServerConfig,
    registry: Arc<ConnectionRegistry>,
    logger: Arc<dyn ServerLogger>,
    events: Arc<dyn EventSink>,
    connection_context: Arc<ConnectionContext>,
    /// Set by `stop()`; true→false only
    running: AtomicBool,
    /// Claimed by the first `start()` call
    start_claimed: AtomicBool,
    state: watch::Sender<ServerState>,
    shutdown_signal: watch::Sender<bool>,
    local_addr: OnceLock<SocketAddr>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl ServerShared {
    fn transition(&self, from: ServerState, to: ServerState) -> bool {
        self.state.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                false
            }
        })
    }

    fn current_state(&self) -> ServerState {
        *self.state.borrow()
    }
}

/// Asynchronous JSON-over-TCP server.
///
/// The handle is cheap to clone; all clones drive the same server. A server
/// is single-use: once stopped (or after a failed bind) construct a new one.
///
/// # Example
///
/// ```rust,no_run
/// use socket_bridge::{ServerConfig, SocketServer};
///
/// # async fn run() -> Result<(), socket_bridge::ServerError> {
/// let server = SocketServer::with_defaults(ServerConfig::new("127.0.0.1", 0));
/// let addr = server.start().await?;
/// println!("listening on {addr}");
///
/// server.broadcast(r#"{"hello":"everyone"}"#).await?;
/// server.stop().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct SocketServer {
    shared: Arc<ServerShared>,
}

impl SocketServer {
    /// Creates a server with an injected logger and event sink.
    ///
    /// Nothing is bound until [`start`](Self::start) is called.
    pub fn new(
        config: ServerConfig,
        logger: Arc<dyn ServerLogger>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let connection_context = Arc::new(ConnectionContext::new(
            &config,
            logger.clone(),
            events.clone(),
            &registry,
        ));
        let (state, _) = watch::channel(ServerState::Created);
        let (shutdown_signal, _) = watch::channel(false);

        Self {
            shared: Arc::new(ServerShared {
                config,
                registry,
                logger,
                events,
                connection_context,
                running: AtomicBool::new(false),
                start_claimed: AtomicBool::new(false),
                state,
                shutdown_signal,
                local_addr: OnceLock::new(),
                accept_task: Mutex::new(None),
            }),
        }
    }

    /// Creates a server that logs through `tracing` and discards events.
    pub fn with_defaults(config: ServerConfig) -> Self {
        Self::new(
            config,
            Arc::new(TracingLogger::default()),
            Arc::new(NoopEventSink),
        )
    }

    /// Binds the listening socket and starts the accept loop on its own task.
    ///
    /// Emits [`ServerEvent::ServerStarted`] before the first connection is
    /// accepted and returns the bound address.
    ///
    /// # Errors
    ///
    /// * [`ServerError::InvalidState`] if the server was already started or
    ///   stopped
    /// * [`ServerError::Config`] if the configuration is invalid
    /// * [`ServerError::Bind`] if the address cannot be bound; the server is
    ///   then stopped for good
    pub async fn start(&self) -> Result<SocketAddr, ServerError> {
        let shared = &self.shared;

        let state = shared.current_state();
        if state != ServerState::Created || shared.start_claimed.swap(true, Ordering::AcqRel) {
            return Err(ServerError::InvalidState(format!(
                "cannot start a server that is {}",
                shared.current_state()
            )));
        }

        if let Err(e) = shared.config.validate() {
            shared
                .logger
                .severe(&format!("Refusing to start with invalid configuration: {}", e));
            shared.transition(ServerState::Created, ServerState::Stopped);
            return Err(e);
        }

        let listener = match listener::bind(&shared.config).await {
            Ok(listener) => listener,
            Err(e) => {
                shared.logger.exception("Failed to bind socket server", &e);
                shared.transition(ServerState::Created, ServerState::Stopped);
                return Err(e);
            }
        };

        let local_addr = match listener.local_addr() {
            Ok(addr) => addr,
            Err(e) => {
                shared.logger.exception("Failed to read bound address", &e);
                shared.transition(ServerState::Created, ServerState::Stopped);
                return Err(e.into());
            }
        };

        shared.running.store(true, Ordering::Release);
        if !shared.transition(ServerState::Created, ServerState::Running) {
            shared.running.store(false, Ordering::Release);
            return Err(ServerError::InvalidState(
                "server was stopped while starting".to_string(),
            ));
        }

        let _ = shared.local_addr.set(local_addr);
        shared
            .logger
            .info(&format!("Socket server listening on {}", local_addr));
        shared
            .events
            .on_event(ServerEvent::ServerStarted { local_addr })
            .await;

        let handle = tokio::spawn(accept_loop(shared.clone(), listener));
        *shared.accept_task.lock().await = Some(handle);

        Ok(local_addr)
    }

    /// Stops the server and waits for the shutdown sequence to finish.
    ///
    /// The accept loop is woken immediately and the listening socket closed;
    /// every live connection then receives a `{"reason":"shutdown"}` notice
    /// and is closed. Stopping a server that never started marks it stopped.
    /// Stopping a stopped server does nothing; concurrent callers all wait
    /// for the same shutdown.
    pub async fn stop(&self) {
        let shared = &self.shared;

        if shared.transition(ServerState::Created, ServerState::Stopped) {
            shared.logger.info("Socket server stopped before it was started");
            return;
        }

        shared.running.store(false, Ordering::Release);
        shared.shutdown_signal.send_replace(true);

        let handle = shared.accept_task.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                shared.logger.exception("Accept loop task failed", &e);
                shared.state.send_replace(ServerState::Stopped);
            }
        }

        self.wait().await;
    }

    /// Waits until the server reaches [`ServerState::Stopped`].
    pub async fn wait(&self) {
        let mut state = self.shared.state.subscribe();
        let _ = state.wait_for(|s| *s == ServerState::Stopped).await;
    }

    /// Returns `true` between a successful start and the stop request.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ServerState {
        self.shared.current_state()
    }

    /// The bound address, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.shared.local_addr.get().copied()
    }

    /// The configuration the server was created with.
    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.shared.registry.len()
    }

    /// Snapshot of the live connections.
    pub fn connections(&self) -> Vec<Connection> {
        self.shared.registry.snapshot()
    }

    /// Looks up a live connection by id.
    pub fn connection(&self, id: ConnectionId) -> Option<Connection> {
        self.shared.registry.get(id)
    }

    /// Writes a payload to one connection.
    ///
    /// # Errors
    ///
    /// [`ServerError::NotFound`] if no live connection has this id, otherwise
    /// whatever [`Connection::write`] returns.
    pub async fn send_to(&self, id: ConnectionId, payload: &str) -> Result<(), ServerError> {
        let connection = self
            .shared
            .registry
            .get(id)
            .ok_or_else(|| ServerError::NotFound(id.to_string()))?;
        connection.write(payload).await
    }

    /// Writes a payload to every live connection.
    ///
    /// The payload is validated once. Delivery is best-effort and at most
    /// once per connection: a failed write is logged and reported, and never
    /// stops delivery to the remaining connections.
    ///
    /// # Errors
    ///
    /// Only validation errors; per-connection failures are in the report.
    pub async fn broadcast(&self, payload: &str) -> Result<BroadcastReport, ServerError> {
        validate_payload(payload)?;
        let frame = framing::encode(self.shared.config.framing, payload)?;

        let connections = self.shared.registry.snapshot();
        let frame = &frame;
        let results = join_all(connections.into_iter().map(|connection| async move {
            let result = connection.send_frame(payload, frame).await;
            (connection, result)
        }))
        .await;

        let mut report = BroadcastReport::default();
        for (connection, result) in results {
            match result {
                Ok(()) => report.delivered += 1,
                Err(error) => {
                    self.shared.logger.warning(&format!(
                        "Broadcast to {} ({}) failed: {}",
                        connection.id(),
                        connection.remote_address(),
                        error
                    ));
                    report.failures.push(BroadcastFailure {
                        connection_id: connection.id(),
                        remote_address: connection.remote_address().to_string(),
                        error,
                    });
                }
            }
        }

        debug!(
            "Broadcast delivered to {} connection(s), {} failed",
            report.delivered,
            report.failed()
        );
        Ok(report)
    }
}

impl std::fmt::Debug for SocketServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketServer")
            .field("config", &self.shared.config)
            .field("state", &self.shared.current_state())
            .field("local_addr", &self.local_addr())
            .field("connections", &self.shared.registry.len())
            .finish()
    }
}

/// Accepts connections until the stop signal fires or the listener fails
/// for good, then runs the shutdown sequence.
async fn accept_loop(shared: Arc<ServerShared>, listener: TcpListener) {
    let mut shutdown_rx = shared.shutdown_signal.subscribe();
    let mut tasks = JoinSet::new();

    loop {
        tokio::select! {
            biased;
            _ = wait_until_set(&mut shutdown_rx) => {
                shared.logger.info("Stop requested, no longer accepting connections");
                break;
            }
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                if let Err(e) = joined {
                    shared.logger.exception("Connection task failed", &e);
                }
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => admit(&shared, stream, &mut tasks).await,
                Err(e) if is_fatal_accept_error(&e) => {
                    shared.logger.exception("Listening socket failed, shutting down", &e);
                    break;
                }
                Err(e) => {
                    shared.logger.exception("Failed to accept connection", &e);
                    sleep(ACCEPT_ERROR_BACKOFF).await;
                }
            },
        }
    }

    drop(listener);
    shared.running.store(false, Ordering::Release);
    shutdown(&shared, tasks).await;
}

/// Registers an accepted socket and spawns its read loop, or refuses it when
/// the connection limit is reached.
async fn admit(shared: &Arc<ServerShared>, stream: TcpStream, tasks: &mut JoinSet<()>) {
    let connection = Connection::new(stream, shared.connection_context.clone());

    let limit = shared.config.max_connections;
    if limit > 0 && shared.registry.len() >= limit {
        shared.logger.warning(&format!(
            "Refusing connection from {}: limit of {} reached",
            connection.remote_address(),
            limit
        ));
        tasks.spawn(async move { connection.reject(REASON_SERVER_FULL).await });
        return;
    }

    shared.registry.insert(connection.clone());
    shared.logger.info(&format!(
        "Connection {} established from {}",
        connection.id(),
        connection.remote_address()
    ));
    shared
        .events
        .on_event(ServerEvent::ConnectionOpened {
            connection: connection.clone(),
        })
        .await;

    tasks.spawn(connection.run());
}

/// Disconnects every live connection, waits for their tasks and marks the
/// server stopped. The listening socket is already closed at this point.
async fn shutdown(shared: &Arc<ServerShared>, mut tasks: JoinSet<()>) {
    let connections = shared.registry.snapshot();
    shared.logger.info(&format!(
        "Shutting down socket server, disconnecting {} connection(s)",
        connections.len()
    ));

    join_all(
        connections
            .iter()
            .map(|connection| connection.disconnect(REASON_SHUTDOWN)),
    )
    .await;
    shared.registry.clear();

    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            shared.logger.exception("Connection task failed during shutdown", &e);
        }
    }

    shared.logger.info("Socket server stopped");
    shared.events.on_event(ServerEvent::ServerStopped).await;
    shared.state.send_replace(ServerState::Stopped);
}

/// Accept errors that mean the listener itself is unusable.
fn is_fatal_accept_error(error: &std::io::Error) -> bool {
    matches!(
        error.kind(),
        std::io::ErrorKind::InvalidInput
            | std::io::ErrorKind::NotConnected
            | std::io::ErrorKind::Unsupported
    )
}

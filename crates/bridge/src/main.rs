//! Standalone process hosting the socket bridge.
//!
//! Loads the configuration, sets up logging, starts the server and runs
//! until a termination signal arrives.

mod cli;
mod config;

use anyhow::{anyhow, Context};
use cli::CliArgs;
use config::{AppConfig, LoggingSettings};
use socket_bridge::{ChannelEventSink, ServerEvent, SocketServer, TracingLogger};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize logging system
fn setup_logging(config: &LoggingSettings) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));

    let registry = tracing_subscriber::registry().with(filter);

    if config.json_format {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_file(false)
                    .with_line_number(false)
                    .with_thread_ids(true)
                    .with_thread_names(true),
            )
            .try_init()?;
    } else {
        registry
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_file(false)
                    .with_line_number(false)
                    .with_thread_ids(true)
                    .with_thread_names(true),
            )
            .try_init()?;
    }

    info!("Logging initialized with level: {}", config.level);
    Ok(())
}

/// Resolves with the name of the first termination signal delivered.
///
/// SIGHUP counts as a termination request as well: the bridge holds no
/// reloadable state.
#[cfg(unix)]
async fn shutdown_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut hangup = signal(SignalKind::hangup())?;

    let name = tokio::select! {
        _ = interrupt.recv() => "SIGINT",
        _ = terminate.recv() => "SIGTERM",
        _ = hangup.recv() => "SIGHUP",
    };
    Ok(name)
}

#[cfg(not(unix))]
async fn shutdown_signal() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("Ctrl+C")
}

/// Main application struct
pub struct Application {
    config: AppConfig,
    config_path: PathBuf,
    server: SocketServer,
    events: UnboundedReceiver<ServerEvent>,
}

impl Application {
    /// Loads the configuration, applies CLI overrides and builds the server.
    pub async fn new(args: CliArgs) -> anyhow::Result<Self> {
        let mut config = AppConfig::load_from_file(&args.config_path).await?;

        if let Some(host) = args.bind_host {
            config.server.host = host;
        }
        if let Some(port) = args.port {
            config.server.port = port;
        }
        if let Some(log_level) = args.log_level {
            config.logging.level = log_level;
        }
        if args.json_logs {
            config.logging.json_format = true;
        }
        if args.relay {
            config.server.relay = true;
        }

        config
            .validate()
            .map_err(|e| anyhow!("Configuration validation failed: {}", e))?;

        setup_logging(&config.logging)?;

        let (sink, events) = ChannelEventSink::new();
        let server = SocketServer::new(
            config.to_server_config(),
            Arc::new(TracingLogger::new("bridge")),
            Arc::new(sink),
        );

        Ok(Self {
            config,
            config_path: args.config_path,
            server,
            events,
        })
    }

    /// Runs the server until a signal arrives or the server stops on its own.
    pub async fn run(self) -> anyhow::Result<()> {
        info!("Starting socket bridge v{}", env!("CARGO_PKG_VERSION"));
        info!("Configuration Summary:");
        info!("  Config file: {}", self.config_path.display());
        info!("  Framing: {:?}", self.config.server.framing);
        info!("  Max connections: {}", self.config.server.max_connections);
        info!("  Relay mode: {}", self.config.server.relay);

        let addr = self
            .server
            .start()
            .await
            .context("failed to start socket server")?;
        info!("Socket bridge ready on {}", addr);

        let event_task = spawn_event_loop(self.server.clone(), self.events, self.config.server.relay);

        tokio::select! {
            result = shutdown_signal() => match result {
                Ok(name) => info!("Received {}, stopping server", name),
                Err(e) => error!("Signal handling failed, stopping server: {}", e),
            },
            _ = self.server.wait() => {
                warn!("Socket server stopped unexpectedly");
            }
        }

        self.server.stop().await;
        event_task.abort();

        info!("Socket bridge shut down");
        Ok(())
    }
}

/// Logs lifecycle events and, in relay mode, rebroadcasts received messages.
fn spawn_event_loop(
    server: SocketServer,
    mut events: UnboundedReceiver<ServerEvent>,
    relay: bool,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                ServerEvent::MessageReceived { connection, text } => {
                    debug!("{} -> {}", connection.remote_address(), text);
                    if !relay {
                        continue;
                    }
                    match server.broadcast(&text).await {
                        Ok(report) if !report.is_complete() => {
                            warn!(
                                "Relay reached {} of {} connection(s)",
                                report.delivered,
                                report.delivered + report.failed()
                            );
                        }
                        Ok(_) => {}
                        Err(e) => {
                            warn!("Not relaying message from {}: {}", connection.remote_address(), e);
                        }
                    }
                }
                ServerEvent::MessageSent { connection, text } => {
                    debug!("{} <- {}", connection.remote_address(), text);
                }
                other => debug!("Server event: {}", other.name()),
            }
        }
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    let app = Application::new(args).await?;
    app.run().await
}

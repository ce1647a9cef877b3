//! Listening socket setup.

use crate::config::ServerConfig;
use crate::error::ServerError;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use tokio::net::TcpListener;

/// Resolves the configured host and binds a listener on the first address
/// that accepts the bind.
pub(crate) async fn bind(config: &ServerConfig) -> Result<TcpListener, ServerError> {
    let target = config.bind_target();

    let addrs: Vec<SocketAddr> = tokio::net::lookup_host(&target)
        .await
        .map_err(|source| ServerError::Bind {
            address: target.clone(),
            source,
        })?
        .collect();

    let mut last_error =
        io::Error::new(io::ErrorKind::AddrNotAvailable, "host resolved to no addresses");

    for addr in addrs {
        match bind_addr(addr, config) {
            Ok(listener) => return Ok(listener),
            Err(e) => last_error = e,
        }
    }

    Err(ServerError::Bind {
        address: target,
        source: last_error,
    })
}

fn bind_addr(addr: SocketAddr, config: &ServerConfig) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    if config.reuse_address {
        socket.set_reuse_address(true)?;
    }
    socket.bind(&addr.into())?;
    socket.listen(config.backlog)?;

    let std_listener: StdTcpListener = socket.into();
    std_listener.set_nonblocking(true)?;
    TcpListener::from_std(std_listener)
}

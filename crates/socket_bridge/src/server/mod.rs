//! Server implementation modules.
//!
//! This module organizes the socket server into the listener setup, the
//! connection registry and the server core.

pub mod core;
mod listener;
pub mod registry;

pub use self::core::{BroadcastFailure, BroadcastReport, ServerState, SocketServer};
pub use registry::ConnectionRegistry;

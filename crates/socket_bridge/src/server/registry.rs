//! Registry of live connections.
//!
//! The registry is the only state shared between the accept loop and the
//! connection tasks. The accept loop adds a connection right after accepting
//! it; the connection removes itself when it closes.

use crate::connection::{Connection, ConnectionId};
use dashmap::DashMap;

/// Concurrency-safe set of live connections keyed by id.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Connection>,
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    /// Registers a connection. Returns `false` if the id was already present.
    pub fn insert(&self, connection: Connection) -> bool {
        match self.connections.entry(connection.id()) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(connection);
                true
            }
        }
    }

    /// Removes a connection, returning it if it was registered.
    pub fn remove(&self, id: ConnectionId) -> Option<Connection> {
        self.connections.remove(&id).map(|(_, connection)| connection)
    }

    /// Looks up a live connection by id.
    pub fn get(&self, id: ConnectionId) -> Option<Connection> {
        self.connections.get(&id).map(|entry| entry.value().clone())
    }

    /// Returns whether a connection with this id is registered.
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    /// Copies the current set of connections.
    ///
    /// Work that awaits (writes, disconnects) runs on the snapshot so that no
    /// map shard lock is held across an await point.
    pub fn snapshot(&self) -> Vec<Connection> {
        self.connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Returns `true` when no connection is registered.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Removes every connection.
    pub fn clear(&self) {
        self.connections.clear();
    }
}

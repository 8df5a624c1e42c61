//! Transport-owned set of open connections.
//!
//! Independent of the broker: it survives a broker state rebuild and is the
//! only input used to repopulate the registry afterwards.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use switchboard_core::ConnectionId;

use crate::websocket::connection::ClientConnection;

/// Every accepted connection whose session task is still running.
#[derive(Clone, Default)]
pub struct LiveConnections {
    inner: Arc<RwLock<HashMap<ConnectionId, Arc<ClientConnection>>>>,
}

impl LiveConnections {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a connection.
    pub fn add(&self, connection: Arc<ClientConnection>) {
        let _ = self
            .inner
            .write()
            .insert(connection.id.clone(), connection);
    }

    /// Stop tracking a connection. Returns whether it was tracked.
    pub fn remove(&self, id: &ConnectionId) -> bool {
        self.inner.write().remove(id).is_some()
    }

    /// Point-in-time copy of the tracked connections.
    pub fn snapshot(&self) -> Vec<Arc<ClientConnection>> {
        self.inner.read().values().cloned().collect()
    }

    /// Number of tracked connections.
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Whether no connection is tracked.
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

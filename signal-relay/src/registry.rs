//! Connection registry and identity index.
//!
//! Every live connection is registered here, and each authenticated
//! identity maps to the one connection currently holding it. Both maps sit
//! behind a single mutex that is only held for map mutation.

use crate::connection::Connection;
use crate::error::{ProtocolError, ProtocolResult};
use signal_types::{ConnectionId, Identity};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct RegistryInner {
    connections: HashMap<ConnectionId, Arc<Connection>>,
    by_identity: HashMap<Identity, ConnectionId>,
}

/// Registry of live connections.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    inner: Mutex<RegistryInner>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a newly accepted connection.
    pub fn register(&self, conn: Arc<Connection>) {
        let mut inner = self.lock();
        inner.connections.insert(conn.id().clone(), conn);
    }

    /// Bind `identity` to `conn`.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::AlreadyOnline`] if another live connection holds the
    /// identity (the existing mapping is kept), and
    /// [`ProtocolError::ConnectionClosed`] if `conn` is no longer registered.
    pub fn bind_identity(&self, conn: &Connection, identity: Identity) -> ProtocolResult<()> {
        let mut inner = self.lock();
        let inner = &mut *inner;

        if !inner.connections.contains_key(conn.id()) {
            return Err(ProtocolError::ConnectionClosed);
        }

        if let Some(holder) = inner.by_identity.get(&identity) {
            if holder != conn.id() && inner.connections.contains_key(holder) {
                return Err(ProtocolError::AlreadyOnline);
            }
        }

        // Re-authenticating as someone else releases the old identity
        if let Some(previous) = conn.set_identity(identity.clone()) {
            if previous != identity && inner.by_identity.get(&previous) == Some(conn.id()) {
                inner.by_identity.remove(&previous);
            }
        }
        inner.by_identity.insert(identity, conn.id().clone());
        Ok(())
    }

    /// Remove a connection, returning it if it was registered.
    ///
    /// The identity mapping is cleared only if this connection still holds it.
    pub fn unregister(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        let mut inner = self.lock();
        let conn = inner.connections.remove(id)?;
        if let Some(identity) = conn.identity() {
            if inner.by_identity.get(&identity) == Some(id) {
                inner.by_identity.remove(&identity);
            }
        }
        Some(conn)
    }

    /// The live connection holding `identity`.
    pub fn lookup_by_identity(&self, identity: &Identity) -> Option<Arc<Connection>> {
        let inner = self.lock();
        let id = inner.by_identity.get(identity)?;
        inner.connections.get(id).cloned()
    }

    /// Look up a connection by id.
    pub fn get(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        self.lock().connections.get(id).cloned()
    }

    /// Whether a connection is still registered.
    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.lock().connections.contains_key(id)
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.lock().connections.len()
    }

    /// Whether no connection is registered.
    pub fn is_empty(&self) -> bool {
        self.lock().connections.is_empty()
    }

    /// Number of identities currently bound.
    pub fn identity_count(&self) -> usize {
        self.lock().by_identity.len()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

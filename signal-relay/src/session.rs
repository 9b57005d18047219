//! Session store and membership protocol.
//!
//! A session is a named group of member connections. The store's top-level
//! map and each session's membership have separate locks, always taken in
//! that order. Callers get back snapshots of the connections they must
//! notify and perform the writes after every lock is released.

use crate::connection::Connection;
use crate::error::{ProtocolError, ProtocolResult};
use dashmap::DashMap;
use signal_types::{ConnectionId, SessionId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Lifecycle phase of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Created with a single member, waiting for a peer.
    Forming,
    /// A second member joined.
    Paired,
    /// Messages have been relayed.
    Active,
    /// No members left; the record lingers until swept or revived.
    Abandoned,
}

#[derive(Debug)]
struct Membership {
    members: HashMap<ConnectionId, Arc<Connection>>,
    progress: SessionPhase,
    last_change: Instant,
}

impl Membership {
    fn with_member(conn: &Arc<Connection>) -> Self {
        let mut members = HashMap::new();
        members.insert(conn.id().clone(), conn.clone());
        Self {
            members,
            progress: SessionPhase::Forming,
            last_change: Instant::now(),
        }
    }

    fn join(&mut self, conn: &Arc<Connection>) {
        if self.members.is_empty() {
            self.progress = SessionPhase::Forming;
        }
        self.members.insert(conn.id().clone(), conn.clone());
        if self.members.len() >= 2 && self.progress == SessionPhase::Forming {
            self.progress = SessionPhase::Paired;
        }
        self.last_change = Instant::now();
    }

    fn remove(&mut self, id: &ConnectionId) -> bool {
        let removed = self.members.remove(id).is_some();
        if removed {
            self.last_change = Instant::now();
        }
        removed
    }

    fn others(&self, except: &ConnectionId) -> Vec<Arc<Connection>> {
        self.members
            .iter()
            .filter(|(id, _)| *id != except)
            .map(|(_, conn)| conn.clone())
            .collect()
    }

    fn phase(&self) -> SessionPhase {
        if self.members.is_empty() {
            SessionPhase::Abandoned
        } else {
            self.progress
        }
    }
}

/// One session.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    membership: Mutex<Membership>,
}

impl Session {
    fn new(id: SessionId, first: &Arc<Connection>) -> Self {
        Self {
            id,
            membership: Mutex::new(Membership::with_member(first)),
        }
    }

    /// Session id.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> SessionPhase {
        self.lock().phase()
    }

    /// Number of members.
    pub fn member_count(&self) -> usize {
        self.lock().members.len()
    }

    /// Whether `id` is a member.
    pub fn is_member(&self, id: &ConnectionId) -> bool {
        self.lock().members.contains_key(id)
    }

    fn lock(&self) -> MutexGuard<'_, Membership> {
        self.membership
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// All sessions known to the relay.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: DashMap<SessionId, Arc<Session>>,
}

impl SessionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a session for a pairing request with the initiator as sole member.
    pub fn create_from_pairing(&self, initiator: &Arc<Connection>) -> SessionId {
        loop {
            let id = SessionId::generate();
            if let dashmap::mapref::entry::Entry::Vacant(slot) = self.sessions.entry(id.clone()) {
                slot.insert(Arc::new(Session::new(id.clone(), initiator)));
                tracing::debug!("Session {} forming", id);
                return id;
            }
        }
    }

    /// Add the accepter to an existing session.
    ///
    /// Returns the other members to notify, or `None` if the session does
    /// not exist.
    pub fn join_on_accept(
        &self,
        id: &SessionId,
        accepter: &Arc<Connection>,
    ) -> Option<Vec<Arc<Connection>>> {
        let session = self.sessions.get(id)?;
        let mut membership = session.lock();
        membership.join(accepter);
        Some(membership.others(accepter.id()))
    }

    /// Members of an existing session other than `except`.
    ///
    /// Used for denials and WebRTC signaling, which never change membership.
    pub fn peers(&self, id: &SessionId, except: &ConnectionId) -> Option<Vec<Arc<Connection>>> {
        let session = self.sessions.get(id)?;
        let peers = session.lock().others(except);
        Some(peers)
    }

    /// Re-enter a session, creating it if absent.
    ///
    /// Returns the other members to notify.
    pub fn reattach(&self, id: &SessionId, conn: &Arc<Connection>) -> Vec<Arc<Connection>> {
        let session = self
            .sessions
            .entry(id.clone())
            .or_insert_with(|| {
                tracing::debug!("Session {} created by reattach", id);
                Arc::new(Session::new(id.clone(), conn))
            });
        let mut membership = session.lock();
        membership.join(conn);
        membership.others(conn.id())
    }

    /// Resolve the recipients of a relayed message.
    ///
    /// An unknown session is created with the sender as sole member (and so
    /// no recipients). An existing session requires the sender to be a
    /// member.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::NotMember`] if the session exists and the sender is
    /// not in it.
    pub fn relay_targets(
        &self,
        id: &SessionId,
        sender: &Arc<Connection>,
    ) -> ProtocolResult<Vec<Arc<Connection>>> {
        let session = self.sessions.entry(id.clone()).or_insert_with(|| {
            tracing::info!("Auto-created session {} from MSG", id);
            Arc::new(Session::new(id.clone(), sender))
        });
        let mut membership = session.lock();
        if !membership.members.contains_key(sender.id()) {
            return Err(ProtocolError::NotMember);
        }
        membership.progress = SessionPhase::Active;
        membership.last_change = Instant::now();
        Ok(membership.others(sender.id()))
    }

    /// Remove one member from one session.
    ///
    /// Returns the remaining members if `conn` had been a member.
    pub fn leave(&self, id: &SessionId, conn: &ConnectionId) -> Option<Vec<Arc<Connection>>> {
        let session = self.sessions.get(id)?;
        let mut membership = session.lock();
        if membership.remove(conn) {
            Some(membership.others(conn))
        } else {
            None
        }
    }

    /// Remove a connection from every session it belongs to.
    ///
    /// Returns, per affected session, the members that remain.
    pub fn remove_connection(&self, conn: &ConnectionId) -> Vec<(SessionId, Vec<Arc<Connection>>)> {
        let mut affected = Vec::new();
        for entry in self.sessions.iter() {
            let mut membership = entry.value().lock();
            if membership.remove(conn) {
                affected.push((entry.key().clone(), membership.others(conn)));
            }
        }
        affected
    }

    /// Drop sessions that have had no members for longer than `ttl`.
    ///
    /// Returns the number of sessions removed.
    pub fn sweep_abandoned_at(&self, ttl: Duration, now: Instant) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, session| {
            let membership = session.lock();
            !(membership.members.is_empty()
                && now.saturating_duration_since(membership.last_change) >= ttl)
        });
        before.saturating_sub(self.sessions.len())
    }

    /// Look up a session.
    pub fn get(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|s| s.value().clone())
    }

    /// Phase of a session, if it exists.
    pub fn phase(&self, id: &SessionId) -> Option<SessionPhase> {
        self.sessions.get(id).map(|s| s.phase())
    }

    /// Number of sessions, abandoned ones included.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

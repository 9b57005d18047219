//! Main SignalRelay server coordination.
//!
//! SignalRelay owns the connection registry, the session store, the rate
//! limiters and the identity verifier, and implements the cross-cutting
//! operations: accepting a connection, fanning frames out to recipients and
//! the disconnect cascade.

use crate::auth::{IdentityProvider, IdentityVerifier};
use crate::config::Config;
use crate::connection::Connection;
use crate::heartbeat::spawn_heartbeat;
use crate::limits::RateLimits;
use crate::registry::ConnectionRegistry;
use crate::session::SessionStore;
use crate::storage::{AuditStore, PairingRecord};
use crate::transport::FrameSink;
use futures_util::future::join_all;
use signal_types::{Frame, Identity, ServerFrame};
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Operational metrics for monitoring relay activity.
///
/// All counters are monotonically increasing (reset only on restart).
/// Thread-safe via `AtomicU64`, no locks needed for incrementing.
#[derive(Debug, Default)]
pub struct RelayMetrics {
    /// Total connections accepted.
    pub connections_total: AtomicU64,
    /// Total inbound frames processed.
    pub frames_received: AtomicU64,
    /// Total successful MSG deliveries (one per recipient).
    pub messages_relayed: AtomicU64,
    /// Total MSG frames that reached no recipient.
    pub delivery_failures: AtomicU64,
    /// Total successful authentications.
    pub auth_success: AtomicU64,
    /// Total failed authentications.
    pub auth_failures: AtomicU64,
    /// Total rate limit rejections (connection + auth + message + pairing).
    pub rate_limit_hits: AtomicU64,
    /// Total protocol errors reported to clients.
    pub errors_total: AtomicU64,
}

/// Main relay server.
pub struct SignalRelay {
    config: Config,
    registry: ConnectionRegistry,
    sessions: SessionStore,
    /// Rate limiters for logins, connections and messages.
    rate_limits: RateLimits,
    verifier: IdentityVerifier,
    /// Pairing audit log, if enabled.
    audit: Option<Arc<dyn AuditStore>>,
    /// Operational metrics (counters, gauges).
    metrics: RelayMetrics,
}

impl std::fmt::Debug for SignalRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalRelay")
            .field("config", &self.config)
            .field("rate_limits", &self.rate_limits)
            .field("metrics", &self.metrics)
            .field("connections", &self.registry.len())
            .field("sessions", &self.sessions.len())
            .finish_non_exhaustive()
    }
}

impl SignalRelay {
    /// Create a relay from configuration, an identity provider and an
    /// optional audit store.
    pub fn new(
        config: Config,
        provider: Arc<dyn IdentityProvider>,
        audit: Option<Arc<dyn AuditStore>>,
    ) -> Self {
        let rate_limits = RateLimits::new(&config.limits, &config.auth);
        let verifier = IdentityVerifier::new(&config.auth, provider);
        Self {
            config,
            registry: ConnectionRegistry::new(),
            sessions: SessionStore::new(),
            rate_limits,
            verifier,
            audit,
            metrics: RelayMetrics::default(),
        }
    }

    /// Get the relay configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get the connection registry.
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Get the session store.
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Get access to the rate limiters.
    pub fn rate_limits(&self) -> &RateLimits {
        &self.rate_limits
    }

    /// Get the identity verifier.
    pub fn verifier(&self) -> &IdentityVerifier {
        &self.verifier
    }

    /// Get access to the operational metrics.
    pub fn metrics(&self) -> &RelayMetrics {
        &self.metrics
    }

    /// The pairing audit log, if enabled.
    pub fn audit(&self) -> Option<&Arc<dyn AuditStore>> {
        self.audit.as_ref()
    }

    /// Register a new connection and start its heartbeat.
    pub fn accept(self: &Arc<Self>, sink: Box<dyn FrameSink>, peer_addr: IpAddr) -> Arc<Connection> {
        let conn = Arc::new(Connection::new(
            sink,
            peer_addr,
            &self.config.limits,
            Duration::from_millis(self.config.server.write_timeout_ms),
        ));
        self.registry.register(conn.clone());
        self.metrics.connections_total.fetch_add(1, Ordering::Relaxed);

        spawn_heartbeat(
            self.clone(),
            conn.clone(),
            Duration::from_secs(self.config.server.heartbeat_interval_secs),
        );

        tracing::info!("New connection {} from {}", conn.id(), peer_addr);
        conn
    }

    /// Send `frame` to every target concurrently.
    ///
    /// Returns the number of successful writes. A failed write never aborts
    /// delivery to the others.
    pub async fn fan_out(&self, targets: &[Arc<Connection>], frame: &ServerFrame) -> usize {
        if targets.is_empty() {
            return 0;
        }
        match frame.to_json() {
            Ok(text) => self.deliver(targets, text).await,
            Err(e) => {
                tracing::error!("Failed to serialize {:?}: {}", frame.frame_type(), e);
                0
            }
        }
    }

    /// Forward a raw frame verbatim to every target.
    pub async fn forward(&self, targets: &[Arc<Connection>], frame: &Frame) -> usize {
        if targets.is_empty() {
            return 0;
        }
        match frame.to_json() {
            Ok(text) => self.deliver(targets, text).await,
            Err(e) => {
                tracing::error!("Failed to serialize {:?}: {}", frame.frame_type, e);
                0
            }
        }
    }

    async fn deliver(&self, targets: &[Arc<Connection>], text: String) -> usize {
        let writes = targets.iter().map(|conn| {
            let text = text.clone();
            async move {
                let result = conn.send_text(text).await;
                if let Err(e) = &result {
                    tracing::debug!("Failed to send to {}: {}", conn.id(), e);
                }
                result.is_ok()
            }
        });
        join_all(writes).await.into_iter().filter(|ok| *ok).count()
    }

    /// Tear down a connection.
    ///
    /// Unregisters it, removes it from every session, sends exactly one
    /// `PEER_OFFLINE` to each remaining member of those sessions and closes
    /// the transport. Safe to call more than once and before authentication.
    pub async fn disconnect(&self, conn: &Arc<Connection>) {
        let was_registered = self.registry.unregister(conn.id()).is_some();
        let affected = self.sessions.remove_connection(conn.id());

        for (session_id, remaining) in &affected {
            let notified = self
                .fan_out(
                    remaining,
                    &ServerFrame::PeerOffline {
                        session_id: session_id.clone(),
                    },
                )
                .await;
            tracing::debug!(
                "PEER_OFFLINE for {} sent to {}/{} members",
                session_id,
                notified,
                remaining.len()
            );
        }

        conn.close().await;

        if was_registered {
            tracing::info!(
                "Connection {} closed (left {} sessions)",
                conn.id(),
                affected.len()
            );
        }
    }

    /// Append a hashed pairing record to the audit log without blocking.
    pub fn record_pairing(&self, initiator: &Identity, target: &Identity) {
        let Some(audit) = self.audit.clone() else {
            return;
        };
        let record = PairingRecord {
            initiator: initiator.hash(),
            target: target.hash(),
            requested_at: crate::auth::unix_now() as i64,
        };
        tracing::info!(
            "CONNECTION: {} requested connection to {}",
            record.initiator.short(),
            record.target.short()
        );
        tokio::spawn(async move {
            if let Err(e) = audit.record_pairing(record).await {
                tracing::error!("Failed to write pairing audit record: {}", e);
            }
        });
    }

    /// Number of live connections.
    pub fn total_connections(&self) -> usize {
        self.registry.len()
    }

    /// Number of authenticated identities.
    pub fn total_identities(&self) -> usize {
        self.registry.identity_count()
    }

    /// Number of sessions, abandoned ones included.
    pub fn total_sessions(&self) -> usize {
        self.sessions.len()
    }
}

//! Per-connection liveness probes.
//!
//! The probe task checks registration on every tick and exits on its own
//! once the connection is unregistered; nothing cancels it.

use crate::connection::Connection;
use crate::server::SignalRelay;
use signal_types::ServerFrame;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant};

/// Spawn a task that sends `PING` every `period` while `conn` is registered.
pub fn spawn_heartbeat(
    relay: Arc<SignalRelay>,
    conn: Arc<Connection>,
    period: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = interval_at(Instant::now() + period, period);

        loop {
            timer.tick().await;

            if !relay.registry().contains(conn.id()) {
                tracing::debug!("Heartbeat for {} stopped", conn.id());
                break;
            }
            if let Err(e) = conn.send(&ServerFrame::Ping).await {
                tracing::debug!("Heartbeat to {} failed: {}", conn.id(), e);
            }
        }
    })
}

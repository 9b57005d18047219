//! Background cleanup task for abandoned sessions.
//!
//! Runs periodically to drop sessions that have had no members for longer
//! than the configured TTL, and to shrink the rate limiter tables.

use crate::config::CleanupConfig;
use crate::server::SignalRelay;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::interval;

/// Run one sweep. Returns the number of sessions removed.
pub fn run_cleanup_once(relay: &SignalRelay, config: &CleanupConfig) -> usize {
    let ttl = Duration::from_secs(config.abandoned_session_ttl_secs);
    let removed = relay.sessions().sweep_abandoned_at(ttl, Instant::now());
    relay.rate_limits().shrink();
    removed
}

/// Spawn a background cleanup task.
///
/// Returns a handle that can be used to abort the task.
pub fn spawn_cleanup_task(
    relay: Arc<SignalRelay>,
    config: CleanupConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if !config.enabled {
            tracing::info!("Cleanup task disabled");
            return;
        }

        let interval_secs = config.interval_secs;
        tracing::info!("Cleanup task started (interval: {}s)", interval_secs);

        let mut timer = interval(Duration::from_secs(interval_secs));

        loop {
            timer.tick().await;

            let removed = run_cleanup_once(&relay, &config);
            if removed > 0 {
                tracing::info!("Cleanup: removed {} abandoned sessions", removed);
            } else {
                tracing::debug!("Cleanup: no abandoned sessions");
            }
        }
    })
}

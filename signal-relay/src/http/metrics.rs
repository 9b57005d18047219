//! Prometheus metrics endpoint.

use crate::server::SignalRelay;
use axum::{http::header::CONTENT_TYPE, response::IntoResponse, Extension};
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Prometheus metrics handler.
///
/// Gauges describe current state, counters are monotonic since startup.
pub async fn metrics_handler(Extension(relay): Extension<Arc<SignalRelay>>) -> impl IntoResponse {
    let m = relay.metrics();

    let connections = relay.total_connections();
    let identities = relay.total_identities();
    let sessions = relay.total_sessions();

    let conns_total = m.connections_total.load(Ordering::Relaxed);
    let frames = m.frames_received.load(Ordering::Relaxed);
    let relayed = m.messages_relayed.load(Ordering::Relaxed);
    let failures = m.delivery_failures.load(Ordering::Relaxed);
    let auth_ok = m.auth_success.load(Ordering::Relaxed);
    let auth_failed = m.auth_failures.load(Ordering::Relaxed);
    let rate_limits = m.rate_limit_hits.load(Ordering::Relaxed);
    let errors = m.errors_total.load(Ordering::Relaxed);

    // Best effort; zero when the audit log is disabled
    let pairings = match relay.audit() {
        Some(audit) => audit.pairing_count().await.unwrap_or(0),
        None => 0,
    };

    let body = format!(
        r#"# HELP signal_relay_connections_active Number of live connections
# TYPE signal_relay_connections_active gauge
signal_relay_connections_active {connections}

# HELP signal_relay_identities_active Number of authenticated identities
# TYPE signal_relay_identities_active gauge
signal_relay_identities_active {identities}

# HELP signal_relay_sessions_active Number of sessions
# TYPE signal_relay_sessions_active gauge
signal_relay_sessions_active {sessions}

# HELP signal_relay_info Server information
# TYPE signal_relay_info gauge
signal_relay_info{{version="{version}"}} 1

# HELP signal_relay_connections_total Total connections accepted
# TYPE signal_relay_connections_total counter
signal_relay_connections_total {conns_total}

# HELP signal_relay_frames_received_total Total inbound frames processed
# TYPE signal_relay_frames_received_total counter
signal_relay_frames_received_total {frames}

# HELP signal_relay_messages_relayed_total Total MSG deliveries (one per recipient)
# TYPE signal_relay_messages_relayed_total counter
signal_relay_messages_relayed_total {relayed}

# HELP signal_relay_delivery_failures_total Total MSG frames that reached no recipient
# TYPE signal_relay_delivery_failures_total counter
signal_relay_delivery_failures_total {failures}

# HELP signal_relay_auth_success_total Total successful logins
# TYPE signal_relay_auth_success_total counter
signal_relay_auth_success_total {auth_ok}

# HELP signal_relay_auth_failures_total Total failed logins
# TYPE signal_relay_auth_failures_total counter
signal_relay_auth_failures_total {auth_failed}

# HELP signal_relay_rate_limit_hits_total Total rate limit rejections
# TYPE signal_relay_rate_limit_hits_total counter
signal_relay_rate_limit_hits_total {rate_limits}

# HELP signal_relay_errors_total Total protocol errors
# TYPE signal_relay_errors_total counter
signal_relay_errors_total {errors}

# HELP signal_relay_audit_pairings Number of pairing requests in the audit log
# TYPE signal_relay_audit_pairings gauge
signal_relay_audit_pairings {pairings}
"#,
        version = env!("CARGO_PKG_VERSION"),
    );

    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

//! HTTP endpoints for signal-relay.
//!
//! Serves the WebSocket upgrade on `/` alongside health and metrics.

pub mod health;
mod metrics;

use crate::protocol::ws_handler;
use crate::server::SignalRelay;
use axum::{routing::get, Extension, Router};
use std::sync::Arc;

pub use health::{init_start_time, HealthStatus};

/// Build the HTTP router with all endpoints.
pub fn build_router(relay: Arc<SignalRelay>) -> Router {
    let mut router = Router::new()
        .route("/", get(ws_handler))
        .route("/health", get(health::health_handler));

    if relay.config().http.metrics_enabled {
        router = router.route("/metrics", get(metrics::metrics_handler));
    }

    router.layer(Extension(relay))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthError, IdentityProvider, ProviderClaims};
    use crate::config::Config;
    use crate::storage::{AuditStore, PairingRecord, SqliteAuditStore};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use signal_types::Identity;
    use tower::util::ServiceExt;

    struct NoProvider;

    #[async_trait]
    impl IdentityProvider for NoProvider {
        async fn introspect(&self, _credential: &str) -> Result<ProviderClaims, AuthError> {
            Err(AuthError::ProviderRejected {
                reason: "unused".into(),
            })
        }
    }

    fn test_relay(config: Config) -> Arc<SignalRelay> {
        Arc::new(SignalRelay::new(config, Arc::new(NoProvider), None))
    }

    async fn request(app: Router, uri: &str) -> axum::response::Response {
        app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn health_endpoint_returns_counts() {
        let app = build_router(test_relay(Config::default()));

        let response = request(app, "/health").await;
        assert_eq!(response.status(), StatusCode::OK);

        let health: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(health["status"], "ok");
        assert_eq!(health["connections"], 0);
        assert_eq!(health["sessions"], 0);
    }

    #[tokio::test]
    async fn metrics_endpoint_uses_prometheus_format() {
        let app = build_router(test_relay(Config::default()));

        let response = request(app, "/metrics").await;
        assert_eq!(response.status(), StatusCode::OK);

        let text = body_text(response).await;
        assert!(text.contains("# TYPE signal_relay_connections_active gauge"));
        assert!(text.contains("signal_relay_messages_relayed_total 0"));
        assert!(text.contains("signal_relay_audit_pairings 0"));
    }

    #[tokio::test]
    async fn metrics_endpoint_reports_audit_count() {
        let store = Arc::new(SqliteAuditStore::in_memory().await.unwrap());
        let relay = Arc::new(SignalRelay::new(
            Config::default(),
            Arc::new(NoProvider),
            Some(store.clone()),
        ));
        let alice = Identity::parse("alice@example.com").unwrap();
        let bob = Identity::parse("bob@example.com").unwrap();
        store
            .record_pairing(PairingRecord {
                initiator: alice.hash(),
                target: bob.hash(),
                requested_at: 1,
            })
            .await
            .unwrap();

        let text = body_text(request(build_router(relay), "/metrics").await).await;
        assert!(text.contains("signal_relay_audit_pairings 1"));
    }

    #[tokio::test]
    async fn metrics_endpoint_can_be_disabled() {
        let mut config = Config::default();
        config.http.metrics_enabled = false;
        let app = build_router(test_relay(config));

        let response = request(app, "/metrics").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn root_without_upgrade_is_rejected() {
        let app = build_router(test_relay(Config::default()));

        let response = request(app, "/").await;
        assert!(response.status().is_client_error());
    }
}

//! signal-relay binary entry point.
//!
//! Usage:
//! ```bash
//! signal-relay --config relay.toml
//! ```
//!
//! Secrets come from the environment (`TURN_SECRET`, `AUTH_SESSION_SECRET`),
//! log levels from `RUST_LOG`.

use anyhow::Context;
use signal_relay::auth::{IdentityProvider, TokenInfoProvider};
use signal_relay::cleanup::spawn_cleanup_task;
use signal_relay::config::Config;
use signal_relay::http::{build_router, init_start_time};
use signal_relay::server::SignalRelay;
use signal_relay::storage::{AuditStore, SqliteAuditStore};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = load_config()?;
    if config.auth.session_secret_seed.is_blank() {
        tracing::warn!(
            "AUTH_SESSION_SECRET is not set and allow_blank_session_secret is on; \
             continuation tokens can be forged"
        );
    }

    let audit: Option<Arc<dyn AuditStore>> = if config.storage.audit_enabled {
        let store = SqliteAuditStore::new(&config.storage.database)
            .await
            .with_context(|| {
                format!(
                    "failed to open audit database {}",
                    config.storage.database.display()
                )
            })?;
        Some(Arc::new(store))
    } else {
        tracing::info!("Pairing audit log disabled");
        None
    };

    let provider: Arc<dyn IdentityProvider> = Arc::new(
        TokenInfoProvider::new(
            config.auth.provider_url.clone(),
            Duration::from_secs(config.auth.provider_timeout_secs),
        )
        .context("failed to build identity provider client")?,
    );

    let bind_address = config.server.bind_address.clone();
    let cleanup = config.cleanup.clone();
    let relay = Arc::new(SignalRelay::new(config, provider, audit));

    init_start_time();
    spawn_cleanup_task(relay.clone(), cleanup);

    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("failed to bind {}", bind_address))?;
    tracing::info!(
        "signal-relay v{} listening on {}",
        env!("CARGO_PKG_VERSION"),
        bind_address
    );

    axum::serve(
        listener,
        build_router(relay).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("server error")?;

    Ok(())
}

fn load_config() -> anyhow::Result<Config> {
    let path = get_config_path();
    let mut config = if path.exists() {
        Config::from_file(&path)?
    } else {
        tracing::info!("No config file at {:?}, using defaults", path);
        Config::default()
    };
    config.apply_env();
    config.validate()?;
    Ok(config)
}

fn get_config_path() -> PathBuf {
    std::env::args()
        .skip_while(|arg| arg != "--config")
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("relay.toml"))
}

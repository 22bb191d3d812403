//! parley-gateway server entry point.
//!
//! Starts the Axum HTTP server with REST and WebSocket endpoints and the
//! idle-negotiation sweeper.

use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

use parley_gateway::api;
use parley_gateway::app_state::AppState;
use parley_gateway::config::GatewayConfig;
use parley_gateway::external::{LogNotifier, SandboxGateway};
use parley_gateway::service::IdleSweeper;
use parley_gateway::store::{ChatStore, MemoryStore, PostgresStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = GatewayConfig::from_env()?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if config.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(addr = %config.listen_addr, "starting parley-gateway");

    // Build storage
    let store: Arc<dyn ChatStore> = if config.persistence_enabled {
        let pg = PostgresStore::connect(
            &config.database_url,
            config.database_max_connections,
            config.database_min_connections,
            Duration::from_secs(config.database_connect_timeout_secs),
        )
        .await?;
        tracing::info!("postgres store ready");
        Arc::new(pg)
    } else {
        tracing::warn!("persistence disabled; using in-memory store");
        Arc::new(MemoryStore::new())
    };

    // Build application state
    let app_state = AppState::build(
        &config,
        store,
        Arc::new(SandboxGateway::new()),
        Arc::new(LogNotifier),
    );

    let _sweeper = IdleSweeper::new(
        app_state.chat.clone(),
        config.negotiation_timeout(),
        Duration::from_secs(config.sweep_interval_secs),
    )
    .spawn();

    // Build router
    let app = api::build_app(app_state, Duration::from_secs(config.request_timeout_secs));

    // Start server
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "server listening");

    axum::serve(listener, app).await?;

    Ok(())
}

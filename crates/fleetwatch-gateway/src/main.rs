//! Fleetwatch Gateway - control plane server
//!
//! Serves the admin API and the agent WebSocket endpoint from one process,
//! backed by a local RocksDB store.
//!
//! Settings come from the environment; see [`ServerSettings`] for the
//! variables and their defaults. `RUST_LOG` sets the log filter (default
//! `info,fleetwatch=debug`).

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fleetwatch_control::FleetControlService;
use fleetwatch_core::{CursorCodec, SystemClock};
use fleetwatch_gateway::{create_router, GatewayState, ServerSettings};
use fleetwatch_store::RocksStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,fleetwatch=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Fleetwatch Gateway");

    // Load configuration from environment
    let settings = ServerSettings::from_env()?;
    let cursor = settings.cursor.unwrap_or_else(|| {
        tracing::warn!("No CURSOR_SECRET set - continuation tokens will not survive restarts");
        CursorCodec::random()
    });
    let gateway_config = settings.gateway;
    let control_config = settings.control;
    let data_dir = settings.data_dir;

    tracing::info!(
        listen_addr = %gateway_config.listen_addr,
        data_dir = %data_dir,
        liveness_threshold_seconds = control_config.liveness_threshold_seconds,
        max_commands_per_reply = control_config.max_commands_per_reply,
        "Gateway configuration loaded"
    );

    // Initialize RocksDB store
    tracing::info!(path = %data_dir, "Opening RocksDB store");
    let store = Arc::new(RocksStore::open(&data_dir)?);

    let control = Arc::new(FleetControlService::new(
        store,
        cursor,
        Arc::new(SystemClock),
        control_config,
    ));
    tracing::info!("Control plane initialized");

    let listen_addr = gateway_config.listen_addr.clone();
    let app = create_router(GatewayState::new(control, gateway_config));

    // Start HTTP server
    tracing::info!(listen_addr = %listen_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

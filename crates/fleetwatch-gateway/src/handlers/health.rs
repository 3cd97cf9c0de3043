//! Liveness check.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use fleetwatch_control::FleetControl;

use crate::state::GatewayState;

/// Body of `GET /health`.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Always `"healthy"` when the process can answer.
    pub status: &'static str,
    /// Crate version of the running binary.
    pub version: &'static str,
    /// Agent transport sessions currently registered.
    pub connections: usize,
}

/// `GET /health`. Public; no acting user required.
pub async fn health<C>(State(state): State<Arc<GatewayState<C>>>) -> Json<HealthResponse>
where
    C: FleetControl + 'static,
{
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        connections: state.control.connection_count(),
    })
}

//! Live connection listing.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::Json;

use fleetwatch_control::{FleetControl, ListOptions};

use crate::error::ApiError;
use crate::state::GatewayState;

/// List live agent connections with their liveness.
///
/// # Errors
///
/// Returns `invalid_cursor` for a bad continuation token.
pub async fn list_connections<C>(
    State(state): State<Arc<GatewayState<C>>>,
    Query(options): Query<ListOptions>,
) -> Result<impl IntoResponse, ApiError>
where
    C: FleetControl + 'static,
{
    let connections = state.control.list_connections(&options).await?;
    Ok(Json(connections))
}

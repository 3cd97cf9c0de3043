//! Agent endpoints.
//!
//! Agent records are written by the session handler; the API only reads them.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;

use fleetwatch_control::{FleetControl, InstanceUid, ListOptions};

use super::parse_id;
use crate::error::ApiError;
use crate::state::GatewayState;

/// List agents that have identified themselves.
///
/// # Errors
///
/// Returns `invalid_cursor` for a bad continuation token.
pub async fn list_agents<C>(
    State(state): State<Arc<GatewayState<C>>>,
    Query(options): Query<ListOptions>,
) -> Result<impl IntoResponse, ApiError>
where
    C: FleetControl + 'static,
{
    let agents = state.control.list_agents(&options).await?;
    Ok(Json(agents))
}

/// Get a single agent.
///
/// # Errors
///
/// Returns `not_found` if the agent has never identified itself.
pub async fn get_agent<C>(
    State(state): State<Arc<GatewayState<C>>>,
    Path(instance_uid): Path<String>,
) -> Result<impl IntoResponse, ApiError>
where
    C: FleetControl + 'static,
{
    let instance_uid: InstanceUid = parse_id("instance uid", &instance_uid)?;
    let agent = state.control.get_agent(&instance_uid).await?;
    Ok(Json(agent))
}

/// List the commands addressed to one agent.
///
/// # Errors
///
/// Returns `invalid_cursor` for a bad continuation token.
pub async fn list_agent_commands<C>(
    State(state): State<Arc<GatewayState<C>>>,
    Path(instance_uid): Path<String>,
    Query(options): Query<ListOptions>,
) -> Result<impl IntoResponse, ApiError>
where
    C: FleetControl + 'static,
{
    let instance_uid: InstanceUid = parse_id("instance uid", &instance_uid)?;
    let commands = state
        .control
        .list_commands_for_instance(&instance_uid, &options)
        .await?;
    Ok(Json(commands))
}

//! Command endpoints.
//!
//! Commands are write-once: they can be created and read, never changed.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;

use fleetwatch_control::{CommandId, CreateCommandRequest, FleetControl, ListOptions};

use super::parse_id;
use crate::auth::ActingUser;
use crate::error::ApiError;
use crate::state::GatewayState;

/// Issue a command to an agent.
///
/// The command is delivered the next time the agent talks to the server.
///
/// # Errors
///
/// Returns an error if the acting user is missing or persistence fails.
pub async fn create_command<C>(
    State(state): State<Arc<GatewayState<C>>>,
    user: ActingUser,
    Json(body): Json<CreateCommandRequest>,
) -> Result<impl IntoResponse, ApiError>
where
    C: FleetControl + 'static,
{
    let command = state.control.create_command(body).await?;

    tracing::info!(
        command_id = %command.command_id,
        instance_uid = %command.target_instance_uid,
        acting_user = %user.as_str(),
        "Command issued"
    );

    Ok((StatusCode::CREATED, Json(command)))
}

/// Get a single command by id.
///
/// # Errors
///
/// Returns `not_found` for an unknown id.
pub async fn get_command<C>(
    State(state): State<Arc<GatewayState<C>>>,
    Path(command_id): Path<String>,
) -> Result<impl IntoResponse, ApiError>
where
    C: FleetControl + 'static,
{
    let command_id: CommandId = parse_id("command id", &command_id)?;
    let command = state.control.get_command(&command_id).await?;
    Ok(Json(command))
}

/// List all commands in creation order.
///
/// # Errors
///
/// Returns `invalid_cursor` for a bad continuation token.
pub async fn list_commands<C>(
    State(state): State<Arc<GatewayState<C>>>,
    Query(options): Query<ListOptions>,
) -> Result<impl IntoResponse, ApiError>
where
    C: FleetControl + 'static,
{
    let commands = state.control.list_commands(&options).await?;
    Ok(Json(commands))
}

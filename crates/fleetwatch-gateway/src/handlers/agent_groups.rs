//! Agent group endpoints.
//!
//! Deleting a group tombstones it: it stops matching agents and drops out of
//! default listings, but stays readable by name and keeps its name reserved.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use fleetwatch_control::{
    CreateAgentGroupRequest, FleetControl, ListOptions, UpdateAgentGroupRequest,
};

use crate::auth::ActingUser;
use crate::error::ApiError;
use crate::state::GatewayState;

/// Query parameters for listing agent groups.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListAgentGroupsQuery {
    /// Maximum number of items.
    #[serde(default)]
    pub limit: u32,
    /// Continuation token.
    #[serde(default, rename = "continue")]
    pub continue_token: Option<String>,
    /// Include tombstoned groups.
    #[serde(default)]
    pub include_deleted: bool,
}

/// Create an agent group.
///
/// # Errors
///
/// Returns `already_exists` if the name was ever used, and
/// `validation_failed` for malformed input.
pub async fn create_agent_group<C>(
    State(state): State<Arc<GatewayState<C>>>,
    user: ActingUser,
    Json(body): Json<CreateAgentGroupRequest>,
) -> Result<impl IntoResponse, ApiError>
where
    C: FleetControl + 'static,
{
    let group = state
        .control
        .create_agent_group(body, user.as_str())
        .await?;
    Ok((StatusCode::CREATED, Json(group)))
}

/// List agent groups in name order.
///
/// # Errors
///
/// Returns `invalid_cursor` for a bad continuation token.
pub async fn list_agent_groups<C>(
    State(state): State<Arc<GatewayState<C>>>,
    Query(query): Query<ListAgentGroupsQuery>,
) -> Result<impl IntoResponse, ApiError>
where
    C: FleetControl + 'static,
{
    let options = ListOptions {
        limit: query.limit,
        continue_token: query.continue_token,
    };
    let groups = state
        .control
        .list_agent_groups(&options, query.include_deleted)
        .await?;
    Ok(Json(groups))
}

/// Get an agent group by name, including deleted ones.
///
/// # Errors
///
/// Returns `not_found` if no group ever had this name.
pub async fn get_agent_group<C>(
    State(state): State<Arc<GatewayState<C>>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError>
where
    C: FleetControl + 'static,
{
    let group = state.control.get_agent_group(&name).await?;
    Ok(Json(group))
}

/// Replace the priority, selector and configuration of a group.
///
/// # Errors
///
/// Returns `not_found` if the group does not exist or is deleted.
pub async fn update_agent_group<C>(
    State(state): State<Arc<GatewayState<C>>>,
    user: ActingUser,
    Path(name): Path<String>,
    Json(body): Json<UpdateAgentGroupRequest>,
) -> Result<impl IntoResponse, ApiError>
where
    C: FleetControl + 'static,
{
    let group = state
        .control
        .update_agent_group(&name, body, user.as_str())
        .await?;
    Ok(Json(group))
}

/// Soft-delete a group. Returns the tombstoned group.
///
/// # Errors
///
/// Returns `not_found` if the group does not exist or is already deleted.
pub async fn delete_agent_group<C>(
    State(state): State<Arc<GatewayState<C>>>,
    user: ActingUser,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError>
where
    C: FleetControl + 'static,
{
    let group = state
        .control
        .delete_agent_group(&name, user.as_str())
        .await?;
    Ok(Json(group))
}

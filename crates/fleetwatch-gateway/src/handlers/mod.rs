//! HTTP request handlers.
//!
//! This module contains all the endpoint handlers for the gateway API.

pub mod agent_groups;
pub mod agents;
pub mod commands;
pub mod connections;
pub mod health;
pub mod opamp;

use std::str::FromStr;

use crate::error::ApiError;

/// Parse an identifier taken from the request path.
fn parse_id<T>(what: &str, raw: &str) -> Result<T, ApiError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse()
        .map_err(|e| ApiError::BadRequest(format!("invalid {what}: {e}")))
}

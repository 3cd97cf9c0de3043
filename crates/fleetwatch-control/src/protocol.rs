//! Agent protocol messages.
//!
//! One JSON document per transport frame. Agents send [`AgentToServer`] and
//! receive [`ServerToAgent`]; every field other than the instance id is
//! optional on the way in.

use fleetwatch_core::{CommandId, InstanceUid};
use fleetwatch_store::{AgentConfig, AgentDescription, Command, CommandKind};
use serde::{Deserialize, Serialize};

use crate::error::{ControlError, Result};

/// Largest inbound message accepted, in bytes.
pub const MAX_MESSAGE_BYTES: usize = 4 * 1024 * 1024;

/// A message from an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentToServer {
    /// The sender's stable identifier.
    pub instance_uid: InstanceUid,
    /// Monotonically increasing per-session counter.
    #[serde(default)]
    pub sequence_num: Option<u64>,
    /// Self-description, sent on first contact and whenever it changes.
    #[serde(default)]
    pub agent_description: Option<AgentDescription>,
    /// Outcome of the last configuration push.
    #[serde(default)]
    pub remote_config_status: Option<RemoteConfigStatus>,
    /// Commands the agent has executed.
    #[serde(default)]
    pub command_acks: Vec<CommandId>,
    /// The agent is about to close the connection.
    #[serde(default)]
    pub agent_disconnect: bool,
}

/// What an agent reports about its configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfigStatus {
    /// Hash of the configuration the agent last received.
    pub last_remote_config_hash: String,
    /// Whether that configuration is in effect.
    pub status: RemoteConfigState,
    /// Detail when `status` is `failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Progress of applying a pushed configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteConfigState {
    /// No configuration has been received.
    Unset,
    /// The configuration is being applied.
    Applying,
    /// The configuration is in effect.
    Applied,
    /// Applying the configuration failed.
    Failed,
}

/// A reply to an agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerToAgent {
    /// The agent the reply is for, once known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_uid: Option<InstanceUid>,
    /// Configuration the agent should apply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_config: Option<RemoteConfig>,
    /// Commands to execute.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub commands: Vec<CommandDelivery>,
    /// Set when the inbound message could not be processed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_response: Option<ErrorResponse>,
    /// Requests to the agent.
    #[serde(default)]
    pub flags: ServerFlags,
}

impl ServerToAgent {
    /// An empty reply addressed to `instance_uid`.
    #[must_use]
    pub fn to(instance_uid: Option<InstanceUid>) -> Self {
        Self {
            instance_uid,
            ..Self::default()
        }
    }

    /// A reply carrying only an error.
    #[must_use]
    pub fn error(
        instance_uid: Option<InstanceUid>,
        kind: ErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            instance_uid,
            error_response: Some(ErrorResponse {
                kind,
                message: message.into(),
            }),
            ..Self::default()
        }
    }
}

/// Configuration pushed to an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// The configuration document.
    pub config: AgentConfig,
    /// Hash the agent echoes back once applied.
    pub config_hash: String,
}

impl From<&AgentConfig> for RemoteConfig {
    fn from(config: &AgentConfig) -> Self {
        Self {
            config_hash: config.hash(),
            config: config.clone(),
        }
    }
}

/// One command delivered to an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandDelivery {
    /// Id the agent acknowledges with.
    pub command_id: CommandId,
    /// What to do.
    pub kind: CommandKind,
    /// Opaque payload.
    #[serde(default)]
    pub data: serde_json::Value,
}

impl From<&Command> for CommandDelivery {
    fn from(command: &Command) -> Self {
        Self {
            command_id: command.command_id,
            kind: command.kind,
            data: command.data.clone(),
        }
    }
}

/// An in-band error indication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error category.
    pub kind: ErrorKind,
    /// Generic human-readable description.
    pub message: String,
}

/// Categories of in-band errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The message was malformed or inconsistent with the session.
    BadRequest,
    /// The server could not process the message right now.
    Unavailable,
}

/// Requests the server makes of the agent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerFlags {
    /// Resend the full self-description and status.
    #[serde(default)]
    pub report_full_state: bool,
}

/// Parse an inbound frame.
///
/// # Errors
///
/// Returns `ControlError::Protocol` if the frame is too large or is not a
/// valid message.
pub fn decode(frame: &[u8]) -> Result<AgentToServer> {
    if frame.len() > MAX_MESSAGE_BYTES {
        return Err(ControlError::Protocol(format!(
            "message exceeds {MAX_MESSAGE_BYTES} bytes"
        )));
    }
    serde_json::from_slice(frame).map_err(|e| ControlError::Protocol(e.to_string()))
}

/// Serialize an outbound reply.
///
/// # Errors
///
/// Returns `ControlError::Protocol` if the reply cannot be serialized.
pub fn encode(reply: &ServerToAgent) -> Result<String> {
    serde_json::to_string(reply).map_err(|e| ControlError::Protocol(e.to_string()))
}

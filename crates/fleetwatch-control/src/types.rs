//! Request, response and configuration types for control plane operations.

use chrono::{DateTime, Utc};
use fleetwatch_core::{ConnectionId, InstanceUid, PageLimits};
use fleetwatch_store::{AgentConfig, AgentSelector, CommandKind};
use serde::{Deserialize, Serialize};

/// Request to issue a command to an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCommandRequest {
    /// What the agent is asked to do.
    pub kind: CommandKind,
    /// The agent the command is addressed to.
    pub target_instance_uid: InstanceUid,
    /// Opaque payload passed through to the agent.
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Request to create an agent group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAgentGroupRequest {
    /// Unique name of the group.
    pub name: String,
    /// Higher priority wins when several groups match.
    #[serde(default)]
    pub priority: i32,
    /// Which agents belong to the group.
    #[serde(default)]
    pub selector: AgentSelector,
    /// Configuration pushed to member agents.
    #[serde(default)]
    pub config: Option<AgentConfig>,
}

impl CreateAgentGroupRequest {
    /// A request for a group with no selector, priority 0 and no config.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            priority: 0,
            selector: AgentSelector::default(),
            config: None,
        }
    }
}

/// Request to replace the mutable fields of an agent group.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateAgentGroupRequest {
    /// New priority.
    #[serde(default)]
    pub priority: i32,
    /// New selector.
    #[serde(default)]
    pub selector: AgentSelector,
    /// New configuration; `None` detaches it.
    #[serde(default)]
    pub config: Option<AgentConfig>,
}

/// A snapshot of one live connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    /// Transport-assigned connection identifier.
    pub connection_id: ConnectionId,
    /// The agent on the other end, once it has identified itself.
    pub instance_uid: Option<InstanceUid>,
    /// When the connection was registered.
    pub registered_at: DateTime<Utc>,
    /// When the last inbound message arrived.
    pub last_communicated_at: DateTime<Utc>,
    /// Liveness as of the time the snapshot was taken.
    pub alive: bool,
}

/// Configuration for the control plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    /// Silence after which a connection is no longer alive (seconds).
    #[serde(default = "default_liveness_threshold_seconds")]
    pub liveness_threshold_seconds: u64,
    /// Upper bound on commands included in one reply.
    #[serde(default = "default_max_commands_per_reply")]
    pub max_commands_per_reply: usize,
    /// Default and maximum page sizes for listings.
    #[serde(default)]
    pub page_limits: PageLimits,
}

fn default_liveness_threshold_seconds() -> u64 {
    60
}

fn default_max_commands_per_reply() -> usize {
    16
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            liveness_threshold_seconds: default_liveness_threshold_seconds(),
            max_commands_per_reply: default_max_commands_per_reply(),
            page_limits: PageLimits::default(),
        }
    }
}

impl ControlConfig {
    /// The liveness threshold as a duration.
    #[must_use]
    pub fn liveness_threshold(&self) -> chrono::Duration {
        // Caps absurd values instead of overflowing.
        let secs = self.liveness_threshold_seconds.min(10 * 365 * 24 * 3600);
        chrono::Duration::from_std(std::time::Duration::from_secs(secs))
            .unwrap_or_else(|_| chrono::Duration::days(3650))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_config_defaults() {
        let config = ControlConfig::default();
        assert_eq!(config.liveness_threshold_seconds, 60);
        assert_eq!(config.max_commands_per_reply, 16);
        assert_eq!(config.liveness_threshold(), chrono::Duration::seconds(60));
    }

    #[test]
    fn control_config_deserializes_partial() {
        let config: ControlConfig =
            serde_json::from_str(r#"{"liveness_threshold_seconds": 5}"#).unwrap();
        assert_eq!(config.liveness_threshold_seconds, 5);
        assert_eq!(config.page_limits, PageLimits::default());
    }

    #[test]
    fn huge_threshold_does_not_overflow() {
        let config = ControlConfig {
            liveness_threshold_seconds: u64::MAX,
            ..Default::default()
        };
        assert!(config.liveness_threshold() > chrono::Duration::days(365));
    }

    #[test]
    fn create_command_request_defaults_data() {
        let uid = InstanceUid::generate();
        let request: CreateCommandRequest = serde_json::from_value(serde_json::json!({
            "kind": "restart",
            "target_instance_uid": uid.to_string(),
        }))
        .unwrap();
        assert_eq!(request.kind, CommandKind::Restart);
        assert!(request.data.is_null());
    }
}

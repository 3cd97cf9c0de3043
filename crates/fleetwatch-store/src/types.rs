//! Domain types stored in the database.
//!
//! These types represent the persisted state of commands, agent groups and
//! agents.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use fleetwatch_core::{CommandId, InstanceUid};
use serde::{Deserialize, Serialize};

/// A command issued to an agent. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Unique identifier, assigned at creation.
    pub command_id: CommandId,
    /// What the agent is asked to do.
    pub kind: CommandKind,
    /// The agent the command is addressed to.
    pub target_instance_uid: InstanceUid,
    /// Opaque payload interpreted by the agent.
    #[serde(default)]
    pub data: serde_json::Value,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl Command {
    /// Where this command sits in its target's command stream.
    #[must_use]
    pub const fn position(&self) -> CommandPosition {
        CommandPosition {
            created_at: self.created_at,
            command_id: self.command_id,
        }
    }
}

/// A point in one agent's command stream.
///
/// Compare positions through [`CommandPosition::index_key`], which orders by
/// creation time at key precision, then id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandPosition {
    /// Creation time of the command at this position.
    pub created_at: DateTime<Utc>,
    /// Id of the command at this position.
    pub command_id: CommandId,
}

impl CommandPosition {
    /// The per-agent index key of this position.
    #[must_use]
    pub fn index_key(&self, instance_uid: &InstanceUid) -> Vec<u8> {
        crate::keys::instance_command_key(instance_uid, self.created_at, &self.command_id)
    }
}

/// The kinds of commands an agent understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    /// Ask the agent to re-read its configuration.
    UpdateAgentConfig,
    /// Ask the agent to restart itself.
    Restart,
}

impl CommandKind {
    /// The wire name of this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UpdateAgentConfig => "update_agent_config",
            Self::Restart => "restart",
        }
    }
}

/// Attribute maps an agent reports about itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentDescription {
    /// Attributes that identify the agent (host name, service name, ...).
    #[serde(default)]
    pub identifying_attributes: BTreeMap<String, String>,
    /// Informational attributes (OS version, build, ...).
    #[serde(default)]
    pub non_identifying_attributes: BTreeMap<String, String>,
}

/// Equality filters choosing which agents belong to a group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSelector {
    /// Every entry must equal the agent's identifying attribute of that key.
    #[serde(default)]
    pub identifying_attributes: BTreeMap<String, String>,
    /// Stored for reference; not used when matching.
    #[serde(default)]
    pub non_identifying_attributes: BTreeMap<String, String>,
}

/// A configuration payload attached to an agent group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Raw configuration document.
    pub body: String,
    /// Media type of `body`, e.g. `text/yaml`.
    #[serde(default = "default_content_type")]
    pub content_type: String,
}

fn default_content_type() -> String {
    "text/yaml".to_string()
}

impl AgentConfig {
    /// Content hash identifying this exact configuration, hex encoded.
    ///
    /// Agents echo this back once they have applied the configuration.
    #[must_use]
    pub fn hash(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.content_type.as_bytes());
        hasher.update(&[0]);
        hasher.update(self.body.as_bytes());
        hex::encode(hasher.finalize().as_bytes())
    }
}

/// Whether a group is live or tombstoned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupLifecycle {
    /// The group participates in selector resolution.
    Active,
    /// The group was deleted; its name stays reserved.
    Deleted {
        /// When the group was deleted.
        deleted_at: DateTime<Utc>,
        /// Who deleted it.
        deleted_by: String,
    },
}

/// A named set of agents sharing one configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentGroup {
    /// Unique, stable name.
    pub name: String,
    /// Higher priority wins when several groups match.
    pub priority: i32,
    /// Which agents belong to the group.
    pub selector: AgentSelector,
    /// Configuration pushed to member agents.
    #[serde(default)]
    pub config: Option<AgentConfig>,
    /// Lifecycle conditions, one per type.
    #[serde(default)]
    pub conditions: Conditions,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Who created the group.
    pub created_by: String,
    /// Last modification timestamp.
    pub updated_at: DateTime<Utc>,
    /// Live or tombstoned.
    pub lifecycle: GroupLifecycle,
}

impl AgentGroup {
    /// Returns true unless the group has been tombstoned.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self.lifecycle, GroupLifecycle::Active)
    }
}

/// Condition types tracked on an agent group, in display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ConditionType {
    /// The group was created.
    Created,
    /// The group was updated.
    Updated,
    /// The group was deleted.
    Deleted,
}

/// Tri-state condition status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionStatus {
    /// The condition holds.
    True,
    /// The condition does not hold.
    False,
    /// Not known.
    Unknown,
}

/// One lifecycle condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    /// Condition type.
    #[serde(rename = "type")]
    pub condition_type: ConditionType,
    /// Current status.
    pub status: ConditionStatus,
    /// When `status` last changed.
    pub last_transition_time: DateTime<Utc>,
    /// Machine-readable reason.
    #[serde(default)]
    pub reason: String,
    /// Human-readable detail.
    #[serde(default)]
    pub message: String,
}

/// Conditions keyed by type. Serialized as a list in type order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<Condition>", into = "Vec<Condition>")]
pub struct Conditions(BTreeMap<ConditionType, Condition>);

impl Conditions {
    /// Insert or update the condition of the given type.
    ///
    /// `last_transition_time` only moves when the status actually changes.
    pub fn upsert(
        &mut self,
        condition_type: ConditionType,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) {
        let reason = reason.into();
        let message = message.into();
        match self.0.get_mut(&condition_type) {
            Some(existing) => {
                if existing.status != status {
                    existing.status = status;
                    existing.last_transition_time = now;
                }
                existing.reason = reason;
                existing.message = message;
            }
            None => {
                self.0.insert(
                    condition_type,
                    Condition {
                        condition_type,
                        status,
                        last_transition_time: now,
                        reason,
                        message,
                    },
                );
            }
        }
    }

    /// Look up a condition by type.
    #[must_use]
    pub fn get(&self, condition_type: ConditionType) -> Option<&Condition> {
        self.0.get(&condition_type)
    }

    /// Iterate in type order.
    pub fn iter(&self) -> impl Iterator<Item = &Condition> {
        self.0.values()
    }

    /// Number of conditions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if no condition is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<Condition>> for Conditions {
    fn from(list: Vec<Condition>) -> Self {
        Self(list.into_iter().map(|c| (c.condition_type, c)).collect())
    }
}

impl From<Conditions> for Vec<Condition> {
    fn from(conditions: Conditions) -> Self {
        conditions.0.into_values().collect()
    }
}

/// What the control plane remembers about an agent across connections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    /// The agent's stable identifier.
    pub instance_uid: InstanceUid,
    /// Most recent self-description.
    #[serde(default)]
    pub description: AgentDescription,
    /// Hash of the configuration the agent last reported applying.
    #[serde(default)]
    pub reported_config_hash: Option<String>,
    /// Name of the group whose configuration the agent receives.
    #[serde(default)]
    pub effective_group: Option<String>,
    /// Every command up to and including this position has been acknowledged.
    #[serde(default)]
    pub acknowledged_through: Option<CommandPosition>,
    /// Acknowledged commands past `acknowledged_through`.
    #[serde(default)]
    pub acknowledged_commands: BTreeSet<CommandId>,
    /// When the agent was first identified.
    pub first_seen_at: DateTime<Utc>,
    /// When the agent last sent a message.
    pub last_seen_at: DateTime<Utc>,
}

impl Agent {
    /// A fresh record for an agent seen for the first time.
    #[must_use]
    pub fn new(instance_uid: InstanceUid, now: DateTime<Utc>) -> Self {
        Self {
            instance_uid,
            description: AgentDescription::default(),
            reported_config_hash: None,
            effective_group: None,
            acknowledged_through: None,
            acknowledged_commands: BTreeSet::new(),
            first_seen_at: now,
            last_seen_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn epoch() -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH
    }

    #[test]
    fn config_hash_depends_on_body_and_type() {
        let a = AgentConfig {
            body: "receivers: {}".to_string(),
            content_type: "text/yaml".to_string(),
        };
        let mut b = a.clone();
        assert_eq!(a.hash(), b.hash());
        assert_eq!(a.hash().len(), 64);

        b.body.push(' ');
        assert_ne!(a.hash(), b.hash());

        let mut c = a.clone();
        c.content_type = "application/json".to_string();
        assert_ne!(a.hash(), c.hash());
    }

    #[test]
    fn condition_upsert_keeps_transition_time_when_status_unchanged() {
        let mut conditions = Conditions::default();
        let t0 = epoch();
        let t1 = t0 + chrono::Duration::seconds(5);

        conditions.upsert(ConditionType::Updated, ConditionStatus::True, "Updated", "v1", t0);
        conditions.upsert(ConditionType::Updated, ConditionStatus::True, "Updated", "v2", t1);

        let updated = conditions.get(ConditionType::Updated).unwrap();
        assert_eq!(updated.last_transition_time, t0);
        assert_eq!(updated.message, "v2");

        conditions.upsert(ConditionType::Updated, ConditionStatus::False, "Reverted", "", t1);
        let updated = conditions.get(ConditionType::Updated).unwrap();
        assert_eq!(updated.last_transition_time, t1);
        assert_eq!(conditions.len(), 1);
    }

    #[test]
    fn conditions_iterate_in_type_order() {
        let mut conditions = Conditions::default();
        let now = epoch();
        conditions.upsert(ConditionType::Deleted, ConditionStatus::True, "", "", now);
        conditions.upsert(ConditionType::Created, ConditionStatus::True, "", "", now);
        conditions.upsert(ConditionType::Updated, ConditionStatus::True, "", "", now);

        let order: Vec<_> = conditions.iter().map(|c| c.condition_type).collect();
        assert_eq!(
            order,
            vec![
                ConditionType::Created,
                ConditionType::Updated,
                ConditionType::Deleted
            ]
        );
    }

    #[test]
    fn conditions_serialize_as_list() {
        let mut conditions = Conditions::default();
        conditions.upsert(ConditionType::Created, ConditionStatus::True, "Created", "", epoch());

        let json = serde_json::to_value(&conditions).unwrap();
        assert!(json.is_array());
        assert_eq!(json[0]["type"], "Created");
        assert_eq!(json[0]["status"], "True");

        let back: Conditions = serde_json::from_value(json).unwrap();
        assert_eq!(back, conditions);
    }

    #[test]
    fn position_key_matches_instance_index() {
        let uid = InstanceUid::generate();
        let command = Command {
            command_id: CommandId::generate(),
            kind: CommandKind::Restart,
            target_instance_uid: uid,
            data: serde_json::Value::Null,
            created_at: epoch(),
        };
        let later = Command {
            command_id: CommandId::generate(),
            created_at: epoch() + chrono::Duration::microseconds(1),
            ..command.clone()
        };

        assert_eq!(
            command.position().index_key(&uid),
            crate::keys::instance_command_key(&uid, command.created_at, &command.command_id)
        );
        assert!(command.position().index_key(&uid) < later.position().index_key(&uid));
    }

    #[test]
    fn command_kind_wire_names() {
        assert_eq!(
            serde_json::to_value(CommandKind::UpdateAgentConfig).unwrap(),
            "update_agent_config"
        );
        assert_eq!(CommandKind::Restart.as_str(), "restart");
    }

    #[test]
    fn group_survives_cbor() {
        let group = AgentGroup {
            name: "edge".to_string(),
            priority: 3,
            selector: AgentSelector::default(),
            config: None,
            conditions: Conditions::default(),
            created_at: epoch(),
            created_by: "alice".to_string(),
            updated_at: epoch(),
            lifecycle: GroupLifecycle::Deleted {
                deleted_at: epoch(),
                deleted_by: "bob".to_string(),
            },
        };
        let mut buf = Vec::new();
        ciborium::into_writer(&group, &mut buf).unwrap();
        let back: AgentGroup = ciborium::from_reader(buf.as_slice()).unwrap();
        assert_eq!(back, group);
        assert!(!back.is_active());
    }
}

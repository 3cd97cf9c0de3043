//! Database schema definitions and column families.
//!
//! This module defines the column families used in `RocksDB` storage.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Primary command records, keyed by `command_id`.
    pub const COMMANDS: &str = "commands";

    /// Index: commands in creation order, keyed by `created_at || command_id`.
    pub const COMMANDS_BY_TIME: &str = "commands_by_time";

    /// Index: commands per agent, keyed by `instance_uid || created_at || command_id`.
    pub const COMMANDS_BY_INSTANCE: &str = "commands_by_instance";

    /// Agent group records, keyed by the UTF-8 group name.
    pub const AGENT_GROUPS: &str = "agent_groups";

    /// Agent records, keyed by `instance_uid`.
    pub const AGENTS: &str = "agents";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![
        cf::COMMANDS,
        cf::COMMANDS_BY_TIME,
        cf::COMMANDS_BY_INSTANCE,
        cf::AGENT_GROUPS,
        cf::AGENTS,
    ]
}

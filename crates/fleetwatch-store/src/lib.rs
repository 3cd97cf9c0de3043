//! Storage layer for fleetwatch.
//!
//! This crate provides persistent storage for commands, agent groups and agent
//! records behind the [`Store`] trait, with a `RocksDB` implementation for
//! production and an in-memory one for tests.
//!
//! # Architecture
//!
//! The `RocksDB` storage uses the following column families:
//!
//! - `commands`: Primary command records, keyed by `command_id`
//! - `commands_by_time`: Index for the global listing in creation order
//! - `commands_by_instance`: Index for listing commands by target agent
//! - `agent_groups`: Agent group records, keyed by name
//! - `agents`: Agent records, keyed by `instance_uid`
//!
//! Paged listings take a [`PageRequest`] and return a [`Page`] whose
//! `last_key` is the store key of the last item; callers wrap it into an
//! opaque continuation token.
//!
//! # Example
//!
//! ```no_run
//! use fleetwatch_store::{RocksStore, Store};
//! use fleetwatch_core::{InstanceUid, PageRequest};
//!
//! let store = RocksStore::open("/tmp/fleetwatch-db").unwrap();
//!
//! let uid = InstanceUid::from_bytes([0u8; 16]);
//! let commands = store.list_commands_by_instance(&uid).unwrap();
//! let first_page = store.page_commands(&PageRequest::first(50)).unwrap();
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod keys;
pub mod memory;
pub mod rocks;
pub mod schema;
pub mod types;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use rocks::RocksStore;
pub use types::{
    Agent, AgentConfig, AgentDescription, AgentGroup, AgentSelector, Command, CommandKind,
    CommandPosition, Condition, ConditionStatus, ConditionType, Conditions, GroupLifecycle,
};

use fleetwatch_core::{CommandId, InstanceUid, Page, PageRequest};

/// The storage trait defining all database operations.
///
/// This trait abstracts the storage layer, allowing for different implementations
/// (e.g., `RocksDB`, in-memory for testing).
pub trait Store: Send + Sync {
    // =========================================================================
    // Command Operations
    // =========================================================================

    /// Insert a new command record and its indexes.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AlreadyExists` if a command with the same ID is
    /// already stored. Existing records are never overwritten.
    fn insert_command(&self, command: &Command) -> Result<()>;

    /// Get a command by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_command(&self, command_id: &CommandId) -> Result<Option<Command>>;

    /// List every command addressed to an agent, in creation order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_commands_by_instance(&self, instance_uid: &InstanceUid) -> Result<Vec<Command>>;

    /// Page through all commands in creation order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn page_commands(&self, request: &PageRequest) -> Result<Page<Command>>;

    /// Page through the commands addressed to one agent, in creation order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn page_commands_by_instance(
        &self,
        instance_uid: &InstanceUid,
        request: &PageRequest,
    ) -> Result<Page<Command>>;

    // =========================================================================
    // Agent Group Operations
    // =========================================================================

    /// Insert a new agent group.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AlreadyExists` if the name is taken, including by
    /// a tombstoned group.
    fn insert_agent_group(&self, group: &AgentGroup) -> Result<()>;

    /// Replace an existing agent group.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if no group has this name.
    fn update_agent_group(&self, group: &AgentGroup) -> Result<()>;

    /// Get an agent group by name, tombstoned or not.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_agent_group(&self, name: &str) -> Result<Option<AgentGroup>>;

    /// List all active agent groups in name order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_active_agent_groups(&self) -> Result<Vec<AgentGroup>>;

    /// Page through agent groups in name order.
    ///
    /// Tombstoned groups are skipped unless `include_deleted` is set.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn page_agent_groups(
        &self,
        request: &PageRequest,
        include_deleted: bool,
    ) -> Result<Page<AgentGroup>>;

    // =========================================================================
    // Agent Operations
    // =========================================================================

    /// Insert or update an agent record.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_agent(&self, agent: &Agent) -> Result<()>;

    /// Get an agent by instance UID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_agent(&self, instance_uid: &InstanceUid) -> Result<Option<Agent>>;

    /// Page through agents in instance UID order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn page_agents(&self, request: &PageRequest) -> Result<Page<Agent>>;
}

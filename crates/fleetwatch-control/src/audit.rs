//! Append-only log of commands issued to agents.
//!
//! Commands are written once and never modified. The log is the source of
//! truth for delivery: sessions pull from it on every message instead of
//! having commands pushed into per-connection queues.

use std::sync::Arc;

use fleetwatch_core::{Clock, CommandId, InstanceUid, Page, PageRequest};
use fleetwatch_store::{Command, CommandKind, Store, StoreError};
use tracing::{info, warn};

use crate::error::{ControlError, Result};

const ID_ATTEMPTS: usize = 3;

/// Lookup and append operations over the command log.
pub trait CommandAuditLog: Send + Sync {
    /// Assign an id and creation time, persist, and return the stored command.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::Store` if persistence fails.
    fn save_command(
        &self,
        kind: CommandKind,
        target_instance_uid: InstanceUid,
        data: serde_json::Value,
    ) -> Result<Command>;

    /// Fetch one command.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::NotFound` for an unknown id.
    fn get_command(&self, command_id: &CommandId) -> Result<Command>;

    /// Every command ever addressed to an agent, in creation order.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::Store` if the read fails.
    fn commands_for_instance(&self, instance_uid: &InstanceUid) -> Result<Vec<Command>>;

    /// Page through all commands ordered by creation time, then id.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::Store` if the read fails.
    fn list_commands(&self, request: &PageRequest) -> Result<Page<Command>>;

    /// Page through the commands addressed to one agent.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::Store` if the read fails.
    fn list_commands_for_instance(
        &self,
        instance_uid: &InstanceUid,
        request: &PageRequest,
    ) -> Result<Page<Command>>;
}

/// [`CommandAuditLog`] persisted in a [`Store`].
pub struct StoreCommandLog<S: Store> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
}

impl<S: Store> StoreCommandLog<S> {
    /// Create a log writing to `store` and stamping times from `clock`.
    #[must_use]
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }
}

impl<S: Store> CommandAuditLog for StoreCommandLog<S> {
    fn save_command(
        &self,
        kind: CommandKind,
        target_instance_uid: InstanceUid,
        data: serde_json::Value,
    ) -> Result<Command> {
        let created_at = self.clock.now();
        let mut command = Command {
            command_id: CommandId::generate(),
            kind,
            target_instance_uid,
            data,
            created_at,
        };

        // The store refuses to overwrite; a colliding id just gets redrawn.
        for attempt in 1..=ID_ATTEMPTS {
            match self.store.insert_command(&command) {
                Ok(()) => {
                    info!(
                        command_id = %command.command_id,
                        instance_uid = %target_instance_uid,
                        kind = command.kind.as_str(),
                        "Saved command"
                    );
                    return Ok(command);
                }
                Err(StoreError::AlreadyExists) if attempt < ID_ATTEMPTS => {
                    warn!(command_id = %command.command_id, "Command id collision, retrying");
                    command.command_id = CommandId::generate();
                }
                Err(StoreError::AlreadyExists) => {
                    return Err(ControlError::already_exists("command", command.command_id));
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(ControlError::already_exists("command", command.command_id))
    }

    fn get_command(&self, command_id: &CommandId) -> Result<Command> {
        self.store
            .get_command(command_id)?
            .ok_or_else(|| ControlError::not_found("command", command_id))
    }

    fn commands_for_instance(&self, instance_uid: &InstanceUid) -> Result<Vec<Command>> {
        Ok(self.store.list_commands_by_instance(instance_uid)?)
    }

    fn list_commands(&self, request: &PageRequest) -> Result<Page<Command>> {
        Ok(self.store.page_commands(request)?)
    }

    fn list_commands_for_instance(
        &self,
        instance_uid: &InstanceUid,
        request: &PageRequest,
    ) -> Result<Page<Command>> {
        Ok(self.store.page_commands_by_instance(instance_uid, request)?)
    }
}

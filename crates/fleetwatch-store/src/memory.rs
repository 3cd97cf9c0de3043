//! In-memory storage implementation.
//!
//! Mirrors the key layout of [`RocksStore`](crate::RocksStore) with ordered
//! maps so that listings and paging behave identically. Each table has its own
//! lock.

use std::collections::{BTreeMap, HashMap};

use fleetwatch_core::{paginate_sorted, CommandId, InstanceUid, Page, PageRequest};
use parking_lot::RwLock;

use crate::error::{Result, StoreError};
use crate::keys;
use crate::types::{Agent, AgentGroup, Command};
use crate::Store;

#[derive(Default)]
struct CommandTables {
    by_id: HashMap<CommandId, Command>,
    by_time: BTreeMap<Vec<u8>, CommandId>,
    by_instance: BTreeMap<Vec<u8>, CommandId>,
}

impl CommandTables {
    fn resolve<'a>(
        &'a self,
        index: impl Iterator<Item = (&'a Vec<u8>, &'a CommandId)> + 'a,
    ) -> impl Iterator<Item = (Vec<u8>, Command)> + 'a {
        index.filter_map(|(key, id)| self.by_id.get(id).map(|c| (key.clone(), c.clone())))
    }
}

/// Storage kept entirely in process memory.
#[derive(Default)]
pub struct MemoryStore {
    commands: RwLock<CommandTables>,
    agent_groups: RwLock<BTreeMap<String, AgentGroup>>,
    agents: RwLock<BTreeMap<InstanceUid, Agent>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn insert_command(&self, command: &Command) -> Result<()> {
        let mut tables = self.commands.write();
        if tables.by_id.contains_key(&command.command_id) {
            return Err(StoreError::AlreadyExists);
        }

        tables.by_time.insert(
            keys::command_time_key(command.created_at, &command.command_id),
            command.command_id,
        );
        tables.by_instance.insert(
            keys::instance_command_key(
                &command.target_instance_uid,
                command.created_at,
                &command.command_id,
            ),
            command.command_id,
        );
        tables.by_id.insert(command.command_id, command.clone());
        Ok(())
    }

    fn get_command(&self, command_id: &CommandId) -> Result<Option<Command>> {
        Ok(self.commands.read().by_id.get(command_id).cloned())
    }

    fn list_commands_by_instance(&self, instance_uid: &InstanceUid) -> Result<Vec<Command>> {
        let prefix = keys::instance_prefix(instance_uid);
        let tables = self.commands.read();
        let index = tables
            .by_instance
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix));
        Ok(tables.resolve(index).map(|(_, c)| c).collect())
    }

    fn page_commands(&self, request: &PageRequest) -> Result<Page<Command>> {
        let tables = self.commands.read();
        Ok(paginate_sorted(tables.resolve(tables.by_time.iter()), request))
    }

    fn page_commands_by_instance(
        &self,
        instance_uid: &InstanceUid,
        request: &PageRequest,
    ) -> Result<Page<Command>> {
        let prefix = keys::instance_prefix(instance_uid);
        let tables = self.commands.read();
        let index = tables
            .by_instance
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix));
        Ok(paginate_sorted(tables.resolve(index), request))
    }

    fn insert_agent_group(&self, group: &AgentGroup) -> Result<()> {
        let mut groups = self.agent_groups.write();
        if groups.contains_key(&group.name) {
            return Err(StoreError::AlreadyExists);
        }
        groups.insert(group.name.clone(), group.clone());
        Ok(())
    }

    fn update_agent_group(&self, group: &AgentGroup) -> Result<()> {
        let mut groups = self.agent_groups.write();
        let slot = groups.get_mut(&group.name).ok_or(StoreError::NotFound)?;
        *slot = group.clone();
        Ok(())
    }

    fn get_agent_group(&self, name: &str) -> Result<Option<AgentGroup>> {
        Ok(self.agent_groups.read().get(name).cloned())
    }

    fn list_active_agent_groups(&self) -> Result<Vec<AgentGroup>> {
        Ok(self
            .agent_groups
            .read()
            .values()
            .filter(|g| g.is_active())
            .cloned()
            .collect())
    }

    fn page_agent_groups(
        &self,
        request: &PageRequest,
        include_deleted: bool,
    ) -> Result<Page<AgentGroup>> {
        let groups = self.agent_groups.read();
        let entries = groups
            .iter()
            .filter(|(_, g)| include_deleted || g.is_active())
            .map(|(name, g)| (keys::agent_group_key(name), g.clone()));
        Ok(paginate_sorted(entries, request))
    }

    fn put_agent(&self, agent: &Agent) -> Result<()> {
        self.agents
            .write()
            .insert(agent.instance_uid, agent.clone());
        Ok(())
    }

    fn get_agent(&self, instance_uid: &InstanceUid) -> Result<Option<Agent>> {
        Ok(self.agents.read().get(instance_uid).cloned())
    }

    fn page_agents(&self, request: &PageRequest) -> Result<Page<Agent>> {
        let agents = self.agents.read();
        let entries = agents
            .iter()
            .map(|(uid, agent)| (keys::agent_key(uid), agent.clone()));
        Ok(paginate_sorted(entries, request))
    }
}

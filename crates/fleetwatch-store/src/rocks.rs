//! `RocksDB` storage implementation.
//!
//! This module provides the `RocksStore` implementation of the `Store` trait.

use std::path::Path;
use std::sync::Arc;

use fleetwatch_core::{CommandId, InstanceUid, Page, PageRequest};
use parking_lot::Mutex;
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, Direction, IteratorMode,
    MultiThreaded, Options, WriteBatch,
};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::schema::{all_column_families, cf};
use crate::types::{Agent, AgentGroup, Command};
use crate::Store;

const WRITE_STRIPES: usize = 16;

/// RocksDB-backed storage implementation.
///
/// Create-only inserts check for an existing key and write under a striped
/// lock, so concurrent inserts of distinct IDs rarely contend.
pub struct RocksStore {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
    command_stripes: [Mutex<()>; WRITE_STRIPES],
    group_lock: Mutex<()>,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(|e| StoreError::Database(e.to_string()))?;
        tracing::info!(path = %path.display(), "Opened RocksDB store");

        Ok(Self {
            db: Arc::new(db),
            command_stripes: std::array::from_fn(|_| Mutex::new(())),
            group_lock: Mutex::new(()),
        })
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    /// Serialize a value using CBOR.
    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn command_stripe(&self, command_id: &CommandId) -> &Mutex<()> {
        let index = usize::from(command_id.as_bytes()[0]) % WRITE_STRIPES;
        &self.command_stripes[index]
    }

    fn exists(&self, cf_name: &str, key: &[u8]) -> Result<bool> {
        let cf = self.cf(cf_name)?;
        self.db
            .get_pinned_cf(&cf, key)
            .map(|value| value.is_some())
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    /// Scan keys under `prefix` that sort after `request.after`.
    ///
    /// `load` turns a key/value pair into an item, or `None` to skip it.
    /// Past the page, `counts` decides from the stored value alone whether an
    /// entry adds to the remaining estimate; records are never loaded there.
    fn scan_page<T>(
        &self,
        cf_name: &str,
        prefix: &[u8],
        request: &PageRequest,
        mut load: impl FnMut(&[u8], &[u8]) -> Result<Option<T>>,
        mut counts: impl FnMut(&[u8]) -> Result<bool>,
    ) -> Result<Page<T>> {
        let cf = self.cf(cf_name)?;
        let start = match request.after.as_deref() {
            Some(after) if after > prefix => after,
            _ => prefix,
        };
        let limit = request.limit.max(1) as usize;

        let mut items = Vec::new();
        let mut last_key = None;
        let mut remaining = 0u64;

        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(start, Direction::Forward));
        for item in iter {
            let (key, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;

            // Stop if we're past the prefix
            if !key.starts_with(prefix) {
                break;
            }
            if !request.admits(&key) {
                continue;
            }

            if items.len() < limit {
                if let Some(loaded) = load(&key, &value)? {
                    items.push(loaded);
                    last_key = Some(key.to_vec());
                }
            } else if counts(&value)? {
                remaining += 1;
            }
        }

        Ok(Page {
            items,
            last_key,
            remaining,
        })
    }

    /// Load the command referenced by an index key.
    fn command_from_index(&self, key: &[u8]) -> Result<Option<Command>> {
        let command_id = keys::command_id_from_index_key(key)?;
        let command = self.get_command(&command_id)?;
        if command.is_none() {
            tracing::warn!(command_id = %command_id, "Command index entry without record");
        }
        Ok(command)
    }
}

impl Store for RocksStore {
    // =========================================================================
    // Command Operations
    // =========================================================================

    fn insert_command(&self, command: &Command) -> Result<()> {
        let cf_commands = self.cf(cf::COMMANDS)?;
        let cf_by_time = self.cf(cf::COMMANDS_BY_TIME)?;
        let cf_by_instance = self.cf(cf::COMMANDS_BY_INSTANCE)?;

        let command_key = keys::command_key(&command.command_id);
        let time_key = keys::command_time_key(command.created_at, &command.command_id);
        let instance_key = keys::instance_command_key(
            &command.target_instance_uid,
            command.created_at,
            &command.command_id,
        );
        let value = Self::serialize(command)?;

        let _guard = self.command_stripe(&command.command_id).lock();
        if self.exists(cf::COMMANDS, &command_key)? {
            return Err(StoreError::AlreadyExists);
        }

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_commands, &command_key, &value);
        batch.put_cf(&cf_by_time, &time_key, []);
        batch.put_cf(&cf_by_instance, &instance_key, []);

        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(())
    }

    fn get_command(&self, command_id: &CommandId) -> Result<Option<Command>> {
        let cf = self.cf(cf::COMMANDS)?;
        let key = keys::command_key(command_id);

        self.db
            .get_cf(&cf, key)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn list_commands_by_instance(&self, instance_uid: &InstanceUid) -> Result<Vec<Command>> {
        let cf_by_instance = self.cf(cf::COMMANDS_BY_INSTANCE)?;
        let prefix = keys::instance_prefix(instance_uid);

        let mut commands = Vec::new();
        let iter = self.db.iterator_cf(
            &cf_by_instance,
            IteratorMode::From(&prefix, Direction::Forward),
        );

        for item in iter {
            let (key, _) = item.map_err(|e| StoreError::Database(e.to_string()))?;

            if !key.starts_with(&prefix) {
                break;
            }

            if let Some(command) = self.command_from_index(&key)? {
                commands.push(command);
            }
        }

        Ok(commands)
    }

    fn page_commands(&self, request: &PageRequest) -> Result<Page<Command>> {
        self.scan_page(
            cf::COMMANDS_BY_TIME,
            &[],
            request,
            |key, _| self.command_from_index(key),
            |_| Ok(true),
        )
    }

    fn page_commands_by_instance(
        &self,
        instance_uid: &InstanceUid,
        request: &PageRequest,
    ) -> Result<Page<Command>> {
        let prefix = keys::instance_prefix(instance_uid);
        self.scan_page(
            cf::COMMANDS_BY_INSTANCE,
            &prefix,
            request,
            |key, _| self.command_from_index(key),
            |_| Ok(true),
        )
    }

    // =========================================================================
    // Agent Group Operations
    // =========================================================================

    fn insert_agent_group(&self, group: &AgentGroup) -> Result<()> {
        let cf = self.cf(cf::AGENT_GROUPS)?;
        let key = keys::agent_group_key(&group.name);
        let value = Self::serialize(group)?;

        let _guard = self.group_lock.lock();
        if self.exists(cf::AGENT_GROUPS, &key)? {
            return Err(StoreError::AlreadyExists);
        }

        self.db
            .put_cf(&cf, key, value)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn update_agent_group(&self, group: &AgentGroup) -> Result<()> {
        let cf = self.cf(cf::AGENT_GROUPS)?;
        let key = keys::agent_group_key(&group.name);
        let value = Self::serialize(group)?;

        let _guard = self.group_lock.lock();
        if !self.exists(cf::AGENT_GROUPS, &key)? {
            return Err(StoreError::NotFound);
        }

        self.db
            .put_cf(&cf, key, value)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn get_agent_group(&self, name: &str) -> Result<Option<AgentGroup>> {
        let cf = self.cf(cf::AGENT_GROUPS)?;
        let key = keys::agent_group_key(name);

        self.db
            .get_cf(&cf, key)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn list_active_agent_groups(&self) -> Result<Vec<AgentGroup>> {
        let cf = self.cf(cf::AGENT_GROUPS)?;

        let mut groups = Vec::new();
        let iter = self.db.iterator_cf(&cf, IteratorMode::Start);

        for item in iter {
            let (_, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            let group: AgentGroup = Self::deserialize(&value)?;
            if group.is_active() {
                groups.push(group);
            }
        }

        Ok(groups)
    }

    fn page_agent_groups(
        &self,
        request: &PageRequest,
        include_deleted: bool,
    ) -> Result<Page<AgentGroup>> {
        let visible = |group: &AgentGroup| include_deleted || group.is_active();
        self.scan_page(
            cf::AGENT_GROUPS,
            &[],
            request,
            |_, value| {
                let group: AgentGroup = Self::deserialize(value)?;
                Ok(visible(&group).then_some(group))
            },
            |value| Self::deserialize::<AgentGroup>(value).map(|group| visible(&group)),
        )
    }

    // =========================================================================
    // Agent Operations
    // =========================================================================

    fn put_agent(&self, agent: &Agent) -> Result<()> {
        let cf = self.cf(cf::AGENTS)?;
        let key = keys::agent_key(&agent.instance_uid);
        let value = Self::serialize(agent)?;

        self.db
            .put_cf(&cf, key, value)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn get_agent(&self, instance_uid: &InstanceUid) -> Result<Option<Agent>> {
        let cf = self.cf(cf::AGENTS)?;
        let key = keys::agent_key(instance_uid);

        self.db
            .get_cf(&cf, key)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn page_agents(&self, request: &PageRequest) -> Result<Page<Agent>> {
        self.scan_page(
            cf::AGENTS,
            &[],
            request,
            |_, value| Self::deserialize(value).map(Some),
            |_| Ok(true),
        )
    }
}

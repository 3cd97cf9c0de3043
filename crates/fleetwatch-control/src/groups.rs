//! Agent group administration.
//!
//! Groups are created, replaced and soft-deleted here. Every write records a
//! lifecycle condition and invalidates the selector snapshot so that sessions
//! pick up the change on their next message.

use std::sync::Arc;

use fleetwatch_core::{Clock, Page, PageRequest};
use fleetwatch_store::{
    AgentConfig, AgentGroup, AgentSelector, ConditionStatus, ConditionType, Conditions,
    GroupLifecycle, Store, StoreError,
};
use parking_lot::Mutex;
use tracing::info;

use crate::error::{ControlError, Result};
use crate::selector::SelectorResolver;
use crate::types::{CreateAgentGroupRequest, UpdateAgentGroupRequest};

const MAX_NAME_LEN: usize = 128;
const MAX_ATTRIBUTE_LEN: usize = 256;
const MAX_CONFIG_BYTES: usize = 1024 * 1024;

/// Create, update, soft-delete and read agent groups.
///
/// Updates and deletes read the current record, check its lifecycle and write
/// it back under one lock, so a tombstone is never overwritten.
pub struct AgentGroupService<S: Store> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    resolver: Arc<dyn SelectorResolver>,
    write_lock: Mutex<()>,
}

impl<S: Store> AgentGroupService<S> {
    /// Create a service over `store` that invalidates `resolver` on writes.
    #[must_use]
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>, resolver: Arc<dyn SelectorResolver>) -> Self {
        Self {
            store,
            clock,
            resolver,
            write_lock: Mutex::new(()),
        }
    }

    /// Create a group.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::Validation` for malformed input and
    /// `ControlError::AlreadyExists` if the name is taken, even by a deleted
    /// group.
    pub fn create(&self, request: CreateAgentGroupRequest, acting_user: &str) -> Result<AgentGroup> {
        validate_name(&request.name)?;
        validate_actor(acting_user)?;
        validate_selector(&request.selector)?;
        validate_config(request.config.as_ref())?;

        let now = self.clock.now();
        let mut conditions = Conditions::default();
        conditions.upsert(
            ConditionType::Created,
            ConditionStatus::True,
            "Created",
            format!("created by {acting_user}"),
            now,
        );

        let group = AgentGroup {
            name: request.name,
            priority: request.priority,
            selector: request.selector,
            config: request.config,
            conditions,
            created_at: now,
            created_by: acting_user.to_string(),
            updated_at: now,
            lifecycle: GroupLifecycle::Active,
        };

        match self.store.insert_agent_group(&group) {
            Ok(()) => {}
            Err(StoreError::AlreadyExists) => {
                return Err(ControlError::already_exists("agent group", &group.name));
            }
            Err(e) => return Err(e.into()),
        }
        self.resolver.invalidate();

        info!(
            group = %group.name,
            priority = group.priority,
            acting_user = %acting_user,
            "Created agent group"
        );
        Ok(group)
    }

    /// Replace the priority, selector and configuration of an active group.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::NotFound` if the group does not exist or has
    /// been deleted, and `ControlError::Validation` for malformed input.
    pub fn update(
        &self,
        name: &str,
        request: UpdateAgentGroupRequest,
        acting_user: &str,
    ) -> Result<AgentGroup> {
        validate_actor(acting_user)?;
        validate_selector(&request.selector)?;
        validate_config(request.config.as_ref())?;

        let _guard = self.write_lock.lock();
        let mut group = self.get_active(name)?;
        let now = self.clock.now();
        group.priority = request.priority;
        group.selector = request.selector;
        group.config = request.config;
        group.updated_at = now;
        group.conditions.upsert(
            ConditionType::Updated,
            ConditionStatus::True,
            "Updated",
            format!("updated by {acting_user}"),
            now,
        );

        self.write(&group)?;
        info!(group = %name, acting_user = %acting_user, "Updated agent group");
        Ok(group)
    }

    /// Tombstone a group. Its name stays reserved.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::NotFound` if the group does not exist or is
    /// already deleted.
    pub fn delete(&self, name: &str, acting_user: &str) -> Result<AgentGroup> {
        validate_actor(acting_user)?;

        let _guard = self.write_lock.lock();
        let mut group = self.get_active(name)?;
        let now = self.clock.now();
        group.lifecycle = GroupLifecycle::Deleted {
            deleted_at: now,
            deleted_by: acting_user.to_string(),
        };
        group.updated_at = now;
        group.conditions.upsert(
            ConditionType::Deleted,
            ConditionStatus::True,
            "Deleted",
            format!("deleted by {acting_user}"),
            now,
        );

        self.write(&group)?;
        info!(group = %name, acting_user = %acting_user, "Deleted agent group");
        Ok(group)
    }

    /// Fetch a group by name, including deleted ones.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::NotFound` if no group ever had this name.
    pub fn get(&self, name: &str) -> Result<AgentGroup> {
        self.store
            .get_agent_group(name)?
            .ok_or_else(|| ControlError::not_found("agent group", name))
    }

    /// Page through groups in name order.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::Store` if the read fails.
    pub fn list(&self, request: &PageRequest, include_deleted: bool) -> Result<Page<AgentGroup>> {
        Ok(self.store.page_agent_groups(request, include_deleted)?)
    }

    fn get_active(&self, name: &str) -> Result<AgentGroup> {
        let group = self.get(name)?;
        if !group.is_active() {
            return Err(ControlError::not_found("agent group", name));
        }
        Ok(group)
    }

    fn write(&self, group: &AgentGroup) -> Result<()> {
        match self.store.update_agent_group(group) {
            Ok(()) => {
                self.resolver.invalidate();
                Ok(())
            }
            Err(StoreError::NotFound) => Err(ControlError::not_found("agent group", &group.name)),
            Err(e) => Err(e.into()),
        }
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(ControlError::Validation(format!(
            "name must be 1 to {MAX_NAME_LEN} bytes"
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(ControlError::Validation(
            "name may only contain ASCII letters, digits, '-', '_' and '.'".to_string(),
        ));
    }
    Ok(())
}

fn validate_actor(acting_user: &str) -> Result<()> {
    if acting_user.trim().is_empty() {
        return Err(ControlError::Validation("acting user is required".to_string()));
    }
    Ok(())
}

fn validate_selector(selector: &AgentSelector) -> Result<()> {
    let entries = selector
        .identifying_attributes
        .iter()
        .chain(selector.non_identifying_attributes.iter());
    for (key, value) in entries {
        if key.is_empty() {
            return Err(ControlError::Validation(
                "selector keys must not be empty".to_string(),
            ));
        }
        if key.len() > MAX_ATTRIBUTE_LEN || value.len() > MAX_ATTRIBUTE_LEN {
            return Err(ControlError::Validation(format!(
                "selector entries are limited to {MAX_ATTRIBUTE_LEN} bytes"
            )));
        }
    }
    Ok(())
}

fn validate_config(config: Option<&AgentConfig>) -> Result<()> {
    let Some(config) = config else {
        return Ok(());
    };
    if config.content_type.trim().is_empty() {
        return Err(ControlError::Validation(
            "config content_type must not be empty".to_string(),
        ));
    }
    if config.body.len() > MAX_CONFIG_BYTES {
        return Err(ControlError::Validation(format!(
            "config body exceeds {MAX_CONFIG_BYTES} bytes"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selector::SnapshotResolver;
    use chrono::Duration;
    use fleetwatch_core::{CommandId, InstanceUid, ManualClock};
    use fleetwatch_store::{Agent, Command, MemoryStore};
    use std::collections::BTreeMap;
    use std::sync::mpsc;

    struct Fixture {
        service: AgentGroupService<MemoryStore>,
        resolver: Arc<SnapshotResolver<MemoryStore>>,
        clock: Arc<ManualClock>,
    }

    fn setup() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::at_epoch());
        let resolver = Arc::new(SnapshotResolver::new(Arc::clone(&store)));
        let service = AgentGroupService::new(store, clock.clone(), resolver.clone());
        Fixture {
            service,
            resolver,
            clock,
        }
    }

    fn prod_request(name: &str, priority: i32) -> CreateAgentGroupRequest {
        let mut request = CreateAgentGroupRequest::new(name);
        request.priority = priority;
        request
            .selector
            .identifying_attributes
            .insert("env".to_string(), "prod".to_string());
        request.config = Some(AgentConfig {
            body: format!("# {name}"),
            content_type: "text/yaml".to_string(),
        });
        request
    }

    fn prod_agent() -> BTreeMap<String, String> {
        BTreeMap::from([("env".to_string(), "prod".to_string())])
    }

    #[test]
    fn create_records_audit_fields() {
        let f = setup();
        let group = f.service.create(prod_request("edge", 5), "alice").unwrap();

        assert_eq!(group.created_by, "alice");
        assert!(group.is_active());
        let created = group.conditions.get(ConditionType::Created).unwrap();
        assert_eq!(created.status, ConditionStatus::True);
        assert_eq!(f.service.get("edge").unwrap(), group);
    }

    #[test]
    fn duplicate_name_conflicts() {
        let f = setup();
        f.service.create(prod_request("edge", 5), "alice").unwrap();
        assert!(matches!(
            f.service.create(prod_request("edge", 1), "bob"),
            Err(ControlError::AlreadyExists { .. })
        ));
    }

    #[test]
    fn validation_rejects_bad_input() {
        let f = setup();
        assert!(matches!(
            f.service.create(CreateAgentGroupRequest::new(""), "alice"),
            Err(ControlError::Validation(_))
        ));
        assert!(matches!(
            f.service.create(CreateAgentGroupRequest::new("has space"), "alice"),
            Err(ControlError::Validation(_))
        ));
        assert!(matches!(
            f.service.create(CreateAgentGroupRequest::new("ok"), "  "),
            Err(ControlError::Validation(_))
        ));

        let mut request = CreateAgentGroupRequest::new("ok");
        request
            .selector
            .identifying_attributes
            .insert(String::new(), "x".to_string());
        assert!(matches!(
            f.service.create(request, "alice"),
            Err(ControlError::Validation(_))
        ));
    }

    #[test]
    fn update_replaces_fields_and_tracks_condition() {
        let f = setup();
        f.service.create(prod_request("edge", 5), "alice").unwrap();
        f.clock.advance(Duration::seconds(10));

        let update = UpdateAgentGroupRequest {
            priority: 9,
            selector: AgentSelector::default(),
            config: None,
        };
        let group = f.service.update("edge", update, "bob").unwrap();

        assert_eq!(group.priority, 9);
        assert!(group.config.is_none());
        assert_eq!(group.updated_at.timestamp(), 10);
        assert!(group.conditions.get(ConditionType::Updated).is_some());
        assert_eq!(group.created_by, "alice");
    }

    #[test]
    fn update_unknown_is_not_found() {
        let f = setup();
        assert!(matches!(
            f.service
                .update("ghost", UpdateAgentGroupRequest::default(), "bob"),
            Err(ControlError::NotFound { .. })
        ));
    }

    #[test]
    fn soft_delete_removes_from_resolution() {
        let f = setup();
        f.service.create(prod_request("g", 5), "alice").unwrap();
        assert_eq!(
            f.resolver.resolve(&prod_agent()).unwrap().unwrap().name,
            "g"
        );

        let deleted = f.service.delete("g", "bob").unwrap();
        assert!(matches!(
            deleted.lifecycle,
            GroupLifecycle::Deleted { ref deleted_by, .. } if deleted_by == "bob"
        ));
        assert!(f.resolver.resolve(&prod_agent()).unwrap().is_none());

        // Still addressable, but not listed by default and not editable.
        assert!(!f.service.get("g").unwrap().is_active());
        assert!(f
            .service
            .list(&PageRequest::first(10), false)
            .unwrap()
            .items
            .is_empty());
        assert_eq!(
            f.service
                .list(&PageRequest::first(10), true)
                .unwrap()
                .items
                .len(),
            1
        );
        assert!(matches!(
            f.service.delete("g", "bob"),
            Err(ControlError::NotFound { .. })
        ));
        assert!(matches!(
            f.service.create(prod_request("g", 1), "alice"),
            Err(ControlError::AlreadyExists { .. })
        ));
    }

    #[test]
    fn writes_invalidate_resolution() {
        let f = setup();
        f.service.create(prod_request("low", 1), "alice").unwrap();
        assert_eq!(
            f.resolver.resolve(&prod_agent()).unwrap().unwrap().name,
            "low"
        );

        f.service.create(prod_request("high", 2), "alice").unwrap();
        assert_eq!(
            f.resolver.resolve(&prod_agent()).unwrap().unwrap().name,
            "high"
        );
    }

    /// Delegates to a [`MemoryStore`], stalling the first group read until
    /// the test lets it continue.
    struct PausingStore {
        inner: MemoryStore,
        pause: Mutex<Option<(mpsc::Sender<()>, mpsc::Receiver<()>)>>,
    }

    impl Store for PausingStore {
        fn insert_command(&self, command: &Command) -> fleetwatch_store::Result<()> {
            self.inner.insert_command(command)
        }

        fn get_command(&self, command_id: &CommandId) -> fleetwatch_store::Result<Option<Command>> {
            self.inner.get_command(command_id)
        }

        fn list_commands_by_instance(
            &self,
            instance_uid: &InstanceUid,
        ) -> fleetwatch_store::Result<Vec<Command>> {
            self.inner.list_commands_by_instance(instance_uid)
        }

        fn page_commands(&self, request: &PageRequest) -> fleetwatch_store::Result<Page<Command>> {
            self.inner.page_commands(request)
        }

        fn page_commands_by_instance(
            &self,
            instance_uid: &InstanceUid,
            request: &PageRequest,
        ) -> fleetwatch_store::Result<Page<Command>> {
            self.inner.page_commands_by_instance(instance_uid, request)
        }

        fn insert_agent_group(&self, group: &AgentGroup) -> fleetwatch_store::Result<()> {
            self.inner.insert_agent_group(group)
        }

        fn update_agent_group(&self, group: &AgentGroup) -> fleetwatch_store::Result<()> {
            self.inner.update_agent_group(group)
        }

        fn get_agent_group(&self, name: &str) -> fleetwatch_store::Result<Option<AgentGroup>> {
            let result = self.inner.get_agent_group(name);
            let pause = self.pause.lock().take();
            if let Some((reached, resume)) = pause {
                reached.send(()).unwrap();
                resume.recv().unwrap();
            }
            result
        }

        fn list_active_agent_groups(&self) -> fleetwatch_store::Result<Vec<AgentGroup>> {
            self.inner.list_active_agent_groups()
        }

        fn page_agent_groups(
            &self,
            request: &PageRequest,
            include_deleted: bool,
        ) -> fleetwatch_store::Result<Page<AgentGroup>> {
            self.inner.page_agent_groups(request, include_deleted)
        }

        fn put_agent(&self, agent: &Agent) -> fleetwatch_store::Result<()> {
            self.inner.put_agent(agent)
        }

        fn get_agent(&self, instance_uid: &InstanceUid) -> fleetwatch_store::Result<Option<Agent>> {
            self.inner.get_agent(instance_uid)
        }

        fn page_agents(&self, request: &PageRequest) -> fleetwatch_store::Result<Page<Agent>> {
            self.inner.page_agents(request)
        }
    }

    #[test]
    fn update_racing_delete_never_revives_group() {
        let store = Arc::new(PausingStore {
            inner: MemoryStore::new(),
            pause: Mutex::new(None),
        });
        let resolver = Arc::new(SnapshotResolver::new(Arc::clone(&store)));
        let service = AgentGroupService::new(
            Arc::clone(&store),
            Arc::new(ManualClock::at_epoch()),
            resolver.clone(),
        );
        service.create(prod_request("g", 5), "alice").unwrap();

        let (reached_tx, reached_rx) = mpsc::channel();
        let (resume_tx, resume_rx) = mpsc::channel();
        *store.pause.lock() = Some((reached_tx, resume_rx));

        std::thread::scope(|scope| {
            // The update stalls right after reading the still-active group.
            let update = scope.spawn(|| {
                let request = UpdateAgentGroupRequest {
                    priority: 7,
                    selector: prod_request("g", 7).selector,
                    config: None,
                };
                service.update("g", request, "bob")
            });
            reached_rx.recv().unwrap();

            let delete = scope.spawn(|| service.delete("g", "carol"));
            std::thread::sleep(std::time::Duration::from_millis(50));
            resume_tx.send(()).unwrap();

            assert_eq!(update.join().unwrap().unwrap().priority, 7);
            assert!(!delete.join().unwrap().unwrap().is_active());
        });

        let stored = service.get("g").unwrap();
        assert!(matches!(
            stored.lifecycle,
            GroupLifecycle::Deleted { ref deleted_by, .. } if deleted_by == "carol"
        ));
        assert!(resolver.resolve(&prod_agent()).unwrap().is_none());
    }
}

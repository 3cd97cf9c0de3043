//! Control plane service implementation.
//!
//! This module provides the `FleetControl` trait and `FleetControlService`
//! implementation that the administrative API calls into. Listings accept
//! [`ListOptions`] and return [`ListResponse`]; continuation tokens are
//! decoded and issued here so that stores only ever see decoded positions.

use std::sync::Arc;

use async_trait::async_trait;
use fleetwatch_core::{
    Clock, CommandId, CursorCodec, InstanceUid, ListOptions, ListResponse, PageRequest,
    SystemClock,
};
use fleetwatch_store::{Agent, AgentGroup, Command, Store};
use tracing::debug;

use crate::audit::{CommandAuditLog, StoreCommandLog};
use crate::error::{ControlError, Result};
use crate::groups::AgentGroupService;
use crate::registry::{ConnectionRegistry, ShardedConnectionRegistry};
use crate::selector::SnapshotResolver;
use crate::session::SessionHandler;
use crate::types::{
    ConnectionInfo, ControlConfig, CreateAgentGroupRequest, CreateCommandRequest,
    UpdateAgentGroupRequest,
};

/// Trait defining the administrative operations of the control plane.
#[async_trait]
pub trait FleetControl: Send + Sync {
    // =========================================================================
    // Connections
    // =========================================================================

    /// Page through live connections.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::InvalidCursor` for a bad continuation token.
    async fn list_connections(&self, options: &ListOptions) -> Result<ListResponse<ConnectionInfo>>;

    // =========================================================================
    // Commands
    // =========================================================================

    /// Record a command for delivery to an agent.
    async fn create_command(&self, request: CreateCommandRequest) -> Result<Command>;

    /// Get a command by id.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::NotFound` if the command does not exist.
    async fn get_command(&self, command_id: &CommandId) -> Result<Command>;

    /// Page through all commands in creation order.
    async fn list_commands(&self, options: &ListOptions) -> Result<ListResponse<Command>>;

    /// Page through the commands addressed to one agent.
    async fn list_commands_for_instance(
        &self,
        instance_uid: &InstanceUid,
        options: &ListOptions,
    ) -> Result<ListResponse<Command>>;

    // =========================================================================
    // Agent Groups
    // =========================================================================

    /// Create an agent group.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::AlreadyExists` if the name is taken, including
    /// by a deleted group.
    async fn create_agent_group(
        &self,
        request: CreateAgentGroupRequest,
        acting_user: &str,
    ) -> Result<AgentGroup>;

    /// Replace the mutable fields of an active agent group.
    async fn update_agent_group(
        &self,
        name: &str,
        request: UpdateAgentGroupRequest,
        acting_user: &str,
    ) -> Result<AgentGroup>;

    /// Soft-delete an agent group.
    async fn delete_agent_group(&self, name: &str, acting_user: &str) -> Result<AgentGroup>;

    /// Get an agent group by name, deleted or not.
    async fn get_agent_group(&self, name: &str) -> Result<AgentGroup>;

    /// Page through agent groups in name order.
    async fn list_agent_groups(
        &self,
        options: &ListOptions,
        include_deleted: bool,
    ) -> Result<ListResponse<AgentGroup>>;

    // =========================================================================
    // Agents
    // =========================================================================

    /// Get the persisted record of an agent.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::NotFound` if the agent has never identified.
    async fn get_agent(&self, instance_uid: &InstanceUid) -> Result<Agent>;

    /// Page through known agents.
    async fn list_agents(&self, options: &ListOptions) -> Result<ListResponse<Agent>>;

    // =========================================================================
    // Sessions
    // =========================================================================

    /// The handler transports drive agent sessions through.
    fn sessions(&self) -> Arc<SessionHandler>;

    /// Number of transport sessions currently registered.
    fn connection_count(&self) -> usize;
}

/// The main control plane service implementation.
pub struct FleetControlService<S: Store> {
    store: Arc<S>,
    registry: Arc<ShardedConnectionRegistry>,
    commands: Arc<StoreCommandLog<S>>,
    groups: AgentGroupService<S>,
    sessions: Arc<SessionHandler>,
    cursor: CursorCodec,
    clock: Arc<dyn Clock>,
    config: ControlConfig,
}

impl<S: Store + 'static> FleetControlService<S> {
    /// Wire the control plane over `store`.
    #[must_use]
    pub fn new(
        store: Arc<S>,
        cursor: CursorCodec,
        clock: Arc<dyn Clock>,
        config: ControlConfig,
    ) -> Self {
        let registry = Arc::new(ShardedConnectionRegistry::new(config.liveness_threshold()));
        let commands = Arc::new(StoreCommandLog::new(Arc::clone(&store), Arc::clone(&clock)));
        let resolver = Arc::new(SnapshotResolver::new(Arc::clone(&store)));
        let groups = AgentGroupService::new(Arc::clone(&store), Arc::clone(&clock), resolver.clone());
        let sessions = Arc::new(SessionHandler::new(
            registry.clone(),
            commands.clone(),
            resolver,
            store.clone(),
            Arc::clone(&clock),
            &config,
        ));

        Self {
            store,
            registry,
            commands,
            groups,
            sessions,
            cursor,
            clock,
            config,
        }
    }

    /// Create with a random cursor key, the system clock and default configuration.
    #[must_use]
    pub fn with_defaults(store: Arc<S>) -> Self {
        Self::new(
            store,
            CursorCodec::random(),
            Arc::new(SystemClock),
            ControlConfig::default(),
        )
    }

    /// Get the configuration.
    #[must_use]
    pub const fn config(&self) -> &ControlConfig {
        &self.config
    }

    /// The live connection registry.
    #[must_use]
    pub fn registry(&self) -> &dyn ConnectionRegistry {
        self.registry.as_ref()
    }

    fn page_request(&self, options: &ListOptions) -> Result<PageRequest> {
        Ok(self.cursor.page_request(options, self.config.page_limits)?)
    }
}

#[async_trait]
impl<S: Store + 'static> FleetControl for FleetControlService<S> {
    // =========================================================================
    // Connections
    // =========================================================================

    async fn list_connections(&self, options: &ListOptions) -> Result<ListResponse<ConnectionInfo>> {
        let request = self.page_request(options)?;
        let page = self.registry.list(&request, self.clock.now());
        debug!(count = page.items.len(), remaining = page.remaining, "Listed connections");
        Ok(self.cursor.respond(page, &request))
    }

    // =========================================================================
    // Commands
    // =========================================================================

    async fn create_command(&self, request: CreateCommandRequest) -> Result<Command> {
        self.commands
            .save_command(request.kind, request.target_instance_uid, request.data)
    }

    async fn get_command(&self, command_id: &CommandId) -> Result<Command> {
        self.commands.get_command(command_id)
    }

    async fn list_commands(&self, options: &ListOptions) -> Result<ListResponse<Command>> {
        let request = self.page_request(options)?;
        let page = self.commands.list_commands(&request)?;
        Ok(self.cursor.respond(page, &request))
    }

    async fn list_commands_for_instance(
        &self,
        instance_uid: &InstanceUid,
        options: &ListOptions,
    ) -> Result<ListResponse<Command>> {
        let request = self.page_request(options)?;
        let page = self
            .commands
            .list_commands_for_instance(instance_uid, &request)?;
        Ok(self.cursor.respond(page, &request))
    }

    // =========================================================================
    // Agent Groups
    // =========================================================================

    async fn create_agent_group(
        &self,
        request: CreateAgentGroupRequest,
        acting_user: &str,
    ) -> Result<AgentGroup> {
        self.groups.create(request, acting_user)
    }

    async fn update_agent_group(
        &self,
        name: &str,
        request: UpdateAgentGroupRequest,
        acting_user: &str,
    ) -> Result<AgentGroup> {
        self.groups.update(name, request, acting_user)
    }

    async fn delete_agent_group(&self, name: &str, acting_user: &str) -> Result<AgentGroup> {
        self.groups.delete(name, acting_user)
    }

    async fn get_agent_group(&self, name: &str) -> Result<AgentGroup> {
        self.groups.get(name)
    }

    async fn list_agent_groups(
        &self,
        options: &ListOptions,
        include_deleted: bool,
    ) -> Result<ListResponse<AgentGroup>> {
        let request = self.page_request(options)?;
        let page = self.groups.list(&request, include_deleted)?;
        Ok(self.cursor.respond(page, &request))
    }

    // =========================================================================
    // Agents
    // =========================================================================

    async fn get_agent(&self, instance_uid: &InstanceUid) -> Result<Agent> {
        self.store
            .get_agent(instance_uid)?
            .ok_or_else(|| ControlError::not_found("agent", instance_uid))
    }

    async fn list_agents(&self, options: &ListOptions) -> Result<ListResponse<Agent>> {
        let request = self.page_request(options)?;
        let page = self.store.page_agents(&request)?;
        Ok(self.cursor.respond(page, &request))
    }

    // =========================================================================
    // Sessions
    // =========================================================================

    fn sessions(&self) -> Arc<SessionHandler> {
        Arc::clone(&self.sessions)
    }

    fn connection_count(&self) -> usize {
        self.registry.len()
    }
}

//! Per-connection protocol state machine.
//!
//! A [`Session`] is owned by the task serving one transport connection and
//! moves through `Connected` → `Identified` → `Closed`. The shared
//! [`SessionHandler`] does the work for every inbound message:
//!
//! 1. touch the connection in the registry,
//! 2. drop duplicate sequence numbers and flag gaps,
//! 3. bind the agent on its first self-description,
//! 4. record acknowledgements and the reported configuration hash,
//! 5. attach the effective configuration when the agent does not have it,
//! 6. attach pending commands, bounded per reply.
//!
//! Command delivery reads only a window of the agent's command stream past
//! its acknowledgement watermark, so the work per message does not grow with
//! the number of commands the agent has ever received.
//!
//! Failures never close the connection; they turn into an in-band
//! [`ErrorResponse`](crate::protocol::ErrorResponse) with a generic message.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use fleetwatch_core::{Clock, CommandId, ConnectionId, InstanceUid, PageRequest};
use fleetwatch_store::{Agent, Command, Store};
use tracing::{debug, error, info, warn};

use crate::audit::CommandAuditLog;
use crate::error::{ControlError, Result};
use crate::protocol::{
    self, AgentToServer, CommandDelivery, ErrorKind, RemoteConfig, RemoteConfigState,
    ServerToAgent,
};
use crate::registry::ConnectionRegistry;
use crate::selector::SelectorResolver;
use crate::types::ControlConfig;

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Transport is up; the agent has not described itself yet.
    Connected,
    /// The agent is known and bound to the connection.
    Identified(InstanceUid),
    /// The connection is gone. Terminal.
    Closed,
}

/// State of one connection, owned by the task serving it.
#[derive(Debug)]
pub struct Session {
    connection_id: ConnectionId,
    state: SessionState,
    last_sequence: Option<u64>,
    agent: Option<Agent>,
    in_flight: HashSet<CommandId>,
}

impl Session {
    fn new(connection_id: ConnectionId) -> Self {
        Self {
            connection_id,
            state: SessionState::Connected,
            last_sequence: None,
            agent: None,
            in_flight: HashSet::new(),
        }
    }

    /// The transport connection this session belongs to.
    #[must_use]
    pub const fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// The bound agent, once identified.
    #[must_use]
    pub const fn instance_uid(&self) -> Option<InstanceUid> {
        match self.state {
            SessionState::Identified(uid) => Some(uid),
            SessionState::Connected | SessionState::Closed => None,
        }
    }

    /// Returns true once the session has ended.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }
}

/// Drives sessions against the registry, resolver and command log.
pub struct SessionHandler {
    registry: Arc<dyn ConnectionRegistry>,
    commands: Arc<dyn CommandAuditLog>,
    resolver: Arc<dyn SelectorResolver>,
    agents: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    max_commands_per_reply: usize,
}

impl SessionHandler {
    /// Wire a handler from its collaborators.
    #[must_use]
    pub fn new(
        registry: Arc<dyn ConnectionRegistry>,
        commands: Arc<dyn CommandAuditLog>,
        resolver: Arc<dyn SelectorResolver>,
        agents: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        config: &ControlConfig,
    ) -> Self {
        Self {
            registry,
            commands,
            resolver,
            agents,
            clock,
            max_commands_per_reply: config.max_commands_per_reply.max(1),
        }
    }

    /// Start a session for a freshly accepted connection.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::AlreadyExists` if the id is already live.
    pub fn connect(&self, connection_id: ConnectionId) -> Result<Session> {
        self.registry.register(connection_id, self.clock.now())?;
        Ok(Session::new(connection_id))
    }

    /// Handle one raw inbound frame.
    ///
    /// Returns the reply to send, or `None` when nothing should be sent.
    pub fn handle_frame(&self, session: &mut Session, frame: &[u8]) -> Option<ServerToAgent> {
        match protocol::decode(frame) {
            Ok(message) => self.handle_message(session, message),
            Err(err) => {
                if !session.is_closed() {
                    self.registry.touch(&session.connection_id, self.clock.now());
                }
                Some(Self::error_reply(session, &err))
            }
        }
    }

    /// Handle one decoded inbound message.
    ///
    /// Returns the reply to send, or `None` when nothing should be sent
    /// (duplicates and disconnect notices).
    pub fn handle_message(
        &self,
        session: &mut Session,
        message: AgentToServer,
    ) -> Option<ServerToAgent> {
        if session.is_closed() {
            let err = ControlError::Protocol("session is closed".to_string());
            return Some(Self::error_reply(session, &err));
        }

        let now = self.clock.now();
        self.registry.touch(&session.connection_id, now);

        match self.process(session, &message, now) {
            Ok(reply) => reply,
            Err(err) => Some(Self::error_reply(session, &err)),
        }
    }

    /// End the session. Safe to call more than once.
    pub fn disconnect(&self, session: &mut Session) {
        if session.is_closed() {
            return;
        }
        self.registry.unregister(&session.connection_id);
        info!(
            connection_id = %session.connection_id,
            instance_uid = ?session.instance_uid(),
            "Session closed"
        );
        session.state = SessionState::Closed;
        session.in_flight.clear();
        session.agent = None;
    }

    fn process(
        &self,
        session: &mut Session,
        message: &AgentToServer,
        now: DateTime<Utc>,
    ) -> Result<Option<ServerToAgent>> {
        if let SessionState::Identified(bound) = session.state {
            if message.instance_uid != bound {
                return Err(ControlError::Protocol(format!(
                    "instance_uid {} does not match bound agent {bound}",
                    message.instance_uid
                )));
            }
        }

        let mut report_full_state = false;
        if let Some(sequence) = message.sequence_num {
            match session.last_sequence {
                Some(last) if sequence <= last => {
                    debug!(
                        connection_id = %session.connection_id,
                        sequence,
                        last,
                        "Ignoring duplicate message"
                    );
                    return Ok(None);
                }
                Some(last) if sequence > last.saturating_add(1) => {
                    debug!(
                        connection_id = %session.connection_id,
                        sequence,
                        last,
                        "Sequence gap, requesting full state"
                    );
                    report_full_state = true;
                }
                _ => {}
            }
            session.last_sequence = Some(sequence);
        }

        if message.agent_disconnect {
            self.disconnect(session);
            return Ok(None);
        }

        if session.state == SessionState::Connected {
            if message.agent_description.is_none() {
                debug!(
                    connection_id = %session.connection_id,
                    "Agent has not described itself, requesting full state"
                );
                let mut reply = ServerToAgent::to(Some(message.instance_uid));
                reply.flags.report_full_state = true;
                return Ok(Some(reply));
            }
            self.identify(session, message.instance_uid, now)?;
        }

        let mut reply = self.sync(session, message, now)?;
        reply.flags.report_full_state |= report_full_state;
        Ok(Some(reply))
    }

    fn identify(
        &self,
        session: &mut Session,
        instance_uid: InstanceUid,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.registry
            .bind_instance(&session.connection_id, instance_uid)?;
        let agent = self
            .agents
            .get_agent(&instance_uid)?
            .unwrap_or_else(|| Agent::new(instance_uid, now));

        info!(
            connection_id = %session.connection_id,
            instance_uid = %instance_uid,
            returning = agent.first_seen_at != now,
            "Agent identified"
        );
        session.agent = Some(agent);
        session.state = SessionState::Identified(instance_uid);
        Ok(())
    }

    fn sync(
        &self,
        session: &mut Session,
        message: &AgentToServer,
        now: DateTime<Utc>,
    ) -> Result<ServerToAgent> {
        let connection_id = session.connection_id;
        let in_flight = &mut session.in_flight;
        let agent = session
            .agent
            .as_mut()
            .ok_or_else(|| ControlError::Protocol("agent is not identified".to_string()))?;
        let instance_uid = agent.instance_uid;

        agent.last_seen_at = now;
        if let Some(description) = &message.agent_description {
            agent.description = description.clone();
        }
        if let Some(status) = &message.remote_config_status {
            let hash = Some(status.last_remote_config_hash.as_str()).filter(|h| !h.is_empty());
            match status.status {
                RemoteConfigState::Applied | RemoteConfigState::Applying => {
                    agent.reported_config_hash = hash.map(str::to_string);
                }
                RemoteConfigState::Failed => {
                    warn!(
                        instance_uid = %instance_uid,
                        config_hash = %status.last_remote_config_hash,
                        error = status.error_message.as_deref().unwrap_or(""),
                        "Agent failed to apply configuration"
                    );
                    // The agent is not running this config; offer it again.
                    if agent.reported_config_hash.as_deref() == hash {
                        agent.reported_config_hash = None;
                    }
                }
                RemoteConfigState::Unset => agent.reported_config_hash = None,
            }
        }

        for ack in &message.command_acks {
            in_flight.remove(ack);
            self.record_ack(agent, ack)?;
        }

        let group = self
            .resolver
            .resolve(&agent.description.identifying_attributes)?;
        let effective_group = group.as_ref().map(|g| g.name.clone());
        if agent.effective_group != effective_group {
            info!(
                instance_uid = %instance_uid,
                from = ?agent.effective_group,
                to = ?effective_group,
                "Effective agent group changed"
            );
            agent.effective_group = effective_group;
        }

        let remote_config = group
            .as_ref()
            .and_then(|g| g.config.as_ref())
            .map(RemoteConfig::from)
            .filter(|config| agent.reported_config_hash.as_deref() != Some(&config.config_hash));

        let mut window = self.pending_window(agent, in_flight.len())?.into_iter().peekable();
        while let Some(command) =
            window.next_if(|c| agent.acknowledged_commands.contains(&c.command_id))
        {
            agent.acknowledged_commands.remove(&command.command_id);
            agent.acknowledged_through = Some(command.position());
        }

        self.agents.put_agent(agent)?;

        let deliveries: Vec<CommandDelivery> = window
            .filter(|c| {
                !agent.acknowledged_commands.contains(&c.command_id)
                    && !in_flight.contains(&c.command_id)
            })
            .take(self.max_commands_per_reply)
            .map(|c| CommandDelivery::from(&c))
            .collect();
        in_flight.extend(deliveries.iter().map(|c| c.command_id));

        debug!(
            connection_id = %connection_id,
            instance_uid = %instance_uid,
            config = remote_config.is_some(),
            commands = deliveries.len(),
            "Built reply"
        );

        Ok(ServerToAgent {
            instance_uid: Some(instance_uid),
            remote_config,
            commands: deliveries,
            ..ServerToAgent::default()
        })
    }

    /// Remember an acknowledgement for one of the agent's own commands.
    fn record_ack(&self, agent: &mut Agent, command_id: &CommandId) -> Result<()> {
        if agent.acknowledged_commands.contains(command_id) {
            return Ok(());
        }
        let command = match self.commands.get_command(command_id) {
            Ok(command) => command,
            Err(ControlError::NotFound { .. }) => {
                debug!(
                    instance_uid = %agent.instance_uid,
                    command_id = %command_id,
                    "Ignoring unknown ack"
                );
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        if command.target_instance_uid != agent.instance_uid {
            debug!(
                instance_uid = %agent.instance_uid,
                command_id = %command_id,
                "Ignoring ack for another agent's command"
            );
            return Ok(());
        }

        let uid = agent.instance_uid;
        let past_watermark = match agent.acknowledged_through {
            Some(through) => command.position().index_key(&uid) > through.index_key(&uid),
            None => true,
        };
        if past_watermark {
            agent.acknowledged_commands.insert(*command_id);
        }
        Ok(())
    }

    /// The agent's commands past its watermark, enough to fill one reply
    /// after skipping those acknowledged or already in flight.
    fn pending_window(&self, agent: &Agent, in_flight: usize) -> Result<Vec<Command>> {
        let uid = agent.instance_uid;
        let limit = self
            .max_commands_per_reply
            .saturating_add(in_flight)
            .saturating_add(agent.acknowledged_commands.len());
        let request = PageRequest {
            after: agent.acknowledged_through.map(|through| through.index_key(&uid)),
            limit: u32::try_from(limit).unwrap_or(u32::MAX),
        };
        Ok(self.commands.list_commands_for_instance(&uid, &request)?.items)
    }

    fn error_reply(session: &Session, err: &ControlError) -> ServerToAgent {
        let instance_uid = session.instance_uid();
        if let ControlError::Store(_) = err {
            error!(
                connection_id = %session.connection_id,
                error = %err,
                "Storage failure while handling agent message"
            );
            ServerToAgent::error(
                instance_uid,
                ErrorKind::Unavailable,
                "server is temporarily unavailable",
            )
        } else {
            warn!(
                connection_id = %session.connection_id,
                error = %err,
                "Rejected agent message"
            );
            ServerToAgent::error(instance_uid, ErrorKind::BadRequest, "message rejected")
        }
    }
}

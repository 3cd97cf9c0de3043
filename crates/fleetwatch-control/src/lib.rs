//! Control plane for the fleetwatch agent fleet.
//!
//! This crate holds the protocol core: the per-connection session state
//! machine, the live connection registry, the append-only command log and
//! the agent group resolver that decides which configuration an agent gets.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────┐   ┌──────────────────────────────┐
//! │   Admin API (HTTP, gateway)  │   │  Agent transport (WebSocket) │
//! └──────────────────────────────┘   └──────────────────────────────┘
//!                │                                  │
//!                ▼                                  ▼
//! ┌──────────────────────────────┐   ┌──────────────────────────────┐
//! │     FleetControlService      │──▶│        SessionHandler        │
//! └──────────────────────────────┘   └──────────────────────────────┘
//!                │                                  │
//!      ┌─────────┼───────────────┬──────────────────┤
//!      ▼         ▼               ▼                  ▼
//! ┌──────────┐ ┌──────────────┐ ┌─────────────┐ ┌──────────────┐
//! │ Agent    │ │ Connection   │ │ Command     │ │ Selector     │
//! │ Groups   │ │ Registry     │ │ AuditLog    │ │ Resolver     │
//! └──────────┘ └──────────────┘ └─────────────┘ └──────────────┘
//!      │                               │                │
//!      └───────────────────────────────┴────────────────┘
//!                              ▼
//!                    ┌──────────────────┐
//!                    │ Store (RocksDB)  │
//!                    └──────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use fleetwatch_control::{CreateAgentGroupRequest, FleetControl, FleetControlService};
//! use fleetwatch_store::RocksStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(RocksStore::open("/tmp/fleetwatch")?);
//! let control = FleetControlService::with_defaults(store);
//!
//! let group = control
//!     .create_agent_group(CreateAgentGroupRequest::new("edge"), "alice")
//!     .await?;
//! println!("Created group: {}", group.name);
//! # Ok(())
//! # }
//! ```
//!
//! # Sessions
//!
//! Each transport connection owns a [`Session`] and feeds inbound frames to
//! the shared [`SessionHandler`]:
//!
//! - `Connected` → `Identified` on the first self-description
//! - `Connected` / `Identified` → `Closed` on disconnect
//!
//! Commands are never pushed into sessions. Every reply pulls the pending
//! commands for the agent from the [`CommandAuditLog`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod audit;
pub mod error;
pub mod groups;
pub mod protocol;
pub mod registry;
pub mod selector;
pub mod service;
pub mod session;
pub mod types;

pub use audit::{CommandAuditLog, StoreCommandLog};
pub use error::{ControlError, Result};
pub use groups::AgentGroupService;
pub use protocol::{AgentToServer, ServerToAgent};
pub use registry::{ConnectionRegistry, ShardedConnectionRegistry};
pub use selector::{SelectorResolver, SnapshotResolver};
pub use service::{FleetControl, FleetControlService};
pub use session::{Session, SessionHandler, SessionState};
pub use types::{
    ConnectionInfo, ControlConfig, CreateAgentGroupRequest, CreateCommandRequest,
    UpdateAgentGroupRequest,
};

// Re-export commonly used types from dependencies for convenience
pub use fleetwatch_core::{CommandId, ConnectionId, InstanceUid, ListOptions, ListResponse};
pub use fleetwatch_store::{Agent, AgentGroup, Command, CommandKind};

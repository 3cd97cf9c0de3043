//! HTTP admin API and agent transport for fleetwatch.
//!
//! This crate exposes the control plane over HTTP:
//!
//! - a JSON admin API for connections, agents, commands and agent groups
//! - the `/v1/opamp` WebSocket endpoint agents connect to
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────┐      ┌─────────────────────────┐
//! │  Operators (via proxy)  │      │         Agents          │
//! │   HTTP + X-Acting-User  │      │  WebSocket, JSON frames │
//! └─────────────────────────┘      └─────────────────────────┘
//!              │                                │
//!              ▼                                ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │                   fleetwatch-gateway                    │
//! │  ┌──────────────┐ ┌──────────────┐ ┌────────────────┐   │
//! │  │ ActingUser   │ │   Router     │ │  Session task  │   │
//! │  │ extractor    │ │  + Handlers  │ │  per socket    │   │
//! │  └──────────────┘ └──────────────┘ └────────────────┘   │
//! └─────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//!                   ┌────────────────────┐
//!                   │   FleetControl     │
//!                   └────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use fleetwatch_gateway::{GatewayConfig, GatewayState, create_router};
//! use fleetwatch_control::FleetControlService;
//! use fleetwatch_store::RocksStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(RocksStore::open("/tmp/fleetwatch")?);
//! let control = Arc::new(FleetControlService::with_defaults(store));
//!
//! let state = GatewayState::new(control, GatewayConfig::default());
//! let app = create_router(state);
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:4320").await?;
//! axum::serve(listener, app).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use config::{ConfigError, GatewayConfig, ServerSettings};
pub use error::ApiError;
pub use routes::create_router;
pub use state::GatewayState;

pub use auth::ActingUser;

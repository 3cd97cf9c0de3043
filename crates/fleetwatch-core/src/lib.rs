//! Core types and utilities for fleetwatch.
//!
//! This crate provides the foundational types shared by every other crate:
//!
//! - **Identifiers**: Strongly-typed IDs for connections, agent instances and commands
//! - **Clock**: An injectable time source so liveness can be tested deterministically
//! - **Cursor**: The tamper-evident continuation token codec used by all listings
//! - **Paging**: The list envelope (`ListOptions` / `ListResponse`) and store-level pages
//!
//! # Example
//!
//! ```
//! use fleetwatch_core::{CursorCodec, ListOptions, PageLimits};
//!
//! let codec = CursorCodec::new([7u8; 32]);
//! let token = codec.encode(b"last-key", 50);
//! let (key, limit) = codec.decode(&token).unwrap();
//! assert_eq!(key, b"last-key");
//! assert_eq!(limit, 50);
//!
//! // Continue a listing from the token.
//! let options = ListOptions::new(0).continue_from(token);
//! let request = codec.page_request(&options, PageLimits::default()).unwrap();
//! assert_eq!(request.limit, 50);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod clock;
pub mod cursor;
pub mod error;
pub mod ids;
pub mod list;

pub use clock::{Clock, SystemClock};
pub use cursor::CursorCodec;
pub use error::{CursorError, IdError};
pub use ids::{CommandId, ConnectionId, InstanceUid};
pub use list::{paginate_sorted, ListOptions, ListResponse, Page, PageLimits, PageRequest};

#[cfg(any(test, feature = "test-utils"))]
pub use clock::ManualClock;

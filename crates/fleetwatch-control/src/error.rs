//! Error types for the control plane.
//!
//! This module defines all errors that can occur while handling agent
//! sessions and administrative requests.

use fleetwatch_core::CursorError;
use fleetwatch_store::StoreError;
use thiserror::Error;

/// A result type using `ControlError`.
pub type Result<T> = std::result::Result<T, ControlError>;

/// Errors that can occur in control plane operations.
#[derive(Debug, Error)]
pub enum ControlError {
    /// The requested record does not exist.
    #[error("{kind} not found: {key}")]
    NotFound {
        /// What kind of record was looked up.
        kind: &'static str,
        /// The key that was looked up.
        key: String,
    },

    /// A record with the same key already exists.
    #[error("{kind} already exists: {key}")]
    AlreadyExists {
        /// What kind of record was created.
        kind: &'static str,
        /// The conflicting key.
        key: String,
    },

    /// The continuation token did not decode.
    #[error("invalid continuation token")]
    InvalidCursor(#[from] CursorError),

    /// The request failed validation.
    #[error("validation failed: {0}")]
    Validation(String),

    /// An inbound protocol message was malformed or inconsistent.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Storage layer error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

impl ControlError {
    pub(crate) fn not_found(kind: &'static str, key: impl ToString) -> Self {
        Self::NotFound {
            kind,
            key: key.to_string(),
        }
    }

    pub(crate) fn already_exists(kind: &'static str, key: impl ToString) -> Self {
        Self::AlreadyExists {
            kind,
            key: key.to_string(),
        }
    }

    /// Returns the appropriate HTTP status code for this error.
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            Self::NotFound { .. } => 404,
            Self::AlreadyExists { .. } => 409,
            Self::InvalidCursor(_) | Self::Validation(_) | Self::Protocol(_) => 400,
            Self::Store(_) => 500,
        }
    }

    /// A stable machine-readable code for this error.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::AlreadyExists { .. } => "already_exists",
            Self::InvalidCursor(_) => "invalid_cursor",
            Self::Validation(_) => "validation_failed",
            Self::Protocol(_) => "protocol_error",
            Self::Store(_) => "internal_error",
        }
    }

    /// Returns true if this error might be resolved by retrying.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(self, Self::Store(_))
    }
}

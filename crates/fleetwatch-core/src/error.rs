//! Common error types for fleetwatch.
//!
//! These errors are produced by the primitives in this crate and wrapped by
//! the storage and control layers.

use thiserror::Error;

/// Errors that can occur when parsing identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdError {
    /// The input is not a valid UUID.
    #[error("invalid UUID format")]
    InvalidUuid,

    /// The input has an incorrect length.
    #[error("invalid length: expected {expected} bytes, got {got}")]
    InvalidLength {
        /// The expected number of bytes.
        expected: usize,
        /// The actual number of bytes.
        got: usize,
    },
}

/// Errors produced when decoding a continuation token.
///
/// Every variant maps to the same user-visible "invalid cursor" outcome; the
/// distinction only exists for logging.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CursorError {
    /// The token is not valid URL-safe base64.
    #[error("cursor is not valid base64")]
    Encoding,

    /// The token exceeds the maximum accepted length.
    #[error("cursor is too long")]
    TooLong,

    /// The token is too short to carry a payload and signature.
    #[error("cursor is truncated")]
    Truncated,

    /// The signature does not match the payload.
    #[error("cursor signature mismatch")]
    Signature,

    /// The payload could not be decoded.
    #[error("cursor payload is malformed")]
    Payload,

    /// The payload was produced by an unsupported codec version.
    #[error("unsupported cursor version: {0}")]
    Version(u8),
}

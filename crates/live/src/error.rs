//! Typed errors surfaced at the crate boundary.
//!
//! Everything recoverable (transport drops, malformed frames, retry churn)
//! is handled inside the session task and only ever reaches callers as a
//! [`crate::session::SessionState`] transition; these types cover the two
//! places where a caller holds the `Result` directly.

use thiserror::Error;

/// Failure to translate between wire bytes and envelope types.
///
/// A `Malformed` inbound message is droppable: the caller logs it and moves
/// on. It never terminates a connection and never changes session state.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed server message: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("failed to encode client message: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Failure while loading engine configuration from the environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

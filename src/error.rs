//! Error types for the coordination layer
//!
//! Provides unified error handling using thiserror.

use thiserror::Error;

// == State Error Enum ==
/// Unified error type for every operation against the remote store.
///
/// The command client lets all variants propagate; the service layers
/// return them so callers can distinguish a genuine miss (`Ok(None)`,
/// `Ok(false)`) from an unreachable or misbehaving store (`Err(..)`).
#[derive(Error, Debug)]
pub enum StateError {
    /// Endpoint URL or auth token missing; raised before any network I/O
    #[error("store not configured: {0}")]
    Configuration(String),

    /// Network-level failure reaching the store
    #[error("store request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Store answered with a non-success HTTP status
    #[error("store responded with HTTP status {0}")]
    Transport(u16),

    /// Store answered at the transport level but reported a command error
    #[error("store command failed: {0}")]
    Store(String),

    /// A value could not be encoded to or decoded from JSON
    #[error("value serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StateError {
    /// True when the error means the layer was never configured at all.
    pub fn is_configuration(&self) -> bool {
        matches!(self, StateError::Configuration(_))
    }
}

// == Result Type Alias ==
/// Convenience Result type for the coordination layer.
pub type Result<T> = std::result::Result<T, StateError>;

//! Runtime error types.

use thiserror::Error;
use yuzu_core::{StoreError, TransportError};

use crate::config::ConfigError;

/// Errors that end a runtime.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Connecting failed and reconnecting is disabled.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The session was revoked; a new pairing is required.
    #[error("Logged out, delete the session directory and pair again")]
    LoggedOut,

    /// The reconnect policy gave up.
    #[error("Gave up reconnecting after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    /// Persisting state on shutdown failed.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;

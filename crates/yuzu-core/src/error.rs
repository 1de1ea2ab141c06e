//! Unified error types for the Yuzu core crate.
//!
//! Framework-level errors (plugin registration) are defined in yuzu-framework,
//! configuration and runtime errors in yuzu-runtime.

use std::path::PathBuf;

use thiserror::Error;

// =============================================================================
// Transport
// =============================================================================

/// Failures reported by a [`Transport`](crate::Transport) or [`Connector`](crate::Connector).
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Connecting to the transport failed.
    #[error("connection failed: {reason}")]
    ConnectionFailed { reason: String },

    /// The connection is closed and cannot carry the request.
    #[error("connection closed: {reason}")]
    ConnectionClosed { reason: String },

    /// The transport rejected an outbound message.
    #[error("failed to send message to {chat}: {reason}")]
    SendFailed { chat: String, reason: String },

    /// The message was built without an outbox to send through.
    #[error("message context is not attached to a transport")]
    Detached,
}

impl TransportError {
    /// Creates a send failure for `chat`.
    pub fn send_failed(chat: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SendFailed {
            chat: chat.into(),
            reason: reason.into(),
        }
    }

    /// Creates a closed-connection error.
    pub fn closed(reason: impl Into<String>) -> Self {
        Self::ConnectionClosed {
            reason: reason.into(),
        }
    }
}

// =============================================================================
// Store
// =============================================================================

/// Errors raised while persisting a [`KeyValueStore`](crate::store::KeyValueStore).
///
/// Loading never fails (a missing or corrupt file yields an empty store), so
/// these only surface from saves and autosaving mutations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem failure while writing the store.
    #[error("failed to write store {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The in-memory map could not be serialized.
    #[error("failed to serialize store {}: {source}", .path.display())]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type TransportResult<T> = Result<T, TransportError>;

pub type StoreResult<T> = Result<T, StoreError>;

//! Contract between the bot and the messaging transport.
//!
//! The transport itself (socket, pairing, encryption) lives outside this
//! workspace. It is consumed through two traits:
//!
//! - [`Connector`] opens a connection and yields a [`Connection`]: a handle
//!   for outbound sends plus the ordered stream of inbound events.
//! - [`Transport`] sends a message into a chat.
//!
//! ```text
//! ┌───────────┐  connect()   ┌────────────┐  TransportEvent  ┌────────────┐
//! │ Connector │─────────────▶│ Connection │─────────────────▶│  Runtime   │
//! └───────────┘              │  (events)  │                  │ Dispatcher │
//!                            │ (transport)│◀─────────────────│  Plugins   │
//!                            └────────────┘      send()      └────────────┘
//! ```

pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::TransportResult;
use crate::message::{ContextInfo, RawMessage};

pub use memory::{MemoryConnector, MemoryTransport, SentRecord};

// =============================================================================
// Outbound
// =============================================================================

/// Content of an outbound message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OutgoingMessage {
    pub text: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub mentions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_info: Option<ContextInfo>,
}

impl OutgoingMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    /// Mentions `jid` in the message.
    pub fn mention(mut self, jid: impl Into<String>) -> Self {
        self.mentions.push(jid.into());
        self
    }

    /// Ephemeral lifetime carried by the message, if any.
    pub fn expiration(&self) -> Option<u32> {
        self.context_info.as_ref().and_then(|c| c.expiration)
    }

    /// Marks the message as ephemeral for `seconds`.
    pub fn set_expiration(&mut self, seconds: u32) {
        self.context_info
            .get_or_insert_with(ContextInfo::default)
            .expiration = Some(seconds);
    }
}

impl From<&str> for OutgoingMessage {
    fn from(text: &str) -> Self {
        Self::text(text)
    }
}

impl From<String> for OutgoingMessage {
    fn from(text: String) -> Self {
        Self::text(text)
    }
}

/// Per-send options.
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    /// Id to assign to the outbound message.
    pub message_id: Option<String>,
    /// Message to quote.
    pub quoted: Option<RawMessage>,
}

/// Descriptor of a message accepted by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentMessage {
    pub id: String,
    pub chat: String,
}

/// Outbound half of a transport connection.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends `message` into `chat`.
    async fn send(
        &self,
        chat: &str,
        message: OutgoingMessage,
        options: SendOptions,
    ) -> TransportResult<SentMessage>;
}

/// Shared transport handle.
pub type BoxedTransport = Arc<dyn Transport>;

// =============================================================================
// Inbound
// =============================================================================

/// Whether an upsert batch carries new messages or echoes of the bot's own sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsertKind {
    Notify,
    Append,
}

/// A batch of inbound messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagesUpsert {
    #[serde(rename = "type")]
    pub kind: UpsertKind,
    #[serde(default)]
    pub messages: Vec<RawMessage>,
}

impl MessagesUpsert {
    pub fn notify(messages: Vec<RawMessage>) -> Self {
        Self {
            kind: UpsertKind::Notify,
            messages,
        }
    }

    pub fn append(messages: Vec<RawMessage>) -> Self {
        Self {
            kind: UpsertKind::Append,
            messages,
        }
    }
}

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connecting,
    Open,
    Close,
}

/// Why a connection closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DisconnectReason {
    /// The session was revoked; reconnecting would fail until re-paired.
    LoggedOut,
    ConnectionLost,
    ConnectionClosed,
    TimedOut,
    RestartRequired,
    Other(String),
}

impl DisconnectReason {
    /// Whether the runtime should open a new connection after this close.
    pub fn should_reconnect(&self) -> bool {
        !matches!(self, Self::LoggedOut)
    }
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LoggedOut => f.write_str("logged out"),
            Self::ConnectionLost => f.write_str("connection lost"),
            Self::ConnectionClosed => f.write_str("connection closed"),
            Self::TimedOut => f.write_str("timed out"),
            Self::RestartRequired => f.write_str("restart required"),
            Self::Other(reason) => f.write_str(reason),
        }
    }
}

/// Connection lifecycle signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionUpdate {
    pub state: ConnectionState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<DisconnectReason>,
}

impl ConnectionUpdate {
    pub fn open() -> Self {
        Self {
            state: ConnectionState::Open,
            reason: None,
        }
    }

    pub fn closed(reason: DisconnectReason) -> Self {
        Self {
            state: ConnectionState::Close,
            reason: Some(reason),
        }
    }
}

/// Everything a connection can emit.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    MessagesUpsert(MessagesUpsert),
    Connection(ConnectionUpdate),
}

// =============================================================================
// Connecting
// =============================================================================

/// Which pairing flow a connector should use for a fresh session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PairingMethod {
    Qr,
    #[default]
    Otp,
}

/// A live connection.
pub struct Connection {
    pub transport: BoxedTransport,
    pub events: mpsc::Receiver<TransportEvent>,
}

/// Opens connections to the messaging service.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> TransportResult<Connection>;
}

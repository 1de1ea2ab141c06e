//! # Yuzu Core
//!
//! Building blocks shared by every layer of the Yuzu chat bot.
//!
//! - **Message model**: wire records from the transport and their
//!   normalization into a [`MessageContext`]
//! - **Transport contract**: [`Transport`] for outbound sends, [`Connector`]
//!   for opening connections, and the [`TransportEvent`] stream
//! - **Persistence**: the JSON-file [`KeyValueStore`] and the per-chat
//!   [`ExpirationCache`] built on it
//!
//! ```text
//! RawMessage ──▶ extract_text_context ──▶ MessageContext ──▶ reply()/send() ──▶ Transport
//!                                              │
//!                                              └── expiration ──▶ ExpirationCache
//! ```

pub mod error;
pub mod expiration;
pub mod message;
pub mod store;
pub mod transport;
pub mod util;

pub use error::{StoreError, StoreResult, TransportError, TransportResult};
pub use expiration::{EXPIRATIONS_FILE, ExpirationCache};
pub use message::{
    Attachment, ContentBody, ContextInfo, MessageContext, MessageKey, MessagePayload, MessageType,
    Outbox, RawMessage, TextContext, extract_text_context,
};
pub use store::KeyValueStore;
pub use transport::{
    BoxedTransport, Connection, ConnectionState, ConnectionUpdate, Connector, DisconnectReason,
    MemoryConnector, MemoryTransport, MessagesUpsert, OutgoingMessage, PairingMethod, SendOptions,
    SentMessage, Transport, TransportEvent, UpsertKind,
};

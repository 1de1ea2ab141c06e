//! Inbound message model and normalization.
//!
//! - [`payload`]: the transport's wire records ([`RawMessage`], [`MessagePayload`])
//! - [`extract`]: reduction of a payload to canonical text ([`extract_text_context`])
//! - [`context`]: the per-message [`MessageContext`] handed to plugins

pub mod context;
pub mod extract;
pub mod payload;

pub use context::{MessageContext, Outbox};
pub use extract::{TextContext, extract_text_context, split_command};
pub use payload::{
    Attachment, ContentBody, ContextInfo, EditedMessage, MessageKey, MessagePayload, MessageType,
    RawMessage,
};

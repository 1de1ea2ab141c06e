//! Per-message context handed to plugins.

use std::sync::Arc;

use tracing::trace;

use super::extract::{extract_text_context, split_command};
use super::payload::{Attachment, ContextInfo, MessagePayload, MessageType, RawMessage};
use crate::error::{TransportError, TransportResult};
use crate::expiration::ExpirationCache;
use crate::transport::{BoxedTransport, OutgoingMessage, SendOptions, SentMessage, UpsertKind};
use crate::util::gen_hex_id;

/// Length of generated outbound message ids.
const OUTBOUND_ID_LEN: usize = 32;

/// Where replies built from a context are sent.
#[derive(Clone)]
pub struct Outbox {
    transport: BoxedTransport,
    expirations: Option<Arc<ExpirationCache>>,
}

impl Outbox {
    pub fn new(transport: BoxedTransport) -> Self {
        Self {
            transport,
            expirations: None,
        }
    }

    /// Applies cached chat expirations to unsolicited sends.
    pub fn with_expirations(mut self, cache: Arc<ExpirationCache>) -> Self {
        self.expirations = Some(cache);
        self
    }

    pub fn transport(&self) -> &BoxedTransport {
        &self.transport
    }

    pub fn expirations(&self) -> Option<&Arc<ExpirationCache>> {
        self.expirations.as_ref()
    }

    /// Sends `message` into `chat`, inheriting the chat's cached expiration
    /// unless the message already carries one.
    pub async fn send(
        &self,
        chat: &str,
        mut message: OutgoingMessage,
    ) -> TransportResult<SentMessage> {
        if message.expiration().is_none()
            && let Some(seconds) = self.expirations.as_ref().and_then(|c| c.get(chat))
        {
            message.set_expiration(seconds);
        }

        let options = SendOptions {
            message_id: Some(gen_hex_id(OUTBOUND_ID_LEN)),
            quoted: None,
        };
        trace!(chat, expiration = ?message.expiration(), "Sending message");
        self.transport.send(chat, message, options).await
    }
}

/// Canonical view of one inbound message.
///
/// Built once per message by the dispatcher and shared immutably with every
/// plugin that handles it.
#[derive(Clone)]
pub struct MessageContext {
    pub id: String,
    pub chat: String,
    /// Group participant, or the chat itself for one-to-one chats.
    pub sender: String,
    pub from_me: bool,
    pub push_name: String,
    /// Milliseconds since the epoch.
    pub timestamp: i64,
    pub kind: UpsertKind,

    pub text: String,
    pub message_type: Option<MessageType>,
    /// First token of `text`, lower-cased.
    pub pattern: String,
    /// Remainder of `text` after the pattern, trimmed.
    pub args: String,

    pub context_info: Option<ContextInfo>,
    pub quoted: Option<MessagePayload>,
    pub quoted_text: String,
    /// Id of the message being replied to.
    pub stanza_id: Option<String>,
    /// Author of the quoted message.
    pub participant: Option<String>,
    pub mentions: Vec<String>,
    /// Ephemeral lifetime in seconds, 0 when the chat is not ephemeral.
    pub expiration: u32,

    pub raw: RawMessage,
    outbox: Option<Outbox>,
}

impl MessageContext {
    /// Normalizes a raw message. Never fails; missing fields get defaults.
    pub fn from_raw(raw: RawMessage, kind: UpsertKind) -> Self {
        let key = &raw.key;
        let chat = key.remote_jid.clone().unwrap_or_default();
        let sender = key.participant.clone().unwrap_or_else(|| chat.clone());
        let timestamp = raw
            .message_timestamp
            .map(|secs| secs.saturating_mul(1000))
            .unwrap_or_else(|| chrono::Utc::now().timestamp_millis());

        let extracted = extract_text_context(raw.message.as_ref());
        let (pattern, args) = split_command(&extracted.text);

        let info = extracted.context_info;
        let quoted = info
            .as_ref()
            .and_then(|i| i.quoted_message.as_deref())
            .cloned();
        let quoted_text = extract_text_context(quoted.as_ref()).text;

        Self {
            id: key.id.clone().unwrap_or_default(),
            sender,
            from_me: key.from_me,
            push_name: raw.push_name.clone().unwrap_or_default(),
            timestamp,
            kind,
            text: extracted.text,
            message_type: extracted.message_type,
            pattern,
            args,
            stanza_id: info.as_ref().and_then(|i| i.stanza_id.clone()),
            participant: info.as_ref().and_then(|i| i.participant.clone()),
            mentions: info
                .as_ref()
                .map(|i| i.mentioned_jid.clone())
                .unwrap_or_default(),
            expiration: info.as_ref().and_then(|i| i.expiration).unwrap_or(0),
            context_info: info,
            quoted,
            quoted_text,
            chat,
            raw,
            outbox: None,
        }
    }

    /// Attaches the outbox used by [`reply`](Self::reply) and [`send`](Self::send).
    pub fn with_outbox(mut self, outbox: Outbox) -> Self {
        self.outbox = Some(outbox);
        self
    }

    pub fn outbox(&self) -> Option<&Outbox> {
        self.outbox.as_ref()
    }

    /// Whether the message was sent in a group chat.
    pub fn is_group(&self) -> bool {
        self.chat.ends_with("@g.us")
    }

    /// Media files attached to the message.
    pub fn attachments(&self) -> Vec<Attachment> {
        self.raw
            .message
            .as_ref()
            .map(MessagePayload::attachments)
            .unwrap_or_default()
    }

    /// Age of the message at `now_ms`.
    pub fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms.saturating_sub(self.timestamp)
    }

    /// Replies in the same chat, keeping it ephemeral if this message was.
    pub async fn reply(
        &self,
        content: impl Into<OutgoingMessage>,
    ) -> TransportResult<SentMessage> {
        let mut message = content.into();
        if self.expiration > 0 {
            message.set_expiration(self.expiration);
        }
        self.send(&self.chat, message).await
    }

    /// Sends into any chat, applying that chat's cached expiration.
    pub async fn send(
        &self,
        to: &str,
        content: impl Into<OutgoingMessage>,
    ) -> TransportResult<SentMessage> {
        let outbox = self.outbox.as_ref().ok_or(TransportError::Detached)?;
        outbox.send(to, content.into()).await
    }
}

impl std::fmt::Debug for MessageContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageContext")
            .field("id", &self.id)
            .field("chat", &self.chat)
            .field("sender", &self.sender)
            .field("kind", &self.kind)
            .field("pattern", &self.pattern)
            .field("message_type", &self.message_type)
            .field("attached", &self.outbox.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::payload::ContentBody;
    use crate::transport::MemoryTransport;

    fn quoted_reply(expiration: Option<u32>) -> RawMessage {
        let info = ContextInfo {
            stanza_id: Some("BOTMSG".into()),
            participant: Some("bot@s".into()),
            quoted_message: Some(Box::new(MessagePayload::conversation("earlier answer"))),
            mentioned_jid: vec!["x@s".into()],
            expiration,
            ..Default::default()
        };
        RawMessage {
            message: Some(MessagePayload {
                extended_text_message: Some(
                    ContentBody::with_text("/Chat  tell me more ").context(info),
                ),
                ..Default::default()
            }),
            ..RawMessage::text("group@g.us", "M1", "").with_participant("alice@s")
        }
        .at(1_700_000_000)
    }

    #[test]
    fn test_from_raw_fields() {
        let ctx = MessageContext::from_raw(quoted_reply(Some(86400)), UpsertKind::Notify);

        assert_eq!(ctx.id, "M1");
        assert_eq!(ctx.chat, "group@g.us");
        assert_eq!(ctx.sender, "alice@s");
        assert!(ctx.is_group());
        assert_eq!(ctx.timestamp, 1_700_000_000_000);
        assert_eq!(ctx.pattern, "/chat");
        assert_eq!(ctx.args, "tell me more");
        assert_eq!(ctx.stanza_id.as_deref(), Some("BOTMSG"));
        assert_eq!(ctx.participant.as_deref(), Some("bot@s"));
        assert_eq!(ctx.quoted_text, "earlier answer");
        assert_eq!(ctx.mentions, vec!["x@s".to_string()]);
        assert_eq!(ctx.expiration, 86400);
        assert_eq!(ctx.message_type, Some(MessageType::ExtendedText));
    }

    #[test]
    fn test_sender_falls_back_to_chat() {
        let ctx = MessageContext::from_raw(
            RawMessage::text("dm@s", "M2", "hi"),
            UpsertKind::Notify,
        );
        assert_eq!(ctx.sender, "dm@s");
        assert!(!ctx.is_group());
    }

    #[test]
    fn test_empty_message_defaults() {
        let ctx = MessageContext::from_raw(RawMessage::default(), UpsertKind::Append);
        assert_eq!(ctx.text, "");
        assert_eq!(ctx.pattern, "");
        assert_eq!(ctx.args, "");
        assert_eq!(ctx.expiration, 0);
        assert!(ctx.message_type.is_none());
        assert!(ctx.timestamp > 0);
    }

    #[tokio::test]
    async fn test_reply_propagates_expiration() {
        let transport = Arc::new(MemoryTransport::new());
        let ctx = MessageContext::from_raw(quoted_reply(Some(604800)), UpsertKind::Notify)
            .with_outbox(Outbox::new(transport.clone()));

        let sent = ctx.reply("ok").await.unwrap();
        let record = &transport.sent()[0];
        assert_eq!(record.chat, "group@g.us");
        assert_eq!(record.message.expiration(), Some(604800));
        assert_eq!(record.message_id, sent.id);
        assert_eq!(sent.id.len(), 32);
    }

    #[tokio::test]
    async fn test_send_uses_cached_expiration() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(ExpirationCache::open(dir.path()));
        cache.remember("other@s", 3600).await;

        let transport = Arc::new(MemoryTransport::new());
        let ctx = MessageContext::from_raw(quoted_reply(None), UpsertKind::Notify)
            .with_outbox(Outbox::new(transport.clone()).with_expirations(cache));

        ctx.send("other@s", "ping").await.unwrap();
        ctx.reply("pong").await.unwrap();

        let sent = transport.sent();
        assert_eq!(sent[0].message.expiration(), Some(3600));
        assert_eq!(sent[1].message.expiration(), None);
    }

    #[tokio::test]
    async fn test_detached_context_cannot_send() {
        let ctx = MessageContext::from_raw(RawMessage::text("c", "1", "x"), UpsertKind::Notify);
        assert!(matches!(ctx.reply("y").await, Err(TransportError::Detached)));
    }
}

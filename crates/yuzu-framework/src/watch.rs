//! Watch-reply: continuing a conversation when a user replies to the bot.
//!
//! A plugin answers through [`WatchIndex::reply`], which records the sent
//! message id. When a user later quotes that message, the inbound context's
//! `stanza_id` names it, so [`WatchIndex::check`] admits the message and
//! [`WatchIndex::lookup`] recovers the original chat and sender.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use yuzu_core::{KeyValueStore, MessageContext, OutgoingMessage, SentMessage, TransportResult};

use crate::plugin::CheckFn;

/// Where a watched reply came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchEntry {
    /// Id of the message the bot replied to.
    pub id: String,
    pub chat: String,
    pub sender: String,
}

impl WatchEntry {
    pub fn from_context(ctx: &MessageContext) -> Self {
        Self {
            id: ctx.id.clone(),
            chat: ctx.chat.clone(),
            sender: ctx.sender.clone(),
        }
    }
}

/// Sent message id → [`WatchEntry`], backed by a [`KeyValueStore`].
#[derive(Debug)]
pub struct WatchIndex {
    store: KeyValueStore,
}

impl WatchIndex {
    /// Opens the index at `path` with autosave enabled.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self::from_store(KeyValueStore::open(path, true))
    }

    pub fn from_store(store: KeyValueStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &KeyValueStore {
        &self.store
    }

    /// Watches `sent_id`.
    pub async fn record(&self, sent_id: &str, entry: WatchEntry) {
        debug!(sent = sent_id, chat = %entry.chat, "Watching reply");
        if let Err(e) = self.store.set_async(sent_id, &entry).await {
            warn!(sent = sent_id, error = %e, "Failed to persist watch entry");
        }
    }

    pub fn lookup(&self, sent_id: &str) -> Option<WatchEntry> {
        self.store.get(sent_id)
    }

    /// Whether `ctx` quotes a watched message.
    pub fn is_watched(&self, ctx: &MessageContext) -> bool {
        ctx.stanza_id
            .as_deref()
            .is_some_and(|stanza| self.store.has(stanza))
    }

    /// Entry for the watched message `ctx` quotes.
    pub fn continuation(&self, ctx: &MessageContext) -> Option<WatchEntry> {
        ctx.stanza_id.as_deref().and_then(|stanza| self.lookup(stanza))
    }

    /// Check admitting only replies to watched messages.
    pub fn check(self: &Arc<Self>) -> CheckFn {
        let index = Arc::clone(self);
        Arc::new(move |ctx: &MessageContext| index.is_watched(ctx))
    }

    /// Replies to `ctx` and watches the sent message.
    pub async fn reply(
        &self,
        ctx: &MessageContext,
        content: impl Into<OutgoingMessage>,
    ) -> TransportResult<SentMessage> {
        let sent = ctx.reply(content).await?;
        self.record(&sent.id, WatchEntry::from_context(ctx)).await;
        Ok(sent)
    }

    /// Stops watching `sent_id`.
    pub async fn forget(&self, sent_id: &str) -> bool {
        match self.store.delete_async(sent_id).await {
            Ok(removed) => removed,
            Err(e) => {
                warn!(sent = sent_id, error = %e, "Failed to persist watch removal");
                true
            }
        }
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::RwLock;
    use std::convert::Infallible;
    use yuzu_core::{
        BoxedTransport, ContentBody, ContextInfo, MemoryTransport, MessagePayload,
        MessagesUpsert, RawMessage,
    };

    use crate::dispatcher::Dispatcher;
    use crate::plugin::PluginBuilder;
    use crate::registry::PluginRegistry;

    fn quoting(chat: &str, id: &str, stanza: &str, text: &str) -> RawMessage {
        RawMessage {
            message: Some(MessagePayload {
                extended_text_message: Some(ContentBody::with_text(text).context(ContextInfo {
                    stanza_id: Some(stanza.into()),
                    ..Default::default()
                })),
                ..Default::default()
            }),
            ..RawMessage::text(chat, id, "")
        }
    }

    #[tokio::test]
    async fn test_reply_then_continue() {
        let dir = tempfile::tempdir().unwrap();
        let index = Arc::new(WatchIndex::open(dir.path().join("chat_watch.json")));
        let memory = Arc::new(MemoryTransport::new());
        let transport: BoxedTransport = memory.clone();

        let registry = Arc::new(RwLock::new(PluginRegistry::new()));
        let dispatcher = Dispatcher::new(registry.clone());
        let continued = Arc::new(RwLock::new(None));
        {
            let mut registry = registry.write();
            let replies = Arc::clone(&index);
            registry
                .register_builder(PluginBuilder::new().id("chat").command("chat").execute(
                    move |ctx| {
                        let replies = Arc::clone(&replies);
                        async move {
                            replies.reply(&ctx, format!("echo: {}", ctx.args)).await?;
                            Ok::<_, yuzu_core::TransportError>(())
                        }
                    },
                ))
                .unwrap();

            let follow = Arc::clone(&index);
            let seen = Arc::clone(&continued);
            registry
                .register_builder(
                    PluginBuilder::new()
                        .id("chat-continue")
                        .check_fn(index.check())
                        .execute(move |ctx| {
                            let follow = Arc::clone(&follow);
                            let seen = Arc::clone(&seen);
                            async move {
                                *seen.write() = follow.continuation(&ctx);
                                Ok::<_, Infallible>(())
                            }
                        }),
                )
                .unwrap();
        }

        let upsert = MessagesUpsert::notify(vec![
            RawMessage::text("room@g.us", "Q1", ".chat hello").with_participant("alice@s"),
        ]);
        dispatcher.handle_upsert(&upsert, &transport).await;

        let sent = memory.take_sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].message.text, "echo: hello");
        assert_eq!(index.len(), 1);
        assert!(continued.read().is_none());

        let reply = quoting("room@g.us", "Q2", &sent[0].message_id, "and more");
        let outcomes = dispatcher
            .handle_upsert(&MessagesUpsert::notify(vec![reply]), &transport)
            .await;

        assert_eq!(outcomes[0].listeners, vec!["chat-continue"]);
        assert_eq!(
            *continued.read(),
            Some(WatchEntry {
                id: "Q1".into(),
                chat: "room@g.us".into(),
                sender: "alice@s".into(),
            })
        );
    }

    #[tokio::test]
    async fn test_unwatched_reply_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let index = Arc::new(WatchIndex::open(dir.path().join("w.json")));
        index.record(
            "SENT",
            WatchEntry {
                id: "A".into(),
                chat: "c".into(),
                sender: "s".into(),
            },
        )
        .await;
        let check = index.check();

        let watched = MessageContext::from_raw(
            quoting("c", "1", "SENT", "x"),
            yuzu_core::UpsertKind::Notify,
        );
        let other = MessageContext::from_raw(
            quoting("c", "2", "OTHER", "x"),
            yuzu_core::UpsertKind::Notify,
        );
        let plain =
            MessageContext::from_raw(RawMessage::text("c", "3", "x"), yuzu_core::UpsertKind::Notify);

        assert!(check(&watched));
        assert!(!check(&other));
        assert!(!check(&plain));

        assert!(index.forget("SENT").await);
        assert!(!check(&watched));
    }

    #[tokio::test]
    async fn test_index_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chat_watch.json");
        let entry = WatchEntry {
            id: "A".into(),
            chat: "c".into(),
            sender: "s".into(),
        };
        WatchIndex::open(&path).record("SENT", entry.clone()).await;

        let reopened = WatchIndex::open(&path);
        assert_eq!(reopened.lookup("SENT"), Some(entry));
    }
}

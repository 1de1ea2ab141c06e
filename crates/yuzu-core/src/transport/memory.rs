//! In-process transport used by tests and local demos.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{trace, warn};

use super::{
    Connection, Connector, MessagesUpsert, OutgoingMessage, SendOptions, SentMessage, Transport,
    TransportEvent,
};
use crate::error::{TransportError, TransportResult};
use crate::message::{ContentBody, MessageKey, MessagePayload, RawMessage};
use crate::util::gen_hex_id;

/// A message accepted by [`MemoryTransport`].
#[derive(Debug, Clone, PartialEq)]
pub struct SentRecord {
    pub chat: String,
    pub message: OutgoingMessage,
    pub message_id: String,
    pub quoted_id: Option<String>,
}

/// Transport that records every send instead of delivering it.
///
/// When an echo channel is attached, each send is also fed back as an
/// `append` upsert, the same way a real connection reports the bot's own
/// outbound messages.
#[derive(Default)]
pub struct MemoryTransport {
    sent: Mutex<Vec<SentRecord>>,
    echo: Mutex<Option<mpsc::Sender<TransportEvent>>>,
    failing: AtomicBool,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds every accepted send back into `events` as an append upsert.
    pub fn echo_to(&self, events: mpsc::Sender<TransportEvent>) {
        *self.echo.lock() = Some(events);
    }

    /// Detaches the echo channel.
    pub fn stop_echo(&self) {
        self.echo.lock().take();
    }

    /// Makes subsequent sends fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Everything sent so far.
    pub fn sent(&self) -> Vec<SentRecord> {
        self.sent.lock().clone()
    }

    /// Drains the send log.
    pub fn take_sent(&self) -> Vec<SentRecord> {
        std::mem::take(&mut *self.sent.lock())
    }

    fn echo_message(chat: &str, id: &str, message: &OutgoingMessage) -> RawMessage {
        let payload = match &message.context_info {
            Some(info) => MessagePayload {
                extended_text_message: Some(
                    ContentBody::with_text(message.text.clone()).context(info.clone()),
                ),
                ..Default::default()
            },
            None => MessagePayload::conversation(message.text.clone()),
        };
        RawMessage {
            key: MessageKey {
                remote_jid: Some(chat.to_owned()),
                from_me: true,
                id: Some(id.to_owned()),
                participant: None,
            },
            message: Some(payload),
            message_timestamp: Some(chrono::Utc::now().timestamp()),
            push_name: None,
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(
        &self,
        chat: &str,
        message: OutgoingMessage,
        options: SendOptions,
    ) -> TransportResult<SentMessage> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(TransportError::send_failed(chat, "memory transport set to fail"));
        }

        let id = options.message_id.unwrap_or_else(|| gen_hex_id(32));
        trace!(chat, id = %id, "Recording outbound message");

        let echo = self.echo.lock().clone();
        if let Some(events) = echo {
            let raw = Self::echo_message(chat, &id, &message);
            let event = TransportEvent::MessagesUpsert(MessagesUpsert::append(vec![raw]));
            if let Err(e) = events.try_send(event) {
                warn!(chat, error = %e, "Dropping echo of outbound message");
            }
        }

        self.sent.lock().push(SentRecord {
            chat: chat.to_owned(),
            message,
            message_id: id.clone(),
            quoted_id: options.quoted.and_then(|q| q.key.id),
        });

        Ok(SentMessage {
            id,
            chat: chat.to_owned(),
        })
    }
}

/// Connector that replays scripted sessions over a shared [`MemoryTransport`].
///
/// Each call to `connect` consumes the next script; once they run out,
/// connecting fails.
pub struct MemoryConnector {
    transport: Arc<MemoryTransport>,
    sessions: Mutex<VecDeque<Vec<TransportEvent>>>,
    echo: bool,
    attempts: AtomicUsize,
}

impl MemoryConnector {
    pub fn new(transport: Arc<MemoryTransport>) -> Self {
        Self {
            transport,
            sessions: Mutex::new(VecDeque::new()),
            echo: false,
            attempts: AtomicUsize::new(0),
        }
    }

    /// Queues a session that emits `events` in order.
    pub fn session(self, events: Vec<TransportEvent>) -> Self {
        self.sessions.lock().push_back(events);
        self
    }

    /// Echoes sends back into the active session's event stream.
    pub fn with_echo(mut self) -> Self {
        self.echo = true;
        self
    }

    /// Number of `connect` calls so far.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn transport(&self) -> &Arc<MemoryTransport> {
        &self.transport
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> TransportResult<Connection> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let script = self.sessions.lock().pop_front().ok_or_else(|| {
            TransportError::ConnectionFailed {
                reason: "no scripted session left".into(),
            }
        })?;

        let (tx, rx) = mpsc::channel(script.len() + 64);
        for event in script {
            tx.try_send(event)
                .map_err(|e| TransportError::closed(e.to_string()))?;
        }
        if self.echo {
            self.transport.echo_to(tx);
        }

        Ok(Connection {
            transport: self.transport.clone(),
            events: rx,
        })
    }
}

//! Terminal transport.
//!
//! Every stdin line becomes an inbound message in a single chat. A line of
//! the form `>ID text` quotes the bot message whose id starts with `ID`,
//! which is how watch-reply continuations are triggered from the terminal.
//! Outbound messages are printed with a short id and echoed back as
//! `append` upserts.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{Notify, mpsc};
use tracing::{debug, warn};
use yuzu::core::util::gen_hex_id;
use yuzu::core::{
    ContentBody, ContextInfo, MessageKey, MessagePayload, MessagesUpsert, RawMessage, SendOptions,
    SentMessage, TransportResult,
};
use yuzu::prelude::*;

const EVENT_BUFFER: usize = 64;
const SHORT_ID_LEN: usize = 6;

/// Identity of the person typing.
#[derive(Debug, Clone)]
pub struct ConsoleUser {
    pub chat: String,
    pub name: String,
}

/// Ids of messages the bot printed, oldest first.
#[derive(Debug, Default)]
struct SentIds(Mutex<Vec<String>>);

impl SentIds {
    fn push(&self, id: String) {
        self.0.lock().push(id);
    }

    /// Most recent id starting with `prefix` (case-insensitive).
    fn resolve(&self, prefix: &str) -> Option<String> {
        let prefix = prefix.to_uppercase();
        self.0
            .lock()
            .iter()
            .rev()
            .find(|id| id.starts_with(&prefix))
            .cloned()
    }
}

/// Prints outbound messages and feeds them back as the bot's own messages.
struct ConsoleTransport {
    events: mpsc::Sender<TransportEvent>,
    sent: Arc<SentIds>,
}

#[async_trait]
impl Transport for ConsoleTransport {
    async fn send(
        &self,
        chat: &str,
        message: OutgoingMessage,
        options: SendOptions,
    ) -> TransportResult<SentMessage> {
        let id = options.message_id.unwrap_or_else(|| gen_hex_id(32));
        let short: String = id.chars().take(SHORT_ID_LEN).collect();
        match message.expiration() {
            Some(secs) => println!("[bot → {chat}] ({short}, expires {secs}s) {}", message.text),
            None => println!("[bot → {chat}] ({short}) {}", message.text),
        }
        self.sent.push(id.clone());

        let echo = RawMessage {
            key: MessageKey {
                remote_jid: Some(chat.to_owned()),
                from_me: true,
                id: Some(id.clone()),
                participant: None,
            },
            message: Some(MessagePayload::conversation(message.text)),
            message_timestamp: Some(chrono::Utc::now().timestamp()),
            push_name: None,
        };
        let event = TransportEvent::MessagesUpsert(MessagesUpsert::append(vec![echo]));
        if let Err(e) = self.events.try_send(event) {
            debug!(error = %e, "Dropping echo of outbound message");
        }

        Ok(SentMessage {
            id,
            chat: chat.to_owned(),
        })
    }
}

/// Opens the single console session this process has.
pub struct ConsoleConnector {
    user: ConsoleUser,
    opened: Mutex<bool>,
    eof: Arc<Notify>,
}

impl ConsoleConnector {
    pub fn new(user: ConsoleUser) -> Self {
        Self {
            user,
            opened: Mutex::new(false),
            eof: Arc::new(Notify::new()),
        }
    }

    /// Completes once stdin is closed.
    pub async fn closed(&self) {
        self.eof.notified().await;
    }
}

#[async_trait]
impl Connector for ConsoleConnector {
    async fn connect(&self) -> TransportResult<Connection> {
        {
            let mut opened = self.opened.lock();
            if *opened {
                return Err(TransportError::ConnectionFailed {
                    reason: "stdin can only be read once".into(),
                });
            }
            *opened = true;
        }

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let sent = Arc::new(SentIds::default());
        let transport = Arc::new(ConsoleTransport {
            events: tx.clone(),
            sent: Arc::clone(&sent),
        });

        if tx
            .send(TransportEvent::Connection(yuzu::core::ConnectionUpdate::open()))
            .await
            .is_err()
        {
            return Err(TransportError::closed("event channel closed"));
        }

        tokio::spawn(read_stdin(self.user.clone(), tx, sent, Arc::clone(&self.eof)));

        Ok(Connection {
            transport,
            events: rx,
        })
    }
}

async fn read_stdin(
    user: ConsoleUser,
    events: mpsc::Sender<TransportEvent>,
    sent: Arc<SentIds>,
    eof: Arc<Notify>,
) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => continue,
            Ok(Some(line)) => {
                let raw = inbound(&user, &line, &sent);
                let event = TransportEvent::MessagesUpsert(MessagesUpsert::notify(vec![raw]));
                if events.send(event).await.is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "Failed to read stdin");
                break;
            }
        }
    }
    debug!("Console input closed");
    eof.notify_one();
}

/// Builds the inbound message for one typed line.
fn inbound(user: &ConsoleUser, line: &str, sent: &SentIds) -> RawMessage {
    let mut raw = RawMessage::text(&user.chat, gen_hex_id(16), line.trim());
    raw.push_name = Some(user.name.clone());

    let Some(rest) = line.trim().strip_prefix('>') else {
        return raw;
    };
    let (prefix, text) = rest.split_once(' ').unwrap_or((rest, ""));
    let Some(stanza) = sent.resolve(prefix) else {
        println!("(no bot message with id {prefix})");
        return raw;
    };

    raw.message = Some(MessagePayload {
        extended_text_message: Some(ContentBody::with_text(text.trim()).context(ContextInfo {
            stanza_id: Some(stanza),
            ..Default::default()
        })),
        ..Default::default()
    });
    raw
}

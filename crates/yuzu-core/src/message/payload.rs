//! Wire-level message records as delivered by the transport.
//!
//! The transport encodes a message body as an object with exactly one (in
//! practice, occasionally several) populated content fields. Each field is
//! modelled here as an `Option`, declared in the order the transport declares
//! them; that order is significant for text extraction.

use serde::{Deserialize, Serialize};

/// Identity of a message inside a chat.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MessageKey {
    /// Chat the message belongs to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_jid: Option<String>,
    /// Whether the bot's own account sent the message.
    pub from_me: bool,
    /// Message id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Group participant that sent the message; absent in one-to-one chats.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub participant: Option<String>,
}

/// One inbound message as received from the transport.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RawMessage {
    pub key: MessageKey,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<MessagePayload>,
    /// Send time in seconds since the epoch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_timestamp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub push_name: Option<String>,
}

impl RawMessage {
    /// Builds a plain text message, mostly useful for fakes and tests.
    pub fn text(chat: impl Into<String>, id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            key: MessageKey {
                remote_jid: Some(chat.into()),
                id: Some(id.into()),
                ..Default::default()
            },
            message: Some(MessagePayload::conversation(text)),
            message_timestamp: Some(chrono::Utc::now().timestamp()),
            push_name: None,
        }
    }

    /// Sets the group participant.
    pub fn with_participant(mut self, participant: impl Into<String>) -> Self {
        self.key.participant = Some(participant.into());
        self
    }

    /// Marks the message as sent by the bot's own account.
    pub fn from_me(mut self, from_me: bool) -> Self {
        self.key.from_me = from_me;
        self
    }

    /// Overrides the send timestamp (seconds).
    pub fn at(mut self, timestamp_secs: i64) -> Self {
        self.message_timestamp = Some(timestamp_secs);
        self
    }
}

/// Polymorphic message body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MessagePayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_message: Option<ContentBody>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_message: Option<ContentBody>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location_message: Option<ContentBody>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extended_text_message: Option<ContentBody>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_message: Option<ContentBody>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_message: Option<ContentBody>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_message: Option<ContentBody>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sticker_message: Option<ContentBody>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reaction_message: Option<ContentBody>,
    /// Replacement content for an edited message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edited_message: Option<Box<EditedMessage>>,
}

impl MessagePayload {
    /// A plain-text body.
    pub fn conversation(text: impl Into<String>) -> Self {
        Self {
            conversation: Some(text.into()),
            ..Default::default()
        }
    }

    /// Wraps `inner` as the edited replacement of a message.
    pub fn edited(inner: MessagePayload) -> Self {
        Self {
            edited_message: Some(Box::new(EditedMessage {
                message: Some(inner),
            })),
            ..Default::default()
        }
    }

    /// Present structured bodies in declaration order.
    ///
    /// `conversation` is not included; it carries bare text and no metadata.
    pub fn bodies(&self) -> impl Iterator<Item = (MessageType, &ContentBody)> {
        [
            (MessageType::Image, self.image_message.as_ref()),
            (MessageType::Contact, self.contact_message.as_ref()),
            (MessageType::Location, self.location_message.as_ref()),
            (MessageType::ExtendedText, self.extended_text_message.as_ref()),
            (MessageType::Document, self.document_message.as_ref()),
            (MessageType::Audio, self.audio_message.as_ref()),
            (MessageType::Video, self.video_message.as_ref()),
            (MessageType::Sticker, self.sticker_message.as_ref()),
            (MessageType::Reaction, self.reaction_message.as_ref()),
        ]
        .into_iter()
        .filter_map(|(kind, body)| body.map(|body| (kind, body)))
    }

    /// Media attachments carried by this payload.
    pub fn attachments(&self) -> Vec<Attachment> {
        self.bodies()
            .filter(|(kind, _)| kind.is_media())
            .map(|(kind, body)| Attachment {
                kind,
                mimetype: body.mimetype.clone(),
                file_name: body.file_name.clone(),
                url: body.url.clone(),
                caption: body.caption.clone().filter(|c| !c.is_empty()),
            })
            .collect()
    }
}

/// Wrapper the transport uses for edits.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditedMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<MessagePayload>,
}

/// Body of a structured content variant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ContentBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_info: Option<ContextInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mimetype: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl ContentBody {
    /// Text-bearing body.
    pub fn with_text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    /// Media body with a caption.
    pub fn with_caption(caption: impl Into<String>) -> Self {
        Self {
            caption: Some(caption.into()),
            ..Default::default()
        }
    }

    /// Attaches reply metadata.
    pub fn context(mut self, info: ContextInfo) -> Self {
        self.context_info = Some(info);
        self
    }

    /// Non-empty `text`, otherwise non-empty `caption`.
    pub fn text_or_caption(&self) -> Option<&str> {
        [self.text.as_deref(), self.caption.as_deref()]
            .into_iter()
            .flatten()
            .find(|s| !s.is_empty())
    }
}

/// Reply metadata attached to a message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ContextInfo {
    /// Id of the message being replied to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stanza_id: Option<String>,
    /// Author of the quoted message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub participant: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quoted_message: Option<Box<MessagePayload>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_jid: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub mentioned_jid: Vec<String>,
    /// Ephemeral lifetime of the chat in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiration: Option<u32>,
}

/// Content shape that produced a message's text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageType {
    Conversation,
    #[serde(rename = "imageMessage")]
    Image,
    #[serde(rename = "contactMessage")]
    Contact,
    #[serde(rename = "locationMessage")]
    Location,
    #[serde(rename = "extendedTextMessage")]
    ExtendedText,
    #[serde(rename = "documentMessage")]
    Document,
    #[serde(rename = "audioMessage")]
    Audio,
    #[serde(rename = "videoMessage")]
    Video,
    #[serde(rename = "stickerMessage")]
    Sticker,
    #[serde(rename = "reactionMessage")]
    Reaction,
}

impl MessageType {
    /// Field name used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Conversation => "conversation",
            Self::Image => "imageMessage",
            Self::Contact => "contactMessage",
            Self::Location => "locationMessage",
            Self::ExtendedText => "extendedTextMessage",
            Self::Document => "documentMessage",
            Self::Audio => "audioMessage",
            Self::Video => "videoMessage",
            Self::Sticker => "stickerMessage",
            Self::Reaction => "reactionMessage",
        }
    }

    /// Whether the variant carries a downloadable file.
    pub fn is_media(&self) -> bool {
        matches!(
            self,
            Self::Image | Self::Document | Self::Audio | Self::Video | Self::Sticker
        )
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A media file referenced by a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub kind: MessageType,
    pub mimetype: Option<String>,
    pub file_name: Option<String>,
    pub url: Option<String>,
    pub caption: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deserialize_ignores_unknown_fields() {
        let raw: RawMessage = serde_json::from_value(json!({
            "key": { "remoteJid": "chat@g.us", "fromMe": false, "id": "ABC", "participant": "u@s" },
            "message": {
                "extendedTextMessage": {
                    "text": "hi",
                    "contextInfo": { "stanzaId": "Q1", "expiration": 86400, "somethingNew": 1 }
                },
                "messageContextInfo": { "deviceListMetadata": {} }
            },
            "messageTimestamp": 1700000000,
            "pushName": "Ana",
            "status": 2
        }))
        .unwrap();

        assert_eq!(raw.key.id.as_deref(), Some("ABC"));
        let body = raw.message.unwrap().extended_text_message.unwrap();
        let info = body.context_info.unwrap();
        assert_eq!(info.stanza_id.as_deref(), Some("Q1"));
        assert_eq!(info.expiration, Some(86400));
    }

    #[test]
    fn test_bodies_follow_declaration_order() {
        let payload = MessagePayload {
            video_message: Some(ContentBody::default()),
            image_message: Some(ContentBody::default()),
            document_message: Some(ContentBody::default()),
            ..Default::default()
        };
        let kinds: Vec<_> = payload.bodies().map(|(k, _)| k).collect();
        assert_eq!(
            kinds,
            vec![MessageType::Image, MessageType::Document, MessageType::Video]
        );
    }

    #[test]
    fn test_attachments_only_media() {
        let payload = MessagePayload {
            image_message: Some(ContentBody {
                mimetype: Some("image/jpeg".into()),
                caption: Some("look".into()),
                ..Default::default()
            }),
            extended_text_message: Some(ContentBody::with_text("hello")),
            ..Default::default()
        };
        let attachments = payload.attachments();
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].kind, MessageType::Image);
        assert_eq!(attachments[0].mimetype.as_deref(), Some("image/jpeg"));
        assert_eq!(attachments[0].caption.as_deref(), Some("look"));
    }

    #[test]
    fn test_text_beats_caption() {
        let body = ContentBody {
            text: Some("text".into()),
            caption: Some("caption".into()),
            ..Default::default()
        };
        assert_eq!(body.text_or_caption(), Some("text"));

        let body = ContentBody {
            text: Some(String::new()),
            caption: Some("caption".into()),
            ..Default::default()
        };
        assert_eq!(body.text_or_caption(), Some("caption"));
        assert_eq!(ContentBody::default().text_or_caption(), None);
    }
}

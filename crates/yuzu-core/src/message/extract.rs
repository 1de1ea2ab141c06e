//! Text and reply-metadata extraction from polymorphic message bodies.

use super::payload::{ContextInfo, MessagePayload, MessageType};

/// Canonical text of a message plus the reply metadata that travelled with it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextContext {
    pub text: String,
    /// Variant that produced `text`; the last present variant when none did.
    pub message_type: Option<MessageType>,
    pub context_info: Option<ContextInfo>,
}

/// Reduces a message body to its canonical text.
///
/// An edit wrapper takes precedence over everything else in the payload.
/// Otherwise the variants are walked in declaration order and the last one
/// carrying non-empty text (or caption) wins, as does the last one carrying
/// context info. Never fails: an empty or unknown payload yields empty text.
pub fn extract_text_context(payload: Option<&MessagePayload>) -> TextContext {
    let Some(payload) = payload else {
        return TextContext::default();
    };

    if let Some(inner) = payload
        .edited_message
        .as_ref()
        .and_then(|edit| edit.message.as_ref())
    {
        return extract_text_context(Some(inner));
    }

    let mut out = TextContext::default();
    let mut last_present = None;

    if let Some(text) = payload.conversation.as_deref() {
        last_present = Some(MessageType::Conversation);
        if !text.is_empty() {
            out.text = text.to_owned();
            out.message_type = Some(MessageType::Conversation);
        }
    }

    for (kind, body) in payload.bodies() {
        last_present = Some(kind);
        if let Some(text) = body.text_or_caption() {
            out.text = text.to_owned();
            out.message_type = Some(kind);
        }
        if let Some(info) = &body.context_info {
            out.context_info = Some(info.clone());
        }
    }

    if out.message_type.is_none() {
        out.message_type = last_present;
    }
    out
}

/// Splits text at its first whitespace into a lower-cased command pattern
/// and trimmed arguments.
pub fn split_command(text: &str) -> (String, String) {
    let text = text.trim();
    match text.split_once(char::is_whitespace) {
        Some((pattern, args)) => (pattern.to_lowercase(), args.trim().to_owned()),
        None => (text.to_lowercase(), String::new()),
    }
}

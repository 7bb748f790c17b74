//! Which history messages may be sent back to the completion API.
//!
//! A user turn is only resubmitted when it got an answer (or is about to get
//! one from the in-flight placeholder). Failed turns that left an orphaned
//! user message stay in history but never reach the provider again.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use llm::{ChatMessage, ContentBlock};

use crate::storage::{AttachmentKind, Message, MessageId, MessageRole};

/// Ordered subset of `messages` that forms a consistent request context.
pub fn valid_context<'a>(messages: &'a [Message], in_flight: Option<&MessageId>) -> Vec<&'a Message> {
    messages
        .iter()
        .enumerate()
        .filter(|(index, message)| match message.role {
            MessageRole::System => true,
            MessageRole::Assistant => message.is_completed_reply(),
            MessageRole::User => user_turn_answered(&messages[index + 1..], in_flight),
        })
        .map(|(_, message)| message)
        .collect()
}

fn user_turn_answered(following: &[Message], in_flight: Option<&MessageId>) -> bool {
    for message in following {
        if in_flight == Some(&message.id) {
            return true;
        }
        match message.role {
            MessageRole::User => return false,
            MessageRole::Assistant if message.is_completed_reply() => return true,
            _ => {}
        }
    }
    false
}

/// Convert filtered history into provider messages. Image attachments that
/// carry an inline payload become image parts.
pub fn to_chat_messages(messages: &[&Message]) -> Vec<ChatMessage> {
    messages.iter().map(|m| to_chat_message(m)).collect()
}

fn to_chat_message(message: &Message) -> ChatMessage {
    let mut content = Vec::new();
    if !message.content.is_empty() {
        content.push(ContentBlock::Text {
            text: message.content.clone(),
        });
    }
    for attachment in &message.attachments {
        if attachment.kind != AttachmentKind::Image {
            continue;
        }
        let Some(data) = attachment.data.as_deref() else {
            continue;
        };
        // Skip payloads that would be rejected upstream.
        if STANDARD.decode(data).is_err() {
            tracing::debug!(attachment = %attachment.id, "Skipping attachment with invalid base64 payload");
            continue;
        }
        content.push(ContentBlock::Image {
            data: data.to_string(),
            mime_type: attachment.mime_type.clone(),
        });
    }
    ChatMessage::new(message.role.into(), content)
}

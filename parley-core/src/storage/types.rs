//! Conversation, message and attachment records
//!
//! Timestamps are Unix milliseconds.

use serde::{Deserialize, Serialize};

use super::ids::{AttachmentId, ConversationId, MessageId};

pub const DEFAULT_TITLE: &str = "New Chat";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl MessageRole {
    pub const fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
        }
    }
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<MessageRole> for llm::Role {
    fn from(role: MessageRole) -> Self {
        match role {
            MessageRole::User => llm::Role::User,
            MessageRole::Assistant => llm::Role::Assistant,
            MessageRole::System => llm::Role::System,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Image,
    File,
}

/// A file or image bound to a message.
///
/// `uri` starts out local and is swapped for the remote URL once uploaded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: AttachmentId,
    #[serde(rename = "type")]
    pub kind: AttachmentKind,
    pub uri: String,
    pub name: String,
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Base64 payload for multimodal requests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl Attachment {
    pub fn new(
        kind: AttachmentKind,
        uri: impl Into<String>,
        name: impl Into<String>,
        mime_type: impl Into<String>,
    ) -> Self {
        Self {
            id: AttachmentId::new(),
            kind,
            uri: uri.into(),
            name: name.into(),
            mime_type: mime_type.into(),
            size: None,
            data: None,
        }
    }

    pub fn image(uri: impl Into<String>, name: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self::new(AttachmentKind::Image, uri, name, mime_type)
    }

    pub fn file(uri: impl Into<String>, name: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self::new(AttachmentKind::File, uri, name, mime_type)
    }

    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = Some(data.into());
        self
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn is_remote(&self) -> bool {
        self.uri.starts_with("https://") || self.uri.starts_with("http://")
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub role: MessageRole,
    pub content: String,
    pub timestamp: i64,
    #[serde(default)]
    pub is_streaming: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

impl Message {
    pub fn new(role: MessageRole, content: impl Into<String>, timestamp: i64) -> Self {
        Self {
            id: MessageId::new(),
            role,
            content: content.into(),
            timestamp,
            is_streaming: false,
            attachments: Vec::new(),
        }
    }

    pub fn user(content: impl Into<String>, timestamp: i64) -> Self {
        Self::new(MessageRole::User, content, timestamp)
    }

    pub fn assistant(content: impl Into<String>, timestamp: i64) -> Self {
        Self::new(MessageRole::Assistant, content, timestamp)
    }

    pub fn system(content: impl Into<String>, timestamp: i64) -> Self {
        Self::new(MessageRole::System, content, timestamp)
    }

    /// Empty assistant message that a stream will fill.
    pub fn placeholder(timestamp: i64) -> Self {
        Self {
            is_streaming: true,
            ..Self::assistant("", timestamp)
        }
    }

    pub fn with_attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = attachments;
        self
    }

    /// A finished assistant reply with content.
    pub fn is_completed_reply(&self) -> bool {
        self.role == MessageRole::Assistant && !self.is_streaming && !self.content.trim().is_empty()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Synced,
    /// Changed locally since the last confirmed push (or never pushed)
    Pending,
    Error,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub title: String,
    pub messages: Vec<Message>,
    pub created_at: i64,
    pub updated_at: i64,
    pub model: String,
    #[serde(default)]
    pub user_id: Option<String>,
    pub sync_status: SyncStatus,
    #[serde(default)]
    pub synced_at: Option<i64>,
}

impl Conversation {
    pub fn new(model: impl Into<String>, user_id: Option<String>, now: i64) -> Self {
        Self {
            id: ConversationId::new(),
            title: DEFAULT_TITLE.to_string(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
            model: model.into(),
            user_id,
            sync_status: SyncStatus::Pending,
            synced_at: None,
        }
    }

    pub fn has_default_title(&self) -> bool {
        self.title == DEFAULT_TITLE
    }

    pub fn message(&self, id: &MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| &m.id == id)
    }

    pub fn message_mut(&mut self, id: &MessageId) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| &m.id == id)
    }

    /// Timestamp for a new message: the clock, but never earlier than the
    /// last message so ordering by timestamp matches list order.
    pub fn next_timestamp(&self, now: i64) -> i64 {
        match self.messages.last() {
            Some(last) if last.timestamp >= now => last.timestamp + 1,
            _ => now,
        }
    }

    /// Record a mutation at `now`.
    pub fn touch(&mut self, now: i64) {
        self.updated_at = now;
    }

    /// Whether this record belongs in `user_id`'s partition. Unowned records
    /// predate sign-in and are claimed by whoever signs in.
    pub fn visible_to(&self, user_id: Option<&str>) -> bool {
        match (&self.user_id, user_id) {
            (None, _) => true,
            (Some(owner), Some(user)) => owner == user,
            (Some(_), None) => false,
        }
    }

    pub fn needs_push(&self) -> bool {
        self.sync_status != SyncStatus::Synced
    }
}

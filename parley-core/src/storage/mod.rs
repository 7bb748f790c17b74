//! Conversation data model and local persistence
//!
//! - `ids` - type-safe identifiers
//! - `types` - `Conversation`, `Message`, `Attachment`
//! - `local` - `LocalStore` with in-memory and JSON file implementations

pub mod ids;
pub mod local;
pub mod types;

pub use ids::{AttachmentId, ConversationId, MessageId};
pub use local::{JsonFileStore, LocalStore, MemoryStore};
pub use types::{
    Attachment, AttachmentKind, Conversation, DEFAULT_TITLE, Message, MessageRole, SyncStatus,
};

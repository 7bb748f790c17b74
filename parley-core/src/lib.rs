//! Conversation orchestration for the parley chat client
//!
//! This crate provides:
//! - **Store**: `ConversationStore`, the send-message state machine with
//!   optimistic inserts and atomic rollback
//! - **Images**: chat input detection and the provider fallback chain
//! - **Sync**: last-write-wins reconciliation of conversations and settings
//!   against a hosted backend (`SupabaseClient`)
//! - **Storage**: the conversation data model and local persistence
//!
//! # Example
//!
//! ```ignore
//! use parley_core::ConversationStore;
//!
//! let store = ConversationStore::builder().build();
//! store.apply_settings(&settings);
//! let outcome = store.send_message("hello", Vec::new()).await?;
//! ```

pub mod auth;
pub mod clock;
pub mod error;
pub mod image;
pub mod logging;
pub mod remote;
pub mod services;
pub mod storage;
pub mod store;
pub mod sync;
pub mod testing;
pub mod validity;

pub use auth::{AuthEvent, AuthProvider, Session, spawn_auth_listener};
pub use clock::{Clock, SystemClock};
pub use error::{ErrorNotice, NoticeKind, SendError};
pub use image::{ImageResolver, extract_image_prompt, is_image_generation_request};
pub use remote::{ObjectStorage, SupabaseClient, SupabaseConfig};
pub use services::{HostedServices, ServiceFactory};
pub use storage::{
    Attachment, AttachmentId, AttachmentKind, Conversation, ConversationId, JsonFileStore,
    LocalStore, MemoryStore, Message, MessageId, MessageRole, SyncStatus,
};
pub use store::{ChatParams, ConversationStore, PendingTurn, SendOutcome, StoreEvent, TurnStatus};
pub use sync::{RemoteStore, SettingsSync, SyncReconciler, SyncReport};
pub use validity::{to_chat_messages, valid_context};

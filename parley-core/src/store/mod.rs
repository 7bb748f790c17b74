//! ConversationStore - owns conversation state and orchestrates sends
//!
//! The store is the only writer of conversation and message state. UI and
//! sync read snapshots and subscribe to [`StoreEvent`]s; sync writes back
//! through the setters at the bottom of this file.
//!
//! - `send` - the send-message state machine
//! - `turn` - per-attempt bookkeeping
//! - `title` - automatic titles
//! - `attachments` - background attachment uploads

mod attachments;
mod send;
mod title;
mod turn;

pub use send::SendOutcome;
pub use turn::{PendingTurn, TurnStatus};

use anyhow::Result;
use config::{DEFAULT_MAX_TOKENS, DEFAULT_MODEL, DEFAULT_TEMPERATURE, Provider, Settings};
use llm::{CancelHandle, ChatModel};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast;

use crate::clock::{Clock, SystemClock};
use crate::error::ErrorNotice;
use crate::image::ImageResolver;
use crate::remote::ObjectStorage;
use crate::services::{HostedServices, ServiceFactory};
use crate::storage::{
    AttachmentId, Conversation, ConversationId, LocalStore, MemoryStore, Message, MessageId, SyncStatus,
};
use crate::sync::DebouncedTask;

const SAVE_DELAY: Duration = Duration::from_millis(500);
const EVENT_CAPACITY: usize = 256;

/// Change notifications for subscribers.
#[derive(Clone, Debug)]
pub enum StoreEvent {
    ConversationCreated(ConversationId),
    MessageAdded {
        conversation_id: ConversationId,
        message: Message,
    },
    /// Content, streaming flag or attachments of a message changed
    MessageUpdated {
        conversation_id: ConversationId,
        message: Message,
    },
    StreamFinished {
        conversation_id: ConversationId,
        message_id: MessageId,
    },
    TurnRolledBack {
        conversation_id: ConversationId,
        user_message_id: MessageId,
    },
    TitleChanged {
        conversation_id: ConversationId,
        title: String,
    },
    /// Replaced by sync or sync bookkeeping changed
    ConversationUpdated(ConversationId),
    /// `user_id` is `None` when there is no remote copy to remove.
    ConversationDeleted {
        id: ConversationId,
        user_id: Option<String>,
    },
    /// A conversation has local changes worth pushing
    SyncRequested(ConversationId),
    Error(ErrorNotice),
    ErrorDismissed,
}

/// Model and sampling parameters used for new requests.
#[derive(Clone, Debug, PartialEq)]
pub struct ChatParams {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for ChatParams {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

struct ActiveTurn {
    turn: PendingTurn,
    cancel: Option<CancelHandle>,
    cancelled: bool,
}

impl ActiveTurn {
    fn cancel(&mut self) {
        self.cancelled = true;
        if let Some(handle) = &self.cancel {
            handle.cancel();
        }
    }
}

struct State {
    conversations: Vec<Conversation>,
    active: Option<ConversationId>,
    user_id: Option<String>,
    params: ChatParams,
    chat_model: Option<Arc<dyn ChatModel>>,
    credential: Option<String>,
    images: Option<ImageResolver>,
    auto_title: bool,
    image_generation: bool,
    turns: HashMap<ConversationId, ActiveTurn>,
    error: Option<ErrorNotice>,
    notice_seq: u64,
}

impl State {
    fn find(&self, id: &ConversationId) -> Option<&Conversation> {
        self.conversations.iter().find(|c| &c.id == id)
    }

    fn find_mut(&mut self, id: &ConversationId) -> Option<&mut Conversation> {
        self.conversations.iter_mut().find(|c| &c.id == id)
    }

    /// Tell an in-flight turn that `id` changed outside of it, unless the
    /// change touched one of the turn's own messages.
    fn note_change(&mut self, id: &ConversationId, message_id: Option<&MessageId>) {
        if let Some(active) = self.turns.get_mut(id) {
            let own = message_id.is_some_and(|m| {
                m == &active.turn.user_message_id || m == &active.turn.placeholder_id
            });
            if !own {
                active.turn.note_change_elsewhere();
            }
        }
    }

    fn cancel_all(&mut self) -> usize {
        let mut cancelled = 0;
        for active in self.turns.values_mut() {
            if !active.cancelled {
                active.cancel();
                cancelled += 1;
            }
        }
        cancelled
    }
}

struct Inner {
    state: Mutex<State>,
    local: Arc<dyn LocalStore>,
    clock: Arc<dyn Clock>,
    services: Arc<dyn ServiceFactory>,
    storage: Option<Arc<dyn ObjectStorage>>,
    http: reqwest::Client,
    events: broadcast::Sender<StoreEvent>,
    save_task: DebouncedTask,
    notice_task: DebouncedTask,
}

impl Inner {
    fn emit(&self, event: StoreEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    async fn persist(&self) -> Result<()> {
        let snapshot = self.state.lock().conversations.clone();
        self.local.save(&snapshot).await
    }
}

pub struct ConversationStoreBuilder {
    local: Option<Arc<dyn LocalStore>>,
    clock: Option<Arc<dyn Clock>>,
    chat_model: Option<Arc<dyn ChatModel>>,
    images: Option<ImageResolver>,
    storage: Option<Arc<dyn ObjectStorage>>,
    services: Option<Arc<dyn ServiceFactory>>,
    params: ChatParams,
}

impl ConversationStoreBuilder {
    pub fn local_store(mut self, local: Arc<dyn LocalStore>) -> Self {
        self.local = Some(local);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn chat_model(mut self, model: Arc<dyn ChatModel>) -> Self {
        self.chat_model = Some(model);
        self
    }

    pub fn image_resolver(mut self, resolver: ImageResolver) -> Self {
        self.images = Some(resolver);
        self
    }

    pub fn object_storage(mut self, storage: Arc<dyn ObjectStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn services(mut self, services: Arc<dyn ServiceFactory>) -> Self {
        self.services = Some(services);
        self
    }

    pub fn params(mut self, params: ChatParams) -> Self {
        self.params = params;
        self
    }

    pub fn build(self) -> ConversationStore {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let state = State {
            conversations: Vec::new(),
            active: None,
            user_id: None,
            params: self.params,
            chat_model: self.chat_model,
            credential: None,
            images: self.images,
            auto_title: true,
            image_generation: true,
            turns: HashMap::new(),
            error: None,
            notice_seq: 0,
        };
        ConversationStore {
            inner: Arc::new(Inner {
                state: Mutex::new(state),
                local: self.local.unwrap_or_else(|| Arc::new(MemoryStore::new())),
                clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
                services: self.services.unwrap_or_else(|| Arc::new(HostedServices)),
                storage: self.storage,
                http: reqwest::Client::new(),
                events,
                save_task: DebouncedTask::new("save-conversations", SAVE_DELAY),
                notice_task: DebouncedTask::new("dismiss-error", Duration::ZERO),
            }),
        }
    }
}

/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ConversationStore {
    inner: Arc<Inner>,
}

impl ConversationStore {
    pub fn builder() -> ConversationStoreBuilder {
        ConversationStoreBuilder {
            local: None,
            clock: None,
            chat_model: None,
            images: None,
            storage: None,
            services: None,
            params: ChatParams::default(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.inner.events.subscribe()
    }

    fn now(&self) -> i64 {
        self.inner.clock.now_millis()
    }

    fn downgrade(&self) -> Weak<Inner> {
        Arc::downgrade(&self.inner)
    }

    fn schedule_save(&self) {
        let inner = self.downgrade();
        self.inner.save_task.schedule(async move {
            let Some(inner) = inner.upgrade() else {
                return;
            };
            if let Err(e) = inner.persist().await {
                tracing::warn!("Failed to save conversations: {:#}", e);
            }
        });
    }

    /// Replace in-memory state with what was persisted.
    ///
    /// Placeholders still marked streaming were interrupted and are dropped.
    pub async fn load(&self) -> Result<usize> {
        let mut conversations = self.inner.local.load().await?;
        let mut dropped = 0;
        for conversation in &mut conversations {
            let before = conversation.messages.len();
            conversation.messages.retain(|m| !m.is_streaming);
            dropped += before - conversation.messages.len();
        }
        if dropped > 0 {
            tracing::info!(dropped, "Dropped interrupted replies");
        }

        let count = conversations.len();
        let mut state = self.inner.state.lock();
        state.conversations = conversations;
        state.active = None;
        tracing::debug!(count, "Loaded conversations");
        Ok(count)
    }

    /// Save now instead of waiting for the debounce.
    pub async fn flush(&self) -> Result<()> {
        self.inner.save_task.cancel();
        self.inner.persist().await
    }

    pub fn new_conversation(&self) -> ConversationId {
        let now = self.now();
        let mut state = self.inner.state.lock();
        let conversation = Conversation::new(state.params.model.clone(), state.user_id.clone(), now);
        let id = conversation.id.clone();
        state.conversations.push(conversation);
        state.active = Some(id.clone());
        drop(state);

        self.inner.emit(StoreEvent::ConversationCreated(id.clone()));
        self.schedule_save();
        id
    }

    pub fn select_conversation(&self, id: &ConversationId) -> bool {
        let mut state = self.inner.state.lock();
        if state.find(id).is_none() {
            return false;
        }
        state.active = Some(id.clone());
        true
    }

    pub fn active_conversation_id(&self) -> Option<ConversationId> {
        self.inner.state.lock().active.clone()
    }

    pub fn active_conversation(&self) -> Option<Conversation> {
        let state = self.inner.state.lock();
        state.active.as_ref().and_then(|id| state.find(id)).cloned()
    }

    pub fn conversation(&self, id: &ConversationId) -> Option<Conversation> {
        self.inner.state.lock().find(id).cloned()
    }

    /// Conversations of the current user, most recent first.
    pub fn conversations(&self) -> Vec<Conversation> {
        let state = self.inner.state.lock();
        let user = state.user_id.as_deref();
        let mut conversations: Vec<_> = state
            .conversations
            .iter()
            .filter(|c| c.visible_to(user))
            .cloned()
            .collect();
        conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
        conversations
    }

    /// Every conversation regardless of owner.
    pub fn snapshot(&self) -> Vec<Conversation> {
        self.inner.state.lock().conversations.clone()
    }

    pub fn is_streaming(&self, id: &ConversationId) -> bool {
        self.inner.state.lock().turns.contains_key(id)
    }

    pub fn pending_turn(&self, id: &ConversationId) -> Option<PendingTurn> {
        self.inner.state.lock().turns.get(id).map(|a| a.turn.clone())
    }

    pub fn params(&self) -> ChatParams {
        self.inner.state.lock().params.clone()
    }

    pub fn has_chat_model(&self) -> bool {
        self.inner.state.lock().chat_model.is_some()
    }

    pub fn set_title(&self, id: &ConversationId, title: &str) -> bool {
        self.apply_title(id, title, false)
    }

    fn apply_title(&self, id: &ConversationId, title: &str, only_if_default: bool) -> bool {
        let title = title.trim();
        if title.is_empty() {
            return false;
        }
        let now = self.now();
        let mut state = self.inner.state.lock();
        let Some(conversation) = state.find_mut(id) else {
            return false;
        };
        if only_if_default && !conversation.has_default_title() {
            return false;
        }
        conversation.title = title.to_string();
        conversation.touch(now.max(conversation.updated_at));
        conversation.sync_status = SyncStatus::Pending;
        state.note_change(id, None);
        drop(state);

        self.inner.emit(StoreEvent::TitleChanged {
            conversation_id: id.clone(),
            title: title.to_string(),
        });
        self.inner.emit(StoreEvent::SyncRequested(id.clone()));
        self.schedule_save();
        true
    }

    /// Point an attachment at its uploaded copy. Unknown ids are a no-op.
    pub fn update_attachment_uri(
        &self,
        conversation_id: &ConversationId,
        message_id: &MessageId,
        attachment_id: &AttachmentId,
        uri: &str,
    ) -> bool {
        let now = self.now();
        let mut state = self.inner.state.lock();
        let Some(conversation) = state.find_mut(conversation_id) else {
            return false;
        };
        let updated_at = now.max(conversation.updated_at);
        let Some(message) = conversation.message_mut(message_id) else {
            return false;
        };
        let Some(attachment) = message.attachments.iter_mut().find(|a| &a.id == attachment_id) else {
            return false;
        };
        attachment.uri = uri.to_string();
        let message = message.clone();
        conversation.touch(updated_at);
        conversation.sync_status = SyncStatus::Pending;
        state.note_change(conversation_id, Some(message_id));
        drop(state);

        self.inner.emit(StoreEvent::MessageUpdated {
            conversation_id: conversation_id.clone(),
            message,
        });
        self.schedule_save();
        true
    }

    /// Remove locally right away; the remote copy goes in the background.
    pub fn delete_conversation(&self, id: &ConversationId) -> bool {
        let mut state = self.inner.state.lock();
        let Some(index) = state.conversations.iter().position(|c| &c.id == id) else {
            return false;
        };
        if let Some(mut active) = state.turns.remove(id) {
            active.cancel();
        }
        let removed = state.conversations.remove(index);
        if state.active.as_ref() == Some(id) {
            state.active = None;
        }
        let user_id = removed.user_id.clone().or_else(|| state.user_id.clone());
        drop(state);

        tracing::debug!(conversation = %id, "Deleted conversation");
        self.inner.emit(StoreEvent::ConversationDeleted {
            id: id.clone(),
            user_id,
        });
        self.schedule_save();
        true
    }

    /// Cancel the in-flight turn of a conversation. Idempotent.
    pub fn cancel(&self, id: &ConversationId) -> bool {
        let mut state = self.inner.state.lock();
        match state.turns.get_mut(id) {
            Some(active) if !active.cancelled => {
                active.cancel();
                true
            }
            _ => false,
        }
    }

    pub fn cancel_all(&self) -> usize {
        self.inner.state.lock().cancel_all()
    }

    /// Swap the completion model. In-flight streams are cancelled first.
    pub fn set_chat_model(&self, model: Option<Arc<dyn ChatModel>>) {
        let mut state = self.inner.state.lock();
        let cancelled = state.cancel_all();
        if cancelled > 0 {
            tracing::info!(cancelled, "Cancelled in-flight replies before swapping model");
        }
        state.chat_model = model;
    }

    pub fn set_image_resolver(&self, resolver: Option<ImageResolver>) {
        self.inner.state.lock().images = resolver;
    }

    /// Take model, sampling parameters, toggles and credentials from settings.
    ///
    /// A changed OpenRouter key cancels every in-flight stream before the
    /// new client replaces the old one.
    pub fn apply_settings(&self, settings: &Settings) {
        let credential = settings.get_api_key(Provider::OpenRouter);
        let model_name = settings.model().to_string();
        let images = self.inner.services.image_resolver(settings);

        let mut state = self.inner.state.lock();
        let credential_changed = state.credential != credential;
        let model_changed = state.params.model != model_name;

        if credential_changed {
            let cancelled = state.cancel_all();
            if cancelled > 0 {
                tracing::info!(cancelled, "Credential changed, cancelled in-flight replies");
            }
        }

        if credential_changed || model_changed {
            state.chat_model = match &credential {
                Some(key) => match self.inner.services.chat_model(key, &model_name) {
                    Ok(model) => Some(model),
                    Err(e) => {
                        tracing::warn!("Could not create chat model {}: {}", model_name, e);
                        None
                    }
                },
                None => None,
            };
            state.credential = credential;
        }

        state.params = ChatParams {
            model: model_name,
            temperature: settings.temperature(),
            max_tokens: settings.max_tokens(),
        };
        state.auto_title = settings.features.auto_title();
        state.image_generation = settings.features.image_generation();
        state.images = images;
    }

    // ------------------------------------------------------------------
    // Error slot
    // ------------------------------------------------------------------

    pub fn error(&self) -> Option<ErrorNotice> {
        self.inner.state.lock().error.clone()
    }

    /// Show a notice, replacing the current one; it clears itself after
    /// `notice.dismiss_after`.
    pub fn show_error(&self, notice: ErrorNotice) {
        let delay = notice.dismiss_after;
        let seq = {
            let mut state = self.inner.state.lock();
            state.error = Some(notice.clone());
            state.notice_seq += 1;
            state.notice_seq
        };
        self.inner.emit(StoreEvent::Error(notice));

        let inner = self.downgrade();
        self.inner.notice_task.schedule_in(delay, async move {
            let Some(inner) = inner.upgrade() else {
                return;
            };
            let cleared = {
                let mut state = inner.state.lock();
                if state.notice_seq == seq && state.error.is_some() {
                    state.error = None;
                    true
                } else {
                    false
                }
            };
            if cleared {
                inner.emit(StoreEvent::ErrorDismissed);
            }
        });
    }

    pub fn dismiss_error(&self) {
        self.inner.notice_task.cancel();
        let had_error = self.inner.state.lock().error.take().is_some();
        if had_error {
            self.inner.emit(StoreEvent::ErrorDismissed);
        }
    }

    // ------------------------------------------------------------------
    // Sync setters
    // ------------------------------------------------------------------

    pub fn user_id(&self) -> Option<String> {
        self.inner.state.lock().user_id.clone()
    }

    /// Switch the user partition. Signing in claims conversations created
    /// while signed out.
    pub fn set_user(&self, user_id: Option<String>) {
        let mut state = self.inner.state.lock();
        if state.user_id == user_id {
            return;
        }
        if let Some(user) = &user_id {
            let mut claimed = Vec::new();
            for conversation in state.conversations.iter_mut().filter(|c| c.user_id.is_none()) {
                conversation.user_id = Some(user.clone());
                conversation.sync_status = SyncStatus::Pending;
                claimed.push(conversation.id.clone());
            }
            for id in &claimed {
                state.note_change(id, None);
            }
        }
        let active_visible = state
            .active
            .as_ref()
            .and_then(|id| state.find(id))
            .is_some_and(|c| c.visible_to(user_id.as_deref()));
        if !active_visible {
            state.active = None;
        }
        tracing::info!(signed_in = user_id.is_some(), "User changed");
        state.user_id = user_id;
        drop(state);
        self.schedule_save();
    }

    /// Adopt records produced by a merge.
    ///
    /// A record replaces the local one only when it is strictly newer and the
    /// conversation has no turn in flight. Nothing is ever removed.
    pub fn apply_merged(&self, merged: Vec<Conversation>) -> usize {
        let mut changed = Vec::new();
        let mut state = self.inner.state.lock();
        for record in merged {
            if state.turns.contains_key(&record.id) {
                continue;
            }
            match state.conversations.iter().position(|c| c.id == record.id) {
                Some(index) => {
                    if state.conversations[index].updated_at >= record.updated_at {
                        continue;
                    }
                    changed.push(record.id.clone());
                    state.conversations[index] = record;
                }
                None => {
                    changed.push(record.id.clone());
                    state.conversations.push(record);
                }
            }
        }
        drop(state);

        for id in &changed {
            self.inner.emit(StoreEvent::ConversationUpdated(id.clone()));
        }
        if !changed.is_empty() {
            self.schedule_save();
        }
        changed.len()
    }

    /// Record a successful push. Ignored if the conversation changed since
    /// the pushed snapshot was taken.
    pub fn mark_synced(&self, id: &ConversationId, pushed_updated_at: i64, synced_at: i64) -> bool {
        self.set_sync_status(id, pushed_updated_at, SyncStatus::Synced, Some(synced_at))
    }

    pub fn mark_sync_error(&self, id: &ConversationId, pushed_updated_at: i64) -> bool {
        self.set_sync_status(id, pushed_updated_at, SyncStatus::Error, None)
    }

    fn set_sync_status(
        &self,
        id: &ConversationId,
        pushed_updated_at: i64,
        status: SyncStatus,
        synced_at: Option<i64>,
    ) -> bool {
        let mut state = self.inner.state.lock();
        let Some(conversation) = state.find_mut(id) else {
            return false;
        };
        if conversation.updated_at != pushed_updated_at {
            return false;
        }
        conversation.sync_status = status;
        if synced_at.is_some() {
            conversation.synced_at = synced_at;
        }
        drop(state);

        self.inner.emit(StoreEvent::ConversationUpdated(id.clone()));
        self.schedule_save();
        true
    }

    /// Conversations of `user_id` with unpushed changes, and how many were
    /// held back because a reply is still streaming.
    pub fn pending_sync(&self, user_id: &str) -> (Vec<Conversation>, usize) {
        let state = self.inner.state.lock();
        let mut skipped = 0;
        let pending = state
            .conversations
            .iter()
            .filter(|c| c.visible_to(Some(user_id)) && c.needs_push() && !c.messages.is_empty())
            .filter(|c| {
                let in_flight = state.turns.contains_key(&c.id);
                if in_flight {
                    skipped += 1;
                }
                !in_flight
            })
            .cloned()
            .collect();
        (pending, skipped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ManualClock;

    fn store() -> (ConversationStore, Arc<ManualClock>, Arc<MemoryStore>) {
        let clock = Arc::new(ManualClock::new(1_000));
        let local = Arc::new(MemoryStore::new());
        let store = ConversationStore::builder()
            .clock(clock.clone())
            .local_store(local.clone())
            .build();
        (store, clock, local)
    }

    #[tokio::test]
    async fn test_new_conversation_becomes_active() {
        let (store, _, _) = store();
        let id = store.new_conversation();
        assert_eq!(store.active_conversation_id(), Some(id.clone()));
        let conversation = store.conversation(&id).unwrap();
        assert!(conversation.has_default_title());
        assert_eq!(conversation.model, DEFAULT_MODEL);
    }

    #[tokio::test]
    async fn test_conversations_sorted_by_recency() {
        let (store, clock, _) = store();
        let first = store.new_conversation();
        clock.advance(10);
        let second = store.new_conversation();
        clock.advance(10);
        store.set_title(&first, "Renamed");

        let ids: Vec<_> = store.conversations().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![first, second]);
    }

    #[tokio::test]
    async fn test_update_attachment_on_missing_conversation() {
        let (store, _, _) = store();
        assert!(!store.update_attachment_uri(
            &ConversationId::new(),
            &MessageId::new(),
            &AttachmentId::new(),
            "https://x"
        ));
    }

    #[tokio::test]
    async fn test_mark_synced_ignores_stale_push() {
        let (store, clock, _) = store();
        let id = store.new_conversation();
        let pushed = store.conversation(&id).unwrap().updated_at;

        clock.advance(5);
        store.set_title(&id, "Changed after push");
        assert!(!store.mark_synced(&id, pushed, 2_000));
        assert_eq!(store.conversation(&id).unwrap().sync_status, SyncStatus::Pending);

        let current = store.conversation(&id).unwrap().updated_at;
        assert!(store.mark_synced(&id, current, 2_000));
        let conversation = store.conversation(&id).unwrap();
        assert_eq!(conversation.sync_status, SyncStatus::Synced);
        assert_eq!(conversation.synced_at, Some(2_000));
    }

    #[tokio::test]
    async fn test_apply_merged_keeps_newer_local() {
        let (store, _, _) = store();
        let id = store.new_conversation();
        let local = store.conversation(&id).unwrap();

        let mut older = local.clone();
        older.title = "Older".into();
        older.updated_at -= 1;
        let mut newer = local.clone();
        newer.id = ConversationId::new();
        newer.title = "Remote only".into();

        assert_eq!(store.apply_merged(vec![older, newer.clone()]), 1);
        assert!(store.conversation(&id).unwrap().has_default_title());
        assert_eq!(store.conversation(&newer.id).unwrap().title, "Remote only");
    }

    #[tokio::test]
    async fn test_sign_in_claims_unowned() {
        let (store, _, _) = store();
        let id = store.new_conversation();
        store.set_user(Some("u1".into()));
        assert_eq!(store.conversation(&id).unwrap().user_id.as_deref(), Some("u1"));

        store.set_user(Some("u2".into()));
        assert!(store.conversations().is_empty());
        assert_eq!(store.active_conversation_id(), None);
    }

    #[tokio::test]
    async fn test_delete_emits_event() {
        let (store, _, _) = store();
        let mut events = store.subscribe();
        let id = store.new_conversation();
        assert!(store.delete_conversation(&id));
        assert!(!store.delete_conversation(&id));

        assert!(matches!(events.recv().await.unwrap(), StoreEvent::ConversationCreated(_)));
        match events.recv().await.unwrap() {
            StoreEvent::ConversationDeleted { id: deleted, .. } => assert_eq!(deleted, id),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_saves_are_debounced() {
        let (store, _, local) = store();
        store.new_conversation();
        store.new_conversation();
        assert_eq!(local.save_count(), 0);

        tokio::time::sleep(SAVE_DELAY + Duration::from_millis(10)).await;
        assert_eq!(local.save_count(), 1);
        assert_eq!(local.snapshot().len(), 2);
    }

    #[tokio::test]
    async fn test_load_drops_interrupted_placeholders() {
        let mut conversation = Conversation::new("m", None, 0);
        conversation.messages.push(Message::user("q", 0));
        conversation.messages.push(Message::placeholder(1));
        let local = Arc::new(MemoryStore::with_conversations(vec![conversation.clone()]));
        let store = ConversationStore::builder().local_store(local).build();

        assert_eq!(store.load().await.unwrap(), 1);
        let loaded = store.conversation(&conversation.id).unwrap();
        assert_eq!(loaded.messages.len(), 1);
        assert!(!loaded.messages[0].is_streaming);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_notice_auto_dismisses() {
        let (store, _, _) = store();
        store.show_error(ErrorNotice::generic("boom"));
        assert!(store.error().is_some());

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(store.error().is_some());
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(store.error().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_newer_notice_is_not_cleared_early() {
        let (store, _, _) = store();
        store.show_error(ErrorNotice::generic("first"));
        tokio::time::sleep(Duration::from_secs(3)).await;
        store.show_error(ErrorNotice::quota("out of credits", None));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(store.error().unwrap().message, "out of credits");
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(store.error().is_none());
    }
}

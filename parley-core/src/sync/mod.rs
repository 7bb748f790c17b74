//! Cloud sync for conversations and settings
//!
//! Sync is pull/merge/push: pages of remote conversations are merged into
//! the store last-write-wins, then every locally dirty conversation is
//! pushed on its own. Failed pushes are retried whenever sync runs again.

mod debounce;
mod merge;
pub mod settings;

pub use debounce::DebouncedTask;
pub use merge::merge_conversations;
pub use settings::{SettingsRecord, SettingsRemote, SettingsSync, merge_settings};

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::clock::{Clock, SystemClock};
use crate::storage::{Conversation, ConversationId};
use crate::store::{ConversationStore, StoreEvent};

pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Row store holding the cloud copy of conversations.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Conversations of `user_id`, most recently updated first.
    async fn fetch_page(&self, user_id: &str, offset: usize, limit: usize) -> Result<Vec<Conversation>>;

    /// Upsert the conversation and its messages.
    async fn push(&self, conversation: &Conversation, user_id: &str) -> Result<()>;

    async fn delete(&self, id: &ConversationId, user_id: &str) -> Result<()>;
}

/// One page of remote conversations.
#[derive(Clone, Debug, PartialEq)]
pub struct Page {
    pub conversations: Vec<Conversation>,
    pub next_offset: usize,
    pub has_more: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Remote records adopted by the store
    pub pulled: usize,
    pub pushed: usize,
    pub failed: usize,
    /// Dirty conversations held back because a reply is streaming
    pub skipped: usize,
}

pub struct SyncReconciler {
    store: ConversationStore,
    remote: Arc<dyn RemoteStore>,
    clock: Arc<dyn Clock>,
    page_size: usize,
}

impl SyncReconciler {
    pub fn new(store: ConversationStore, remote: Arc<dyn RemoteStore>) -> Self {
        Self {
            store,
            remote,
            clock: Arc::new(SystemClock),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Every remote conversation of `user_id`, page by page.
    pub async fn fetch_remote(&self, user_id: &str) -> Result<Vec<Conversation>> {
        let mut all = Vec::new();
        let mut offset = 0;
        loop {
            let page = self.fetch_page(user_id, offset).await?;
            all.extend(page.conversations);
            if !page.has_more {
                return Ok(all);
            }
            offset = page.next_offset;
        }
    }

    async fn fetch_page(&self, user_id: &str, offset: usize) -> Result<Page> {
        // One extra row tells us whether another page exists.
        let mut conversations = self
            .remote
            .fetch_page(user_id, offset, self.page_size + 1)
            .await?;
        let has_more = conversations.len() > self.page_size;
        conversations.truncate(self.page_size);
        Ok(Page {
            next_offset: offset + conversations.len(),
            conversations,
            has_more,
        })
    }

    /// Fetch one page and merge it into the store.
    pub async fn pull_page(&self, user_id: &str, offset: usize) -> Result<Page> {
        let page = self.fetch_page(user_id, offset).await?;
        let adopted = self.merge_into_store(&page.conversations, user_id);
        tracing::debug!(offset, fetched = page.conversations.len(), adopted, "Pulled page");
        Ok(page)
    }

    fn merge_into_store(&self, remote: &[Conversation], user_id: &str) -> usize {
        let merged = merge_conversations(&self.store.snapshot(), remote, user_id);
        self.store.apply_merged(merged)
    }

    /// Push one conversation; on success it becomes synced, on failure it is
    /// marked for retry.
    pub async fn push_local(&self, conversation: &Conversation, user_id: &str) -> bool {
        match self.remote.push(conversation, user_id).await {
            Ok(()) => {
                self.store
                    .mark_synced(&conversation.id, conversation.updated_at, self.clock.now_millis());
                true
            }
            Err(e) => {
                tracing::warn!(conversation = %conversation.id, "Push failed: {:#}", e);
                self.store.mark_sync_error(&conversation.id, conversation.updated_at);
                false
            }
        }
    }

    /// Push every dirty conversation of `user_id`.
    pub async fn push_pending(&self, user_id: &str) -> SyncReport {
        let (pending, skipped) = self.store.pending_sync(user_id);
        let mut report = SyncReport {
            skipped,
            ..SyncReport::default()
        };
        for conversation in &pending {
            if self.push_local(conversation, user_id).await {
                report.pushed += 1;
            } else {
                report.failed += 1;
            }
        }
        report
    }

    /// Push a single conversation if it is dirty and not mid-reply.
    /// Does nothing while signed out.
    pub async fn sync_conversation(&self, id: &ConversationId) -> bool {
        let Some(user_id) = self.store.user_id() else {
            return false;
        };
        if self.store.is_streaming(id) {
            return false;
        }
        let Some(conversation) = self.store.conversation(id) else {
            return false;
        };
        if !conversation.visible_to(Some(&user_id)) {
            return false;
        }
        if !conversation.needs_push() {
            return true;
        }
        self.push_local(&conversation, &user_id).await
    }

    /// Pull everything, then push what is dirty.
    pub async fn sync_all(&self, user_id: &str) -> Result<SyncReport> {
        let remote = self.fetch_remote(user_id).await?;
        let pulled = self.merge_into_store(&remote, user_id);
        let report = self.push_pending(user_id).await;
        tracing::info!(
            pulled,
            pushed = report.pushed,
            failed = report.failed,
            skipped = report.skipped,
            "Sync finished"
        );
        Ok(SyncReport { pulled, ..report })
    }

    /// Push on `SyncRequested` and delete remotely on `ConversationDeleted`,
    /// both in the background.
    ///
    /// The task only holds a weak reference and ends with the first event
    /// after the reconciler has been dropped.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let mut events = self.store.subscribe();
        let reconciler = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                let event = events.recv().await;
                let Some(this) = reconciler.upgrade() else {
                    tracing::debug!("Sync reconciler dropped, listener stopping");
                    break;
                };
                match event {
                    Ok(StoreEvent::SyncRequested(id)) => {
                        tokio::spawn(async move {
                            this.sync_conversation(&id).await;
                        });
                    }
                    Ok(StoreEvent::ConversationDeleted {
                        id,
                        user_id: Some(user_id),
                    }) => {
                        let remote = Arc::clone(&this.remote);
                        tokio::spawn(async move {
                            if let Err(e) = remote.delete(&id, &user_id).await {
                                tracing::warn!(conversation = %id, "Remote delete failed: {:#}", e);
                            }
                        });
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Sync listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

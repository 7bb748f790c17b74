//! In-memory collaborators for tests
//!
//! Scripted chat models, image providers, a remote row store, object
//! storage and a manual clock. None of them touch the network.

use anyhow::{Result, bail};
use async_trait::async_trait;
use config::Settings;
use futures::StreamExt;
use llm::{
    ChatMessage, ChatModel, ChatRequest, CompletionStream, GeneratedImage, ImageProvider, LlmError,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use tokio::sync::Notify;

use crate::clock::Clock;
use crate::image::ImageResolver;
use crate::remote::ObjectStorage;
use crate::services::ServiceFactory;
use crate::storage::{Conversation, ConversationId, SyncStatus};
use crate::sync::{RemoteStore, SettingsRecord, SettingsRemote};

/// How a scripted call fails.
#[derive(Clone, Debug)]
pub enum Failure {
    Http { status: u16, message: String },
    Quota { message: String, upgrade_url: Option<String> },
    Stream(String),
}

impl Failure {
    fn to_error(&self) -> LlmError {
        match self {
            Failure::Http { status, message } => LlmError::Http {
                status: *status,
                message: message.clone(),
            },
            Failure::Quota { message, upgrade_url } => LlmError::Quota {
                message: message.clone(),
                upgrade_url: upgrade_url.clone(),
            },
            Failure::Stream(message) => LlmError::Stream(message.clone()),
        }
    }
}

/// A chat model that replays fixed fragments.
pub struct ScriptedModel {
    name: String,
    fragments: Vec<String>,
    chat_reply: String,
    fail_request: Option<Failure>,
    fail_after_fragments: Option<Failure>,
    requests: Mutex<Vec<ChatRequest>>,
    chat_requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedModel {
    pub fn new<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: "scripted".to_string(),
            fragments: fragments.into_iter().map(Into::into).collect(),
            chat_reply: "Scripted Title".to_string(),
            fail_request: None,
            fail_after_fragments: None,
            requests: Mutex::new(Vec::new()),
            chat_requests: Mutex::new(Vec::new()),
        }
    }

    /// Every streaming request fails before any fragment.
    pub fn failing(failure: Failure) -> Self {
        Self {
            fail_request: Some(failure),
            ..Self::new(Vec::<String>::new())
        }
    }

    /// Emit the fragments, then fail.
    pub fn failing_after(mut self, failure: Failure) -> Self {
        self.fail_after_fragments = Some(failure);
        self
    }

    /// Reply for buffered `chat` calls, used for titles.
    pub fn with_chat_reply(mut self, reply: impl Into<String>) -> Self {
        self.chat_reply = reply.into();
        self
    }

    /// Streaming requests, in call order.
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().clone()
    }

    pub fn chat_requests(&self) -> Vec<ChatRequest> {
        self.chat_requests.lock().clone()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatMessage, LlmError> {
        self.chat_requests.lock().push(request.clone());
        Ok(ChatMessage::assistant(self.chat_reply.clone()))
    }

    async fn stream_chat(&self, request: &ChatRequest) -> Result<CompletionStream, LlmError> {
        self.requests.lock().push(request.clone());
        if let Some(failure) = &self.fail_request {
            return Err(failure.to_error());
        }
        let mut items: Vec<Result<String, LlmError>> =
            self.fragments.iter().cloned().map(Ok).collect();
        if let Some(failure) = &self.fail_after_fragments {
            items.push(Err(failure.to_error()));
        }
        Ok(CompletionStream::new(futures::stream::iter(items)))
    }
}

/// A chat model whose stream stays open after its fragments until
/// [`GatedModel::release`] is called or the stream is cancelled.
pub struct GatedModel {
    fragments: Vec<String>,
    started: Arc<Notify>,
    release: Arc<Notify>,
    calls: AtomicUsize,
}

impl GatedModel {
    pub fn new<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fragments: fragments.into_iter().map(Into::into).collect(),
            started: Arc::new(Notify::new()),
            release: Arc::new(Notify::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Resolves once a stream has been opened.
    pub async fn wait_started(&self) {
        self.started.notified().await;
    }

    /// Let the open stream finish.
    pub fn release(&self) {
        self.release.notify_one();
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatModel for GatedModel {
    fn name(&self) -> &str {
        "gated"
    }

    async fn chat(&self, _request: &ChatRequest) -> Result<ChatMessage, LlmError> {
        Ok(ChatMessage::assistant("Gated Title"))
    }

    async fn stream_chat(&self, _request: &ChatRequest) -> Result<CompletionStream, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let release = Arc::clone(&self.release);
        let fragments = futures::stream::iter(self.fragments.clone().into_iter().map(Ok));
        let gate = futures::stream::once(async move { release.notified().await })
            .filter_map(|()| async { None::<Result<String, LlmError>> });
        self.started.notify_one();
        Ok(CompletionStream::new(fragments.chain(gate)))
    }
}

/// Image provider returning a fixed URL, or always failing.
pub struct StaticImageProvider {
    name: String,
    url: Option<String>,
    revised_prompt: Option<String>,
    prompts: Mutex<Vec<String>>,
}

impl StaticImageProvider {
    pub fn ok(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: Some(url.into()),
            revised_prompt: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: None,
            revised_prompt: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn with_revised_prompt(mut self, revised: impl Into<String>) -> Self {
        self.revised_prompt = Some(revised.into());
        self
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }
}

#[async_trait]
impl ImageProvider for StaticImageProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, prompt: &str) -> Result<GeneratedImage, LlmError> {
        self.prompts.lock().push(prompt.to_string());
        match &self.url {
            Some(url) => Ok(GeneratedImage {
                url: url.clone(),
                revised_prompt: self.revised_prompt.clone(),
            }),
            None => Err(LlmError::UnexpectedResponse(format!("{} is unavailable", self.name))),
        }
    }
}

/// Cloud rows kept in memory.
#[derive(Default)]
pub struct MemoryRemote {
    conversations: Mutex<HashMap<ConversationId, (String, Conversation)>>,
    settings: Mutex<HashMap<String, SettingsRecord>>,
    pushes: Mutex<Vec<ConversationId>>,
    deletes: Mutex<Vec<ConversationId>>,
    settings_upserts: AtomicUsize,
    fail_fetches: AtomicBool,
    fail_pushes: AtomicBool,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a row as if another device had pushed it.
    pub fn insert(&self, user_id: &str, conversation: Conversation) {
        let mut stored = conversation;
        stored.user_id = Some(user_id.to_string());
        stored.sync_status = SyncStatus::Synced;
        stored.synced_at = Some(stored.updated_at);
        self.conversations
            .lock()
            .insert(stored.id.clone(), (user_id.to_string(), stored));
    }

    pub fn conversation(&self, id: &ConversationId) -> Option<Conversation> {
        self.conversations.lock().get(id).map(|(_, c)| c.clone())
    }

    pub fn len(&self) -> usize {
        self.conversations.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pushes(&self) -> Vec<ConversationId> {
        self.pushes.lock().clone()
    }

    pub fn deletes(&self) -> Vec<ConversationId> {
        self.deletes.lock().clone()
    }

    pub fn set_fail_fetches(&self, fail: bool) {
        self.fail_fetches.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_pushes(&self, fail: bool) {
        self.fail_pushes.store(fail, Ordering::SeqCst);
    }

    pub fn settings(&self, user_id: &str) -> Option<SettingsRecord> {
        self.settings.lock().get(user_id).cloned()
    }

    pub fn set_settings(&self, user_id: &str, record: SettingsRecord) {
        self.settings.lock().insert(user_id.to_string(), record);
    }

    pub fn settings_upserts(&self) -> usize {
        self.settings_upserts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn fetch_page(&self, user_id: &str, offset: usize, limit: usize) -> Result<Vec<Conversation>> {
        if self.fail_fetches.load(Ordering::SeqCst) {
            bail!("fetch failed");
        }
        let mut rows: Vec<Conversation> = self
            .conversations
            .lock()
            .values()
            .filter(|(owner, _)| owner == user_id)
            .map(|(_, c)| c.clone())
            .collect();
        rows.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
        Ok(rows.into_iter().skip(offset).take(limit).collect())
    }

    async fn push(&self, conversation: &Conversation, user_id: &str) -> Result<()> {
        self.pushes.lock().push(conversation.id.clone());
        if self.fail_pushes.load(Ordering::SeqCst) {
            bail!("push failed");
        }
        let mut stored = conversation.clone();
        stored.messages.retain(|m| !m.is_streaming);
        self.insert(user_id, stored);
        Ok(())
    }

    async fn delete(&self, id: &ConversationId, user_id: &str) -> Result<()> {
        self.deletes.lock().push(id.clone());
        let mut conversations = self.conversations.lock();
        if conversations.get(id).is_some_and(|(owner, _)| owner == user_id) {
            conversations.remove(id);
        }
        Ok(())
    }
}

#[async_trait]
impl SettingsRemote for MemoryRemote {
    async fn fetch(&self, user_id: &str) -> Result<Option<SettingsRecord>> {
        if self.fail_fetches.load(Ordering::SeqCst) {
            bail!("fetch failed");
        }
        Ok(self.settings(user_id))
    }

    async fn upsert(&self, user_id: &str, record: &SettingsRecord) -> Result<()> {
        self.settings_upserts.fetch_add(1, Ordering::SeqCst);
        self.set_settings(user_id, record.clone());
        Ok(())
    }
}

/// Object storage that records uploads.
#[derive(Default)]
pub struct RecordingStorage {
    uploads: Mutex<Vec<(String, usize, String)>>,
    removed: Mutex<Vec<String>>,
    fail: AtomicBool,
}

impl RecordingStorage {
    pub const BASE_URL: &'static str = "https://storage.test/public";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let storage = Self::default();
        storage.fail.store(true, Ordering::SeqCst);
        storage
    }

    /// `(path, size, content type)` per upload.
    pub fn uploads(&self) -> Vec<(String, usize, String)> {
        self.uploads.lock().clone()
    }

    pub fn removed(&self) -> Vec<String> {
        self.removed.lock().clone()
    }
}

#[async_trait]
impl ObjectStorage for RecordingStorage {
    async fn upload(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<String> {
        if self.fail.load(Ordering::SeqCst) {
            bail!("upload failed");
        }
        self.uploads
            .lock()
            .push((path.to_string(), bytes.len(), content_type.to_string()));
        Ok(format!("{}/{}", Self::BASE_URL, path))
    }

    async fn remove(&self, path: &str) -> Result<()> {
        self.removed.lock().push(path.to_string());
        Ok(())
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(now: i64) -> Self {
        Self {
            now: AtomicI64::new(now),
        }
    }

    pub fn advance(&self, millis: i64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }

    pub fn set(&self, now: i64) {
        self.now.store(now, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Hands out the same model for every credential and records each request.
pub struct FixedServices {
    model: Arc<dyn ChatModel>,
    images: Option<ImageResolver>,
    requested: Mutex<Vec<(String, String)>>,
}

impl FixedServices {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self {
            model,
            images: None,
            requested: Mutex::new(Vec::new()),
        }
    }

    pub fn with_images(mut self, images: ImageResolver) -> Self {
        self.images = Some(images);
        self
    }

    /// `(api key, model)` per chat model built.
    pub fn requested(&self) -> Vec<(String, String)> {
        self.requested.lock().clone()
    }
}

impl ServiceFactory for FixedServices {
    fn chat_model(&self, api_key: &str, model: &str) -> Result<Arc<dyn ChatModel>, LlmError> {
        self.requested
            .lock()
            .push((api_key.to_string(), model.to_string()));
        Ok(Arc::clone(&self.model))
    }

    fn image_resolver(&self, _settings: &Settings) -> Option<ImageResolver> {
        self.images.clone()
    }
}

//! The send-message state machine
//!
//! optimistic insert -> (image branch | chat branch) -> commit | roll back

use futures::StreamExt;
use llm::{CancelHandle, ChatModel, ChatRequest, LlmError};
use std::sync::Arc;

use super::turn::PendingTurn;
use super::{ActiveTurn, ChatParams, ConversationStore, StoreEvent};
use crate::error::SendError;
use crate::image::{ImageResolver, extract_image_prompt, is_image_generation_request};
use crate::remote::ObjectStorage;
use crate::storage::{Attachment, AttachmentId, Conversation, ConversationId, Message, MessageId, SyncStatus};
use crate::validity::{to_chat_messages, valid_context};

pub(crate) const GENERATING_IMAGE: &str = "Generating image…";
pub(crate) const UPLOADING_IMAGE: &str = "Uploading image…";

/// Ids of a committed turn.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SendOutcome {
    pub conversation_id: ConversationId,
    pub user_message_id: MessageId,
    pub assistant_message_id: MessageId,
}

enum Branch {
    Chat(Arc<dyn ChatModel>, ChatParams),
    Image(ImageResolver),
}

impl ConversationStore {
    /// Send `text` in the active conversation, creating one if needed.
    ///
    /// Returns once the reply is complete. On failure the conversation is
    /// left as it was before the call and the error slot is set.
    pub async fn send_message(
        &self,
        text: &str,
        attachments: Vec<Attachment>,
    ) -> Result<SendOutcome, SendError> {
        let result = self.run_send(text, attachments).await;
        if let Err(e) = &result {
            match e.notice() {
                Some(notice) => {
                    tracing::warn!("Send failed: {}", e);
                    self.show_error(notice);
                }
                None => tracing::debug!("Send ended without a reply: {}", e),
            }
        }
        result
    }

    async fn run_send(
        &self,
        text: &str,
        attachments: Vec<Attachment>,
    ) -> Result<SendOutcome, SendError> {
        let text = text.trim();
        if text.is_empty() && attachments.is_empty() {
            return Err(SendError::EmptyMessage);
        }

        let branch = self.choose_branch(text)?;
        let turn = self.begin_turn(text, attachments.clone())?;
        self.upload_attachments(&turn, attachments);

        let result = match branch {
            Branch::Chat(model, params) => self.stream_reply(&turn, model, params).await,
            Branch::Image(resolver) => self.generate_image(&turn, &resolver, text).await,
        };

        match result {
            Ok(()) => {
                if self.commit_turn(&turn) {
                    self.maybe_generate_title(&turn.conversation_id);
                }
                Ok(SendOutcome {
                    conversation_id: turn.conversation_id,
                    user_message_id: turn.user_message_id,
                    assistant_message_id: turn.placeholder_id,
                })
            }
            Err(e) => {
                self.roll_back_turn(&turn);
                Err(e)
            }
        }
    }

    fn choose_branch(&self, text: &str) -> Result<Branch, SendError> {
        let state = self.inner.state.lock();
        if state.image_generation && is_image_generation_request(text) {
            if let Some(resolver) = &state.images {
                return Ok(Branch::Image(resolver.clone()));
            }
        }
        match &state.chat_model {
            Some(model) => Ok(Branch::Chat(Arc::clone(model), state.params.clone())),
            None => Err(SendError::MissingCredential),
        }
    }

    /// Insert the user message and an empty streaming placeholder.
    fn begin_turn(&self, text: &str, attachments: Vec<Attachment>) -> Result<PendingTurn, SendError> {
        let now = self.now();
        let mut state = self.inner.state.lock();

        let existing = state
            .active
            .clone()
            .filter(|id| state.find(id).is_some());
        let (conversation_id, created) = match existing {
            Some(id) => (id, false),
            None => {
                let conversation =
                    Conversation::new(state.params.model.clone(), state.user_id.clone(), now);
                let id = conversation.id.clone();
                state.conversations.push(conversation);
                state.active = Some(id.clone());
                (id, true)
            }
        };

        if state.turns.contains_key(&conversation_id) {
            return Err(SendError::AlreadyStreaming);
        }

        let Some(conversation) = state.find_mut(&conversation_id) else {
            return Err(SendError::Cancelled);
        };
        let user_message = Message::user(text, conversation.next_timestamp(now)).with_attachments(attachments);
        let placeholder = Message::placeholder(user_message.timestamp + 1);
        let turn = PendingTurn::new(conversation, user_message.id.clone(), placeholder.id.clone(), created);

        conversation.messages.push(user_message.clone());
        conversation.messages.push(placeholder.clone());
        conversation.touch(placeholder.timestamp.max(conversation.updated_at));
        conversation.sync_status = SyncStatus::Pending;

        state.turns.insert(
            conversation_id.clone(),
            ActiveTurn {
                turn: turn.clone(),
                cancel: None,
                cancelled: false,
            },
        );
        drop(state);

        if created {
            self.inner.emit(StoreEvent::ConversationCreated(conversation_id.clone()));
        }
        self.inner.emit(StoreEvent::MessageAdded {
            conversation_id: conversation_id.clone(),
            message: user_message,
        });
        self.inner.emit(StoreEvent::MessageAdded {
            conversation_id,
            message: placeholder,
        });
        self.schedule_save();
        Ok(turn)
    }

    async fn stream_reply(
        &self,
        turn: &PendingTurn,
        model: Arc<dyn ChatModel>,
        params: ChatParams,
    ) -> Result<(), SendError> {
        let request = {
            let state = self.inner.state.lock();
            let conversation = state.find(&turn.conversation_id).ok_or(SendError::Cancelled)?;
            let context = valid_context(&conversation.messages, Some(&turn.placeholder_id));
            let messages = to_chat_messages(&context);
            ChatRequest::new(&messages)
                .with_temperature(params.temperature)
                .with_max_tokens(params.max_tokens)
        };

        tracing::debug!(
            conversation = %turn.conversation_id,
            model = model.name(),
            messages = request.messages.len(),
            "Streaming reply"
        );

        let mut stream = match model.stream_chat(&request).await {
            Ok(stream) => stream,
            Err(_) if self.is_turn_cancelled(turn) => return Err(SendError::Cancelled),
            Err(e) => return Err(SendError::Provider(e)),
        };
        if !self.attach_cancel_handle(turn, stream.cancel_handle()) {
            return Err(SendError::Cancelled);
        }

        while let Some(item) = stream.next().await {
            match item {
                Ok(fragment) => {
                    if !self.append_to_placeholder(turn, &fragment) {
                        break;
                    }
                }
                Err(_) if self.is_turn_cancelled(turn) => return Err(SendError::Cancelled),
                Err(e) => return Err(SendError::Provider(e)),
            }
        }

        if self.is_turn_cancelled(turn) {
            return Err(SendError::Cancelled);
        }
        if self.placeholder_is_empty(turn) {
            return Err(SendError::Provider(LlmError::UnexpectedResponse(
                "the model returned an empty response".to_string(),
            )));
        }
        Ok(())
    }

    async fn generate_image(
        &self,
        turn: &PendingTurn,
        resolver: &ImageResolver,
        text: &str,
    ) -> Result<(), SendError> {
        self.set_placeholder_content(turn, GENERATING_IMAGE);
        let prompt = extract_image_prompt(text);
        tracing::debug!(conversation = %turn.conversation_id, prompt = %prompt, "Generating image");

        let generated = resolver.generate(&prompt).await;
        if self.is_turn_cancelled(turn) {
            return Err(SendError::Cancelled);
        }
        let image = generated.map_err(SendError::Image)?;

        let url = match self.inner.storage.clone() {
            Some(storage) => {
                self.set_placeholder_content(turn, UPLOADING_IMAGE);
                self.copy_image_to_storage(storage.as_ref(), turn, &image.url).await
            }
            None => image.url.clone(),
        };
        if self.is_turn_cancelled(turn) {
            return Err(SendError::Cancelled);
        }

        let content = match image.revised_prompt.as_deref() {
            Some(revised) if !revised.trim().is_empty() => format!("Here's your image: {}", revised.trim()),
            _ => format!("Here's your image of {prompt}."),
        };
        let attachment = Attachment::image(url, "generated-image.png", "image/png");
        self.update_placeholder(turn, |message| {
            message.content = content;
            message.attachments = vec![attachment];
        });
        Ok(())
    }

    /// Copy a generated image into our bucket; the provider URL is kept if
    /// that fails.
    async fn copy_image_to_storage(
        &self,
        storage: &dyn ObjectStorage,
        turn: &PendingTurn,
        url: &str,
    ) -> String {
        let owner = self.user_id().unwrap_or_else(|| "anonymous".to_string());
        let path = format!(
            "{}/{}/{}/generated-{}.png",
            owner,
            turn.conversation_id,
            turn.placeholder_id,
            AttachmentId::new()
        );

        let result: anyhow::Result<String> = async {
            let response = self.inner.http.get(url).send().await?.error_for_status()?;
            let content_type = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("image/png")
                .to_string();
            let bytes = response.bytes().await?;
            storage.upload(&path, bytes.to_vec(), &content_type).await
        }
        .await;

        match result {
            Ok(stored) => stored,
            Err(e) => {
                tracing::warn!("Keeping provider image URL, upload failed: {:#}", e);
                url.to_string()
            }
        }
    }

    fn is_turn_cancelled(&self, turn: &PendingTurn) -> bool {
        let state = self.inner.state.lock();
        match state.turns.get(&turn.conversation_id) {
            Some(active) if active.turn.placeholder_id == turn.placeholder_id => active.cancelled,
            _ => true,
        }
    }

    fn attach_cancel_handle(&self, turn: &PendingTurn, handle: CancelHandle) -> bool {
        let mut state = self.inner.state.lock();
        match state.turns.get_mut(&turn.conversation_id) {
            Some(active) if active.turn.placeholder_id == turn.placeholder_id && !active.cancelled => {
                active.cancel = Some(handle);
                true
            }
            _ => {
                handle.cancel();
                false
            }
        }
    }

    fn update_placeholder(&self, turn: &PendingTurn, update: impl FnOnce(&mut Message)) -> bool {
        let now = self.now();
        let mut state = self.inner.state.lock();
        let live = state
            .turns
            .get(&turn.conversation_id)
            .is_some_and(|a| a.turn.placeholder_id == turn.placeholder_id && !a.cancelled);
        if !live {
            return false;
        }
        let Some(conversation) = state.find_mut(&turn.conversation_id) else {
            return false;
        };
        let updated_at = now.max(conversation.updated_at);
        let Some(message) = conversation.message_mut(&turn.placeholder_id) else {
            return false;
        };
        update(message);
        let message = message.clone();
        conversation.touch(updated_at);
        drop(state);

        self.inner.emit(StoreEvent::MessageUpdated {
            conversation_id: turn.conversation_id.clone(),
            message,
        });
        true
    }

    fn append_to_placeholder(&self, turn: &PendingTurn, fragment: &str) -> bool {
        self.update_placeholder(turn, |message| message.content.push_str(fragment))
    }

    fn set_placeholder_content(&self, turn: &PendingTurn, content: &str) -> bool {
        self.update_placeholder(turn, |message| message.content = content.to_string())
    }

    fn placeholder_is_empty(&self, turn: &PendingTurn) -> bool {
        let state = self.inner.state.lock();
        state
            .find(&turn.conversation_id)
            .and_then(|c| c.message(&turn.placeholder_id))
            .is_none_or(|m| m.content.trim().is_empty())
    }

    /// Remove the turn from the in-flight table if it is still the one
    /// recorded for its conversation.
    fn take_active(state: &mut super::State, turn: &PendingTurn) -> Option<ActiveTurn> {
        let matches = state
            .turns
            .get(&turn.conversation_id)
            .is_some_and(|a| a.turn.placeholder_id == turn.placeholder_id);
        if matches {
            state.turns.remove(&turn.conversation_id)
        } else {
            None
        }
    }

    fn commit_turn(&self, turn: &PendingTurn) -> bool {
        let now = self.now();
        let mut state = self.inner.state.lock();
        let Some(mut active) = Self::take_active(&mut state, turn) else {
            return false;
        };
        let Some(conversation) = state.find_mut(&turn.conversation_id) else {
            return false;
        };
        if !active.turn.commit() {
            return false;
        }
        let updated_at = now.max(conversation.updated_at);
        let Some(message) = conversation.message_mut(&turn.placeholder_id) else {
            return false;
        };
        message.is_streaming = false;
        let message = message.clone();
        conversation.touch(updated_at);
        conversation.sync_status = SyncStatus::Pending;
        drop(state);

        tracing::debug!(conversation = %turn.conversation_id, chars = message.content.len(), "Reply complete");
        self.inner.emit(StoreEvent::MessageUpdated {
            conversation_id: turn.conversation_id.clone(),
            message,
        });
        self.inner.emit(StoreEvent::StreamFinished {
            conversation_id: turn.conversation_id.clone(),
            message_id: turn.placeholder_id.clone(),
        });
        self.inner.emit(StoreEvent::SyncRequested(turn.conversation_id.clone()));
        self.schedule_save();
        true
    }

    /// Undo the turn. A conversation that was created for it and has not
    /// been touched otherwise is removed again.
    fn roll_back_turn(&self, turn: &PendingTurn) -> bool {
        let now = self.now();
        let mut state = self.inner.state.lock();
        let Some(mut active) = Self::take_active(&mut state, turn) else {
            return false;
        };
        let Some(conversation) = state.find_mut(&turn.conversation_id) else {
            return false;
        };
        if !active.turn.roll_back(conversation, now) {
            return false;
        }
        let discard = active.turn.created_conversation
            && !active.turn.changed_elsewhere()
            && conversation.messages.is_empty();
        if discard {
            state.conversations.retain(|c| c.id != turn.conversation_id);
            if state.active.as_ref() == Some(&turn.conversation_id) {
                state.active = None;
            }
        }
        drop(state);

        tracing::debug!(conversation = %turn.conversation_id, discard, "Rolled back turn");
        self.inner.emit(StoreEvent::TurnRolledBack {
            conversation_id: turn.conversation_id.clone(),
            user_message_id: turn.user_message_id.clone(),
        });
        if discard {
            self.inner.emit(StoreEvent::ConversationDeleted {
                id: turn.conversation_id.clone(),
                user_id: None,
            });
        }
        self.schedule_save();
        true
    }
}

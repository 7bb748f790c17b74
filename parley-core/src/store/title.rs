use llm::{ChatMessage, ChatModel, ChatRequest, LlmError};
use std::sync::Arc;

use super::ConversationStore;
use crate::storage::{ConversationId, MessageRole};

const MAX_TITLE_CHARS: usize = 60;
const TITLE_INSTRUCTION: &str = "Write a short title (at most six words) for a conversation that starts with the exchange below. Reply with the title only, without quotes.";
const TITLE_MAX_TOKENS: u32 = 24;

/// First line, surrounding quotes and trailing period removed, capped at
/// 60 characters.
pub(crate) fn clean_title(raw: &str) -> Option<String> {
    let line = raw.lines().map(str::trim).find(|l| !l.is_empty())?;
    let line = line.strip_prefix("Title:").unwrap_or(line).trim();
    let line = line
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '“' | '”' | '*' | '#'))
        .trim()
        .trim_end_matches('.')
        .trim();
    if line.is_empty() {
        return None;
    }
    if line.chars().count() <= MAX_TITLE_CHARS {
        return Some(line.to_string());
    }
    let truncated: String = line.chars().take(MAX_TITLE_CHARS - 3).collect();
    Some(format!("{}...", truncated.trim_end()))
}

async fn generate_title(
    model: &dyn ChatModel,
    question: &str,
    answer: &str,
) -> Result<Option<String>, LlmError> {
    let messages = [
        ChatMessage::system(TITLE_INSTRUCTION),
        ChatMessage::user(format!("User: {question}\n\nAssistant: {answer}")),
    ];
    let request = ChatRequest::new(&messages).with_max_tokens(TITLE_MAX_TOKENS);
    let reply = model.chat(&request).await?;
    Ok(clean_title(&reply.get_text()))
}

impl ConversationStore {
    /// Title a conversation after its first exchange, in the background.
    /// Failures leave the default title.
    pub(super) fn maybe_generate_title(&self, id: &ConversationId) {
        let (model, question, answer) = {
            let state = self.inner.state.lock();
            if !state.auto_title {
                return;
            }
            let Some(model) = state.chat_model.clone() else {
                return;
            };
            let Some(conversation) = state.find(id) else {
                return;
            };
            if !conversation.has_default_title() {
                return;
            }
            let replies = conversation.messages.iter().filter(|m| m.is_completed_reply()).count();
            if replies != 1 {
                return;
            }
            let question = conversation
                .messages
                .iter()
                .find(|m| m.role == MessageRole::User)
                .map(|m| m.content.clone())
                .unwrap_or_default();
            let answer = conversation
                .messages
                .iter()
                .find(|m| m.is_completed_reply())
                .map(|m| m.content.clone())
                .unwrap_or_default();
            (model, question, answer)
        };

        let store = self.clone();
        let id = id.clone();
        tokio::spawn(async move {
            store.title_from_model(&id, model, &question, &answer).await;
        });
    }

    async fn title_from_model(
        &self,
        id: &ConversationId,
        model: Arc<dyn ChatModel>,
        question: &str,
        answer: &str,
    ) {
        match generate_title(model.as_ref(), question, answer).await {
            Ok(Some(title)) => {
                if self.apply_title(id, &title, true) {
                    tracing::debug!(conversation = %id, title = %title, "Generated title");
                }
            }
            Ok(None) => tracing::debug!(conversation = %id, "Model returned an empty title"),
            Err(e) => tracing::warn!(conversation = %id, "Title generation failed: {}", e),
        }
    }
}

use async_trait::async_trait;
use std::sync::Arc;

pub mod api;
mod client;
pub mod error;
pub mod providers;
pub mod stream;
pub mod traffic_log;

pub use api::*;
pub use error::LlmError;
pub use stream::{CancelHandle, CompletionStream, Frame, SseLineDecoder};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelDefinition {
    pub id: String,
    pub display_name: Option<String>,
}

impl ModelDefinition {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: None,
        }
    }

    /// Get the display name, falling back to id if not set
    pub fn name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.id)
    }
}

/// A chat-completion model.
///
/// `stream_chat` returns as soon as the response headers arrive; fragments
/// are pulled from the returned [`CompletionStream`].
#[async_trait]
pub trait ChatModel: Send + Sync {
    fn name(&self) -> &str;

    /// Buffered completion, used for short side-tasks.
    async fn chat(&self, request: &ChatRequest) -> Result<ChatMessage, LlmError>;

    async fn stream_chat(&self, request: &ChatRequest) -> Result<CompletionStream, LlmError>;
}

#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// List available models from the provider
    async fn list_models(&self) -> Result<Vec<ModelDefinition>, LlmError>;

    /// Create a chat model by name, returned as Arc for sharing across tasks
    fn create_chat_model(&self, model_name: &str) -> Arc<dyn ChatModel>;
}

/// Result of an image generation call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GeneratedImage {
    /// Where the image can be fetched from
    pub url: String,
    /// Prompt as rewritten by the provider, if it does that
    pub revised_prompt: Option<String>,
}

#[async_trait]
pub trait ImageProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, prompt: &str) -> Result<GeneratedImage, LlmError>;
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize `text` with the given voice, returning encoded audio (mp3).
    async fn synthesize(&self, text: &str, voice_id: &str) -> Result<Vec<u8>, LlmError>;
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(
        &self,
        audio: Vec<u8>,
        file_name: &str,
        mime_type: &str,
    ) -> Result<String, LlmError>;
}

use config::Settings;
use llm::providers::OpenAIProvider;
use llm::{ChatModel, LlmError, ModelProvider};
use std::sync::Arc;

use crate::image::ImageResolver;

/// Builds provider clients from settings.
///
/// The store rebuilds its chat model through this whenever the credential or
/// model changes, so tests can swap in fixtures.
pub trait ServiceFactory: Send + Sync {
    fn chat_model(&self, api_key: &str, model: &str) -> Result<Arc<dyn ChatModel>, LlmError>;

    fn image_resolver(&self, settings: &Settings) -> Option<ImageResolver>;
}

/// OpenRouter for chat, Pollinations/DALL-E for images.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostedServices;

impl ServiceFactory for HostedServices {
    fn chat_model(&self, api_key: &str, model: &str) -> Result<Arc<dyn ChatModel>, LlmError> {
        let provider = OpenAIProvider::open_router(api_key)?;
        Ok(provider.create_chat_model(model))
    }

    fn image_resolver(&self, settings: &Settings) -> Option<ImageResolver> {
        Some(ImageResolver::from_settings(settings))
    }
}

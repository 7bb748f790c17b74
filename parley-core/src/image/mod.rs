//! Image generation from chat input
//!
//! `request` decides whether a message asks for an image and pulls the
//! subject out of it; `ImageResolver` runs the provider chain.

mod request;

pub use request::{extract_image_prompt, is_image_generation_request};

use config::{Provider, Settings};
use llm::providers::{OpenAIProvider, PollinationsImageModel};
use llm::{GeneratedImage, ImageProvider, LlmError};
use std::sync::Arc;

/// Primary provider with an optional credentialed fallback.
#[derive(Clone)]
pub struct ImageResolver {
    primary: Arc<dyn ImageProvider>,
    fallback: Option<Arc<dyn ImageProvider>>,
}

impl ImageResolver {
    pub fn new(primary: Arc<dyn ImageProvider>) -> Self {
        Self {
            primary,
            fallback: None,
        }
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn ImageProvider>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Pollinations first, DALL-E when an OpenAI key is configured.
    pub fn from_settings(settings: &Settings) -> Self {
        let resolver = Self::new(Arc::new(PollinationsImageModel::default()));
        let Some(key) = settings.get_api_key(Provider::OpenAi) else {
            return resolver;
        };
        match OpenAIProvider::openai(&key) {
            Ok(provider) => resolver.with_fallback(Arc::new(provider.image_model())),
            Err(e) => {
                tracing::warn!("OpenAI image fallback unavailable: {}", e);
                resolver
            }
        }
    }

    pub fn has_fallback(&self) -> bool {
        self.fallback.is_some()
    }

    pub async fn generate(&self, prompt: &str) -> Result<GeneratedImage, LlmError> {
        let primary_error = match self.primary.generate(prompt).await {
            Ok(image) => return Ok(image),
            Err(e) => e,
        };

        let Some(fallback) = &self.fallback else {
            return Err(primary_error);
        };

        tracing::warn!(
            primary = self.primary.name(),
            fallback = fallback.name(),
            "Primary image provider failed, falling back: {}",
            primary_error
        );
        fallback.generate(prompt).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StaticImageProvider;

    #[tokio::test]
    async fn test_primary_success_skips_fallback() {
        let primary = Arc::new(StaticImageProvider::ok("primary", "https://img/1.png"));
        let fallback = Arc::new(StaticImageProvider::ok("fallback", "https://img/2.png"));
        let resolver = ImageResolver::new(primary.clone()).with_fallback(fallback.clone());

        let image = resolver.generate("a cat").await.unwrap();
        assert_eq!(image.url, "https://img/1.png");
        assert_eq!(fallback.calls(), 0);
        assert_eq!(primary.prompts(), vec!["a cat"]);
    }

    #[tokio::test]
    async fn test_falls_back_on_primary_failure() {
        let primary = Arc::new(StaticImageProvider::failing("primary"));
        let fallback = Arc::new(
            StaticImageProvider::ok("fallback", "https://img/2.png").with_revised_prompt("A cat, vivid"),
        );
        let resolver = ImageResolver::new(primary).with_fallback(fallback.clone());

        let image = resolver.generate("a cat").await.unwrap();
        assert_eq!(image.url, "https://img/2.png");
        assert_eq!(image.revised_prompt.as_deref(), Some("A cat, vivid"));
        assert_eq!(fallback.calls(), 1);
    }

    #[tokio::test]
    async fn test_primary_error_without_fallback() {
        let resolver = ImageResolver::new(Arc::new(StaticImageProvider::failing("primary")));
        assert!(!resolver.has_fallback());
        let err = resolver.generate("a cat").await.unwrap_err();
        assert!(matches!(err, LlmError::UnexpectedResponse(_)));
    }

    #[test]
    fn test_from_settings_without_openai_key() {
        let settings = Settings::default();
        assert!(!ImageResolver::from_settings(&settings).has_fallback());
    }
}

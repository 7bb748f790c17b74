use crate::client::Client;
use crate::error::LlmError;
use crate::{ChatModel, ModelDefinition, ModelProvider};
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use std::sync::Arc;

use super::chat::OpenAIChatModel;
use super::chat::api::ListModelsResponse;
use super::images::OpenAIImageModel;
use super::transcription::OpenAITranscriber;

pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

const OPENROUTER_CREDITS_URL: &str = "https://openrouter.ai/settings/credits";
const OPENAI_BILLING_URL: &str = "https://platform.openai.com/settings/organization/billing";

/// Any OpenAI-compatible endpoint. The base URL includes the version path.
#[derive(Clone)]
pub struct OpenAIProvider {
    client: Client,
    base_url: String,
}

impl OpenAIProvider {
    pub fn open_router(api_key: &str) -> Result<Self, LlmError> {
        let extra = [
            (HeaderName::from_static("http-referer"), HeaderValue::from_static("https://parley.app")),
            (HeaderName::from_static("x-title"), HeaderValue::from_static("Parley")),
        ];
        Self::build(OPENROUTER_BASE_URL, api_key, "OpenRouter", &extra)
            .map(|p| p.with_upgrade_url(OPENROUTER_CREDITS_URL))
    }

    pub fn openai(api_key: &str) -> Result<Self, LlmError> {
        Self::build(OPENAI_BASE_URL, api_key, "OpenAI", &[])
            .map(|p| p.with_upgrade_url(OPENAI_BILLING_URL))
    }

    /// Create a provider with a custom base URL (e.g., for proxying).
    pub fn new(base_url: &str, api_key: &str) -> Result<Self, LlmError> {
        Self::build(base_url, api_key, "OpenAI-compatible endpoint", &[])
    }

    fn build(
        base_url: &str,
        api_key: &str,
        label: &'static str,
        extra_headers: &[(HeaderName, HeaderValue)],
    ) -> Result<Self, LlmError> {
        let api_key = api_key.trim();
        if api_key.is_empty() {
            return Err(LlmError::MissingApiKey(label));
        }

        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", api_key))
                .map_err(|_| LlmError::InvalidApiKey)?,
        );
        for (name, value) in extra_headers {
            headers.insert(name.clone(), value.clone());
        }

        Ok(OpenAIProvider {
            client: Client::with_headers(headers)?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn with_upgrade_url(mut self, url: &str) -> Self {
        self.client = self.client.with_upgrade_url(url);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn models_url(&self) -> String {
        format!("{}/models", self.base_url)
    }

    pub fn chat_model(&self, model_name: &str) -> OpenAIChatModel {
        OpenAIChatModel::new(
            self.client.clone(),
            self.base_url.clone(),
            model_name.to_string(),
        )
    }

    /// DALL-E 3 on this endpoint.
    pub fn image_model(&self) -> OpenAIImageModel {
        OpenAIImageModel::new(self.client.clone(), self.base_url.clone())
    }

    /// Whisper on this endpoint.
    pub fn transcriber(&self) -> OpenAITranscriber {
        OpenAITranscriber::new(self.client.clone(), self.base_url.clone())
    }
}

#[async_trait]
impl ModelProvider for OpenAIProvider {
    async fn list_models(&self) -> Result<Vec<ModelDefinition>, LlmError> {
        let response: ListModelsResponse = self.client.get(self.models_url()).await?;
        Ok(response.data.into_iter().map(|m| m.into()).collect())
    }

    fn create_chat_model(&self, model_name: &str) -> Arc<dyn ChatModel> {
        Arc::new(self.chat_model(model_name))
    }
}

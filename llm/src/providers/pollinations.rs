use crate::client::Client;
use crate::error::LlmError;
use crate::{GeneratedImage, ImageProvider, traffic_log};
use async_trait::async_trait;
use rand::Rng;
use reqwest::header::CONTENT_TYPE;

pub const POLLINATIONS_BASE_URL: &str = "https://image.pollinations.ai";
const IMAGE_SIZE: u32 = 1024;

/// Free image generation, no credential needed.
///
/// The image is rendered on request, so the probed URL doubles as the
/// image's permanent location.
#[derive(Clone)]
pub struct PollinationsImageModel {
    client: Client,
    base_url: String,
}

impl Default for PollinationsImageModel {
    fn default() -> Self {
        Self::new(POLLINATIONS_BASE_URL)
    }
}

impl PollinationsImageModel {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn image_url(&self, prompt: &str, seed: u32) -> String {
        format!(
            "{}/prompt/{}?width={IMAGE_SIZE}&height={IMAGE_SIZE}&seed={seed}&nologo=true",
            self.base_url,
            urlencoding::encode(prompt)
        )
    }
}

#[async_trait]
impl ImageProvider for PollinationsImageModel {
    fn name(&self) -> &str {
        "pollinations"
    }

    async fn generate(&self, prompt: &str) -> Result<GeneratedImage, LlmError> {
        let seed = rand::rng().random_range(0..1_000_000);
        let url = self.image_url(prompt, seed);
        tracing::debug!(target: "llm::traffic", model = "pollinations", "REQUEST {}", url);

        let response = self
            .client
            .get_response(url.as_str())
            .await
            .inspect_err(|e| traffic_log::log_error("pollinations", &e.to_string()))?;

        // Some failures come back as an HTML or JSON page with status 200
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if !content_type.starts_with("image/") {
            let message = format!("expected image content, got '{content_type}'");
            traffic_log::log_error("pollinations", &message);
            return Err(LlmError::UnexpectedResponse(message));
        }

        Ok(GeneratedImage {
            url,
            revised_prompt: None,
        })
    }
}

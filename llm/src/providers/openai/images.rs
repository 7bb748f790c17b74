use crate::client::Client;
use crate::error::LlmError;
use crate::{GeneratedImage, ImageProvider, traffic_log};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

const IMAGE_MODEL: &str = "dall-e-3";

#[derive(Clone, Debug, Serialize)]
pub struct ImageGenerationRequest<'a> {
    pub model: &'a str,
    pub prompt: &'a str,
    pub n: u32,
    pub size: &'a str,
    pub quality: &'a str,
    pub style: &'a str,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ImageData {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub revised_prompt: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ImageGenerationResponse {
    pub data: Vec<ImageData>,
}

/// Credentialed image generation through `/images/generations`.
#[derive(Clone)]
pub struct OpenAIImageModel {
    client: Client,
    base_url: String,
}

impl OpenAIImageModel {
    pub(crate) fn new(client: Client, base_url: String) -> Self {
        Self { client, base_url }
    }
}

#[async_trait]
impl ImageProvider for OpenAIImageModel {
    fn name(&self) -> &str {
        IMAGE_MODEL
    }

    async fn generate(&self, prompt: &str) -> Result<GeneratedImage, LlmError> {
        let request = ImageGenerationRequest {
            model: IMAGE_MODEL,
            prompt,
            n: 1,
            size: "1024x1024",
            quality: "standard",
            style: "vivid",
        };
        traffic_log::log_request(IMAGE_MODEL, &request);

        let response: ImageGenerationResponse = self
            .client
            .post(format!("{}/images/generations", self.base_url), &request)
            .await
            .inspect_err(|e| traffic_log::log_error(IMAGE_MODEL, &e.to_string()))?;
        traffic_log::log_response(IMAGE_MODEL, &response);

        let image = response
            .data
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::UnexpectedResponse("no image in response".to_string()))?;
        let url = image
            .url
            .ok_or_else(|| LlmError::UnexpectedResponse("image has no url".to_string()))?;

        Ok(GeneratedImage {
            url,
            revised_prompt: image.revised_prompt,
        })
    }
}

use crate::api::{ChatMessage, ChatRequest};
use crate::client::Client;
use crate::error::LlmError;
use crate::stream::{CompletionStream, Frame};
use crate::{ChatModel, traffic_log};
use async_trait::async_trait;
use serde_json::Value;

use super::api::{ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse};

#[derive(Clone)]
pub struct OpenAIChatModel {
    client: Client,
    base_url: String,
    model_name: String,
}

impl OpenAIChatModel {
    pub(crate) fn new(client: Client, base_url: String, model_name: String) -> Self {
        OpenAIChatModel {
            client,
            base_url,
            model_name,
        }
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

/// Turn one `data:` payload into a fragment.
fn parse_chunk(data: &str, upgrade_url: Option<&str>) -> Frame {
    let value: Value = match serde_json::from_str(data) {
        Ok(value) => value,
        Err(e) => {
            tracing::debug!("Skipping malformed stream frame: {}", e);
            return Frame::Skip;
        }
    };

    // OpenRouter reports upstream failures as an error frame with status 200
    if let Some(error) = value.get("error") {
        return Frame::Error(LlmError::from_error_value(error, upgrade_url));
    }

    match serde_json::from_value::<ChatCompletionChunk>(value) {
        Ok(chunk) => chunk
            .text()
            .map(|text| Frame::Text(text.to_string()))
            .unwrap_or(Frame::Skip),
        Err(e) => {
            tracing::debug!("Skipping unrecognised stream frame: {}", e);
            Frame::Skip
        }
    }
}

#[async_trait]
impl ChatModel for OpenAIChatModel {
    fn name(&self) -> &str {
        &self.model_name
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatMessage, LlmError> {
        let openai_request =
            ChatCompletionRequest::from_request(self.model_name.clone(), request, false);
        traffic_log::log_request(&self.model_name, &openai_request);

        let response: ChatCompletionResponse = self
            .client
            .post(self.chat_url(), &openai_request)
            .await
            .inspect_err(|e| traffic_log::log_error(&self.model_name, &e.to_string()))?;
        traffic_log::log_response(&self.model_name, &response);

        response.into_message()
    }

    async fn stream_chat(&self, request: &ChatRequest) -> Result<CompletionStream, LlmError> {
        let openai_request =
            ChatCompletionRequest::from_request(self.model_name.clone(), request, true);
        traffic_log::log_stream_start(&self.model_name, &openai_request);

        let response = self
            .client
            .post_stream(self.chat_url(), &openai_request)
            .await
            .inspect_err(|e| traffic_log::log_error(&self.model_name, &e.to_string()))?;

        let upgrade_url = self.client.upgrade_url().map(str::to_string);
        Ok(CompletionStream::from_sse(
            response.bytes_stream(),
            move |data| parse_chunk(data, upgrade_url.as_deref()),
        ))
    }
}

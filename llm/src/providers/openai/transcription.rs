use crate::client::Client;
use crate::error::LlmError;
use crate::{Transcriber, traffic_log};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;

const TRANSCRIPTION_MODEL: &str = "whisper-1";

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// Speech-to-text through `/audio/transcriptions`.
#[derive(Clone)]
pub struct OpenAITranscriber {
    client: Client,
    base_url: String,
}

impl OpenAITranscriber {
    pub(crate) fn new(client: Client, base_url: String) -> Self {
        Self { client, base_url }
    }
}

#[async_trait]
impl Transcriber for OpenAITranscriber {
    async fn transcribe(
        &self,
        audio: Vec<u8>,
        file_name: &str,
        mime_type: &str,
    ) -> Result<String, LlmError> {
        if audio.is_empty() {
            return Err(LlmError::UnexpectedResponse("no audio recorded".to_string()));
        }
        tracing::debug!(
            target: "llm::traffic",
            model = TRANSCRIPTION_MODEL,
            bytes = audio.len(),
            "REQUEST transcription"
        );

        let file = Part::bytes(audio)
            .file_name(file_name.to_string())
            .mime_str(mime_type)?;
        let form = Form::new()
            .part("file", file)
            .text("model", TRANSCRIPTION_MODEL);

        let response: TranscriptionResponse = self
            .client
            .post_multipart(format!("{}/audio/transcriptions", self.base_url), form)
            .await
            .inspect_err(|e| traffic_log::log_error(TRANSCRIPTION_MODEL, &e.to_string()))?;

        Ok(response.text.trim().to_string())
    }
}

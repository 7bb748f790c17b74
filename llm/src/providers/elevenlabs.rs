use crate::client::Client;
use crate::error::LlmError;
use crate::{SpeechSynthesizer, traffic_log};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;

pub const ELEVENLABS_BASE_URL: &str = "https://api.elevenlabs.io";
const ELEVENLABS_SUBSCRIPTION_URL: &str = "https://elevenlabs.io/subscription";
const SPEECH_MODEL: &str = "eleven_multilingual_v2";

#[derive(Debug, Serialize)]
struct VoiceSettings {
    stability: f32,
    similarity_boost: f32,
}

#[derive(Debug, Serialize)]
struct SpeechRequest<'a> {
    text: &'a str,
    model_id: &'a str,
    voice_settings: VoiceSettings,
}

/// Text-to-speech through `/v1/text-to-speech/{voice_id}`.
#[derive(Clone)]
pub struct ElevenLabsProvider {
    client: Client,
    base_url: String,
}

impl ElevenLabsProvider {
    pub fn new(api_key: &str) -> Result<Self, LlmError> {
        Self::with_base_url(ELEVENLABS_BASE_URL, api_key)
    }

    pub fn with_base_url(base_url: &str, api_key: &str) -> Result<Self, LlmError> {
        let api_key = api_key.trim();
        if api_key.is_empty() {
            return Err(LlmError::MissingApiKey("ElevenLabs"));
        }

        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("xi-api-key"),
            HeaderValue::from_str(api_key).map_err(|_| LlmError::InvalidApiKey)?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("audio/mpeg"));

        Ok(Self {
            client: Client::with_headers(headers)?.with_upgrade_url(ELEVENLABS_SUBSCRIPTION_URL),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl SpeechSynthesizer for ElevenLabsProvider {
    async fn synthesize(&self, text: &str, voice_id: &str) -> Result<Vec<u8>, LlmError> {
        let request = SpeechRequest {
            text,
            model_id: SPEECH_MODEL,
            voice_settings: VoiceSettings {
                stability: 0.5,
                similarity_boost: 0.75,
            },
        };
        traffic_log::log_request(SPEECH_MODEL, &request);

        let url = format!(
            "{}/v1/text-to-speech/{}",
            self.base_url,
            urlencoding::encode(voice_id)
        );
        let audio = self
            .client
            .post_bytes(url, &request)
            .await
            .inspect_err(|e| traffic_log::log_error(SPEECH_MODEL, &e.to_string()))?;

        if audio.is_empty() {
            return Err(LlmError::UnexpectedResponse("empty audio response".to_string()));
        }
        Ok(audio.to_vec())
    }
}

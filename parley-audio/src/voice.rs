//! Voice input: record, then transcribe.

use config::{Provider, Settings};
use llm::Transcriber;
use llm::providers::OpenAIProvider;
use parking_lot::Mutex;
use std::sync::Arc;

use crate::error::VoiceError;
use crate::speech::SpeechPlayer;
use crate::traits::AudioRecorder;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VoiceState {
    Idle,
    Listening,
    Transcribing,
}

/// One voice-mode screen: a recorder, a transcriber and optionally the
/// speech player used for spoken replies.
pub struct VoiceSession {
    recorder: Arc<dyn AudioRecorder>,
    transcriber: Option<Arc<dyn Transcriber>>,
    speech: Option<SpeechPlayer>,
    state: Mutex<VoiceState>,
}

impl VoiceSession {
    pub fn new(recorder: Arc<dyn AudioRecorder>, transcriber: Option<Arc<dyn Transcriber>>) -> Self {
        Self {
            recorder,
            transcriber,
            speech: None,
            state: Mutex::new(VoiceState::Idle),
        }
    }

    /// Whisper through the OpenAI key, if one is set.
    pub fn from_settings(settings: &Settings, recorder: Arc<dyn AudioRecorder>) -> Self {
        let transcriber = settings
            .get_api_key(Provider::OpenAi)
            .and_then(|key| match OpenAIProvider::openai(&key) {
                Ok(provider) => Some(Arc::new(provider.transcriber()) as Arc<dyn Transcriber>),
                Err(e) => {
                    tracing::warn!("Transcription disabled: {}", e);
                    None
                }
            });
        Self::new(recorder, transcriber)
    }

    pub fn with_speech(mut self, speech: SpeechPlayer) -> Self {
        self.speech = Some(speech);
        self
    }

    pub fn speech(&self) -> Option<&SpeechPlayer> {
        self.speech.as_ref()
    }

    pub fn state(&self) -> VoiceState {
        *self.state.lock()
    }

    pub fn is_listening(&self) -> bool {
        self.state() == VoiceState::Listening
    }

    /// Start capturing. Any spoken reply is stopped first so the microphone
    /// does not pick it up. Starting twice is a no-op.
    pub async fn start_recording(&self) -> Result<(), VoiceError> {
        if self.transcriber.is_none() {
            return Err(VoiceError::NotConfigured("OpenAI"));
        }
        {
            let mut state = self.state.lock();
            if *state != VoiceState::Idle {
                return Ok(());
            }
            *state = VoiceState::Listening;
        }
        if let Some(speech) = &self.speech {
            speech.stop();
        }

        if let Err(e) = self.recorder.start().await {
            *self.state.lock() = VoiceState::Idle;
            return Err(VoiceError::Backend(e));
        }
        tracing::debug!("Recording started");
        Ok(())
    }

    /// Stop capturing and transcribe. `None` when nothing was recorded or
    /// the transcription came back empty.
    pub async fn stop_and_transcribe(&self) -> Result<Option<String>, VoiceError> {
        let Some(transcriber) = self.transcriber.clone() else {
            return Err(VoiceError::NotConfigured("OpenAI"));
        };
        {
            let mut state = self.state.lock();
            if *state != VoiceState::Listening {
                return Ok(None);
            }
            *state = VoiceState::Transcribing;
        }

        let result = self.transcribe_recording(transcriber.as_ref()).await;
        *self.state.lock() = VoiceState::Idle;
        result
    }

    async fn transcribe_recording(&self, transcriber: &dyn Transcriber) -> Result<Option<String>, VoiceError> {
        let recording = self.recorder.stop().await.map_err(VoiceError::Backend)?;
        if recording.is_empty() {
            tracing::debug!("Empty recording, nothing to transcribe");
            return Ok(None);
        }

        let text = transcriber
            .transcribe(recording.data, &recording.file_name, &recording.mime_type)
            .await?;
        let text = text.trim();
        if text.is_empty() {
            tracing::debug!("Empty transcription, ignoring");
            return Ok(None);
        }
        tracing::info!(chars = text.len(), "Transcribed recording");
        Ok(Some(text.to_string()))
    }

    /// Discard the current recording, if any.
    pub fn cancel_recording(&self) {
        let mut state = self.state.lock();
        if *state == VoiceState::Listening {
            self.recorder.cancel();
            *state = VoiceState::Idle;
        }
    }

    /// Release playback and the microphone before the session goes away.
    pub fn shutdown(&self) {
        if let Some(speech) = &self.speech {
            speech.stop();
        }
        let mut state = self.state.lock();
        if *state != VoiceState::Idle {
            self.recorder.cancel();
            *state = VoiceState::Idle;
        }
    }
}

impl Drop for VoiceSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

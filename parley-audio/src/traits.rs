use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;

/// Trait for audio playback
#[async_trait]
pub trait AudioPlayer: Send + Sync {
    /// Play an encoded audio file, returning when playback ends.
    async fn play_file(&self, path: &Path) -> Result<()>;

    /// Stop the current playback and release the output device.
    fn stop(&self);
}

/// A finished microphone capture.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Recording {
    pub data: Vec<u8>,
    pub file_name: String,
    pub mime_type: String,
}

impl Recording {
    /// An `audio/m4a` capture, the format mobile recorders produce.
    pub fn m4a(data: Vec<u8>) -> Self {
        Self {
            data,
            file_name: "recording.m4a".to_string(),
            mime_type: "audio/m4a".to_string(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Trait for microphone capture
#[async_trait]
pub trait AudioRecorder: Send + Sync {
    async fn start(&self) -> Result<()>;

    /// Stop capturing and hand back what was recorded.
    async fn stop(&self) -> Result<Recording>;

    /// Stop capturing and discard the audio.
    fn cancel(&self);
}

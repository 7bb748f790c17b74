use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::path::Path;

use crate::traits::{AudioPlayer, AudioRecorder, Recording};

#[derive(Debug, Default, Clone, Copy)]
pub struct DummyAudioPlayer;

#[async_trait]
impl AudioPlayer for DummyAudioPlayer {
    async fn play_file(&self, _path: &Path) -> Result<()> {
        Err(anyhow!("Audio playback is not available in this build (no native audio backend)"))
    }

    fn stop(&self) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DummyRecorder;

#[async_trait]
impl AudioRecorder for DummyRecorder {
    async fn start(&self) -> Result<()> {
        Err(anyhow!("Audio capture is not available in this build (no native audio backend)"))
    }

    async fn stop(&self) -> Result<Recording> {
        Err(anyhow!("Audio capture is not available"))
    }

    fn cancel(&self) {}
}

//! Text-to-speech playback
//!
//! Audio is synthesised in full, written to a cache file and played from
//! there. Only one playback is ever active: starting a new one stops and
//! releases the previous one first, and a synthesis that finishes after it
//! was superseded is discarded.

use config::{PathManager, Provider, Settings};
use llm::SpeechSynthesizer;
use llm::providers::ElevenLabsProvider;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::VoiceError;
use crate::traits::AudioPlayer;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Synthesizing,
    Playing,
}

struct Playback {
    generation: u64,
    handle: JoinHandle<()>,
    path: PathBuf,
}

struct Inner {
    synthesizer: Option<Arc<dyn SpeechSynthesizer>>,
    player: Arc<dyn AudioPlayer>,
    voice_id: String,
    cache_dir: PathBuf,
    generation: AtomicU64,
    current: Mutex<Option<Playback>>,
    state: watch::Sender<PlaybackState>,
}

impl Inner {
    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn set_idle(&self) {
        self.state.send_if_modified(|state| {
            let changed = *state != PlaybackState::Idle;
            *state = PlaybackState::Idle;
            changed
        });
    }

    /// Natural end of playback `generation`.
    fn finish(&self, generation: u64, path: &Path) {
        remove_cache_file(path);
        let mut current = self.current.lock();
        if current.as_ref().is_some_and(|p| p.generation == generation) {
            *current = None;
            self.set_idle();
        }
    }
}

fn remove_cache_file(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => tracing::trace!("Removed {:?}", path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Failed to remove speech cache file {:?}: {}", path, e),
    }
}

/// Cheap to clone; clones control the same playback.
#[derive(Clone)]
pub struct SpeechPlayer {
    inner: Arc<Inner>,
}

impl SpeechPlayer {
    pub fn new(
        synthesizer: Option<Arc<dyn SpeechSynthesizer>>,
        player: Arc<dyn AudioPlayer>,
        voice_id: impl Into<String>,
        cache_dir: impl Into<PathBuf>,
    ) -> Self {
        let (state, _) = watch::channel(PlaybackState::Idle);
        Self {
            inner: Arc::new(Inner {
                synthesizer,
                player,
                voice_id: voice_id.into(),
                cache_dir: cache_dir.into(),
                generation: AtomicU64::new(0),
                current: Mutex::new(None),
                state,
            }),
        }
    }

    /// ElevenLabs with the configured voice. Without a key every `speak`
    /// fails with [`VoiceError::NotConfigured`].
    pub fn from_settings(settings: &Settings, player: Arc<dyn AudioPlayer>) -> Self {
        let synthesizer = settings
            .get_api_key(Provider::ElevenLabs)
            .and_then(|key| match ElevenLabsProvider::new(&key) {
                Ok(provider) => Some(Arc::new(provider) as Arc<dyn SpeechSynthesizer>),
                Err(e) => {
                    tracing::warn!("Speech disabled: {}", e);
                    None
                }
            });
        let cache_dir = PathManager::audio_cache_dir()
            .unwrap_or_else(|| std::env::temp_dir().join("parley-audio"));
        Self::new(synthesizer, player, settings.voice_id(), cache_dir)
    }

    pub fn is_configured(&self) -> bool {
        self.inner.synthesizer.is_some()
    }

    pub fn state(&self) -> PlaybackState {
        *self.inner.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<PlaybackState> {
        self.inner.state.subscribe()
    }

    /// Synthesise `text` and start playing it in the background.
    ///
    /// Returns once playback has started.
    pub async fn speak(&self, text: &str) -> Result<(), VoiceError> {
        let Some(synthesizer) = self.inner.synthesizer.clone() else {
            return Err(VoiceError::NotConfigured("ElevenLabs"));
        };
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }

        self.stop();
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.state.send_replace(PlaybackState::Synthesizing);

        let result = self.synthesize_to_file(synthesizer.as_ref(), text).await;
        let path = match result {
            Ok(path) => path,
            Err(e) => {
                if self.inner.is_current(generation) {
                    self.inner.set_idle();
                }
                return Err(e);
            }
        };

        let mut current = self.inner.current.lock();
        if !self.inner.is_current(generation) {
            drop(current);
            tracing::debug!("Speech superseded before playback");
            remove_cache_file(&path);
            return Ok(());
        }

        let inner = Arc::clone(&self.inner);
        let task_path = path.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = inner.player.play_file(&task_path).await {
                tracing::warn!("Playback failed: {:#}", e);
            }
            inner.finish(generation, &task_path);
        });
        *current = Some(Playback {
            generation,
            handle,
            path,
        });
        self.inner.state.send_replace(PlaybackState::Playing);
        tracing::debug!(chars = text.len(), "Speech playback started");
        Ok(())
    }

    async fn synthesize_to_file(
        &self,
        synthesizer: &dyn SpeechSynthesizer,
        text: &str,
    ) -> Result<PathBuf, VoiceError> {
        let audio = synthesizer.synthesize(text, &self.inner.voice_id).await?;
        tokio::fs::create_dir_all(&self.inner.cache_dir).await?;
        let path = self
            .inner
            .cache_dir
            .join(format!("speech-{}.mp3", uuid::Uuid::new_v4()));
        tokio::fs::write(&path, &audio).await?;
        Ok(path)
    }

    /// Stop playback and release its resources. Safe to call at any time.
    pub fn stop(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        let previous = self.inner.current.lock().take();
        if let Some(playback) = previous {
            playback.handle.abort();
            self.inner.player.stop();
            remove_cache_file(&playback.path);
            tracing::debug!("Speech playback stopped");
        }
        self.inner.set_idle();
    }
}

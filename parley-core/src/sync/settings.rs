//! Settings reconciliation
//!
//! The cloud row is merged field by field. API keys prefer the local value
//! once one is set so a freshly entered key is never replaced by a stale
//! cloud copy; every other field prefers whichever side set it explicitly,
//! then the newer record.

use anyhow::Result;
use async_trait::async_trait;
use config::{Features, Provider, Settings};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use super::DebouncedTask;

pub const PUSH_DELAY: Duration = Duration::from_secs(2);

/// The cloud copy of [`Settings`], keys in plaintext.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SettingsRecord {
    #[serde(default)]
    pub open_router_api_key: Option<String>,
    #[serde(default)]
    pub openai_api_key: Option<String>,
    #[serde(default)]
    pub elevenlabs_api_key: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub voice_id: Option<String>,
    #[serde(default)]
    pub features: Features,
    #[serde(default)]
    pub updated_at: i64,
}

impl SettingsRecord {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            open_router_api_key: settings.get_api_key(Provider::OpenRouter),
            openai_api_key: settings.get_api_key(Provider::OpenAi),
            elevenlabs_api_key: settings.get_api_key(Provider::ElevenLabs),
            model: settings.model.clone(),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
            voice_id: settings.voice_id.clone(),
            features: settings.features.clone(),
            updated_at: settings.updated_at,
        }
    }

    pub fn api_key(&self, provider: Provider) -> Option<&str> {
        match provider {
            Provider::OpenRouter => self.open_router_api_key.as_deref(),
            Provider::OpenAi => self.openai_api_key.as_deref(),
            Provider::ElevenLabs => self.elevenlabs_api_key.as_deref(),
        }
    }

    /// Write this record into `settings`, re-encrypting keys.
    pub fn apply_to(&self, settings: &mut Settings) -> Result<(), config::ConfigError> {
        for provider in Provider::ALL {
            match self.api_key(provider) {
                Some(key) if !key.trim().is_empty() => settings.set_api_key(provider, key)?,
                _ => settings.remove_api_key(provider),
            }
        }
        settings.model = self.model.clone();
        settings.temperature = self.temperature;
        settings.max_tokens = self.max_tokens;
        settings.voice_id = self.voice_id.clone();
        settings.features = self.features.clone();
        settings.updated_at = self.updated_at;
        Ok(())
    }
}

fn non_empty(value: &Option<String>) -> Option<&String> {
    value.as_ref().filter(|v| !v.trim().is_empty())
}

fn secret(local: &Option<String>, remote: &Option<String>) -> Option<String> {
    non_empty(local).or_else(|| non_empty(remote)).cloned()
}

fn pick<T: Clone>(local: Option<&T>, remote: Option<&T>, remote_newer: bool) -> Option<T> {
    match (local, remote) {
        (Some(l), Some(r)) => Some(if remote_newer { r.clone() } else { l.clone() }),
        (Some(l), None) => Some(l.clone()),
        (None, Some(r)) => Some(r.clone()),
        (None, None) => None,
    }
}

pub fn merge_settings(local: &SettingsRecord, remote: &SettingsRecord) -> SettingsRecord {
    let remote_newer = remote.updated_at > local.updated_at;
    SettingsRecord {
        open_router_api_key: secret(&local.open_router_api_key, &remote.open_router_api_key),
        openai_api_key: secret(&local.openai_api_key, &remote.openai_api_key),
        elevenlabs_api_key: secret(&local.elevenlabs_api_key, &remote.elevenlabs_api_key),
        model: pick(non_empty(&local.model), non_empty(&remote.model), remote_newer),
        temperature: pick(local.temperature.as_ref(), remote.temperature.as_ref(), remote_newer),
        max_tokens: pick(local.max_tokens.as_ref(), remote.max_tokens.as_ref(), remote_newer),
        voice_id: pick(non_empty(&local.voice_id), non_empty(&remote.voice_id), remote_newer),
        features: Features {
            image_generation: pick(
                local.features.image_generation.as_ref(),
                remote.features.image_generation.as_ref(),
                remote_newer,
            ),
            voice_replies: pick(
                local.features.voice_replies.as_ref(),
                remote.features.voice_replies.as_ref(),
                remote_newer,
            ),
            auto_title: pick(
                local.features.auto_title.as_ref(),
                remote.features.auto_title.as_ref(),
                remote_newer,
            ),
        },
        updated_at: local.updated_at.max(remote.updated_at),
    }
}

/// Where the settings row lives.
#[async_trait]
pub trait SettingsRemote: Send + Sync {
    async fn fetch(&self, user_id: &str) -> Result<Option<SettingsRecord>>;

    async fn upsert(&self, user_id: &str, record: &SettingsRecord) -> Result<()>;
}

pub struct SettingsSync {
    remote: Arc<dyn SettingsRemote>,
    push_task: DebouncedTask,
}

impl SettingsSync {
    pub fn new(remote: Arc<dyn SettingsRemote>) -> Self {
        Self::with_delay(remote, PUSH_DELAY)
    }

    pub fn with_delay(remote: Arc<dyn SettingsRemote>, delay: Duration) -> Self {
        Self {
            remote,
            push_task: DebouncedTask::new("push-settings", delay),
        }
    }

    /// Merge the cloud row into `settings`. Returns whether anything
    /// changed locally; local values the cloud lacks are pushed back.
    pub async fn pull(&self, settings: &mut Settings, user_id: &str) -> Result<bool> {
        let local = SettingsRecord::from_settings(settings);
        let Some(remote) = self.remote.fetch(user_id).await? else {
            self.schedule_push(user_id, local);
            return Ok(false);
        };

        let merged = merge_settings(&local, &remote);
        let changed = merged != local;
        if changed {
            merged.apply_to(settings)?;
            tracing::info!("Applied settings from cloud");
        }
        if merged != remote {
            self.schedule_push(user_id, merged);
        }
        Ok(changed)
    }

    /// Push `settings` once edits settle.
    pub fn settings_changed(&self, settings: &Settings, user_id: &str) {
        self.schedule_push(user_id, SettingsRecord::from_settings(settings));
    }

    pub fn is_push_pending(&self) -> bool {
        self.push_task.is_pending()
    }

    fn schedule_push(&self, user_id: &str, record: SettingsRecord) {
        let remote = Arc::clone(&self.remote);
        let user_id = user_id.to_string();
        self.push_task.schedule(async move {
            match remote.upsert(&user_id, &record).await {
                Ok(()) => tracing::debug!("Pushed settings"),
                Err(e) => tracing::warn!("Settings push failed: {:#}", e),
            }
        });
    }
}

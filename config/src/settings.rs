//! Per-user preferences, stored in settings.toml

use crate::crypto::KeyCipher;
use crate::{ConfigError, PathManager};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

pub const DEFAULT_MODEL: &str = "openai/gpt-4o-mini";
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_MAX_TOKENS: u32 = 2048;
/// ElevenLabs "Rachel"
pub const DEFAULT_VOICE_ID: &str = "21m00Tcm4TlvDq8ikWAM";

/// Services that need a credential.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    /// Chat completions
    OpenRouter,
    /// Image fallback and speech-to-text
    OpenAi,
    /// Text-to-speech
    ElevenLabs,
}

impl Provider {
    pub const ALL: [Provider; 3] = [Provider::OpenRouter, Provider::OpenAi, Provider::ElevenLabs];

    pub const fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenRouter => "open_router",
            Provider::OpenAi => "open_ai",
            Provider::ElevenLabs => "eleven_labs",
        }
    }

    pub const fn env_var(&self) -> &'static str {
        match self {
            Provider::OpenRouter => "OPENROUTER_API_KEY",
            Provider::OpenAi => "OPENAI_API_KEY",
            Provider::ElevenLabs => "ELEVENLABS_API_KEY",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Feature toggles. `None` means the user never touched the toggle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Features {
    pub image_generation: Option<bool>,
    pub voice_replies: Option<bool>,
    pub auto_title: Option<bool>,
}

impl Features {
    pub fn image_generation(&self) -> bool {
        self.image_generation.unwrap_or(true)
    }

    pub fn voice_replies(&self) -> bool {
        self.voice_replies.unwrap_or(false)
    }

    pub fn auto_title(&self) -> bool {
        self.auto_title.unwrap_or(true)
    }
}

/// User preferences.
///
/// Every preference is optional so an explicit choice can be told apart from
/// "never set" when the record is merged with its cloud copy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Encrypted API keys (provider name -> sealed key)
    #[serde(default)]
    pub api_keys: BTreeMap<String, String>,
    /// Completion model id, e.g. "openai/gpt-4o-mini"
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub voice_id: Option<String>,
    #[serde(default)]
    pub features: Features,
    /// Unix millis of the last local edit
    #[serde(default)]
    pub updated_at: i64,
}

impl Settings {
    /// Load settings from the default location, or defaults if missing or unreadable.
    pub fn load() -> Self {
        let Some(path) = PathManager::settings_path() else {
            return Self::default();
        };
        match Self::load_from(&path) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!("Using default settings: {}", e);
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::io(path, e))?;
        Ok(toml::from_str(&content)?)
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let path = PathManager::settings_path().ok_or(ConfigError::NoDirectory("config"))?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::io(parent, e))?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content).map_err(|e| ConfigError::io(path, e))
    }

    /// Decrypted API key for a provider. Empty keys count as unset.
    pub fn get_api_key(&self, provider: Provider) -> Option<String> {
        let sealed = self.api_keys.get(provider.as_str())?;
        let cipher = KeyCipher::for_machine().ok()?;
        match cipher.decrypt(sealed) {
            Ok(key) if !key.trim().is_empty() => Some(key),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!("Stored {} key could not be decrypted: {}", provider, e);
                None
            }
        }
    }

    /// Encrypt and store an API key. An empty key removes the entry.
    pub fn set_api_key(&mut self, provider: Provider, api_key: &str) -> Result<(), ConfigError> {
        let api_key = api_key.trim();
        if api_key.is_empty() {
            self.remove_api_key(provider);
            return Ok(());
        }
        let sealed = KeyCipher::for_machine()?.encrypt(api_key)?;
        self.api_keys.insert(provider.as_str().to_string(), sealed);
        Ok(())
    }

    pub fn remove_api_key(&mut self, provider: Provider) {
        self.api_keys.remove(provider.as_str());
    }

    pub fn has_api_key(&self, provider: Provider) -> bool {
        self.get_api_key(provider).is_some()
    }

    /// Fill unset keys from OPENROUTER_API_KEY / OPENAI_API_KEY / ELEVENLABS_API_KEY.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        for provider in Provider::ALL {
            if self.has_api_key(provider) {
                continue;
            }
            if let Ok(key) = std::env::var(provider.env_var()) {
                tracing::debug!("Using {} from environment", provider.env_var());
                self.set_api_key(provider, &key)?;
            }
        }
        Ok(())
    }

    pub fn model(&self) -> &str {
        self.model.as_deref().filter(|m| !m.is_empty()).unwrap_or(DEFAULT_MODEL)
    }

    pub fn temperature(&self) -> f32 {
        self.temperature.unwrap_or(DEFAULT_TEMPERATURE)
    }

    pub fn max_tokens(&self) -> u32 {
        self.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS)
    }

    pub fn voice_id(&self) -> &str {
        self.voice_id.as_deref().filter(|v| !v.is_empty()).unwrap_or(DEFAULT_VOICE_ID)
    }

    /// Record a local edit.
    pub fn touch(&mut self, now_millis: i64) {
        self.updated_at = now_millis;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.model(), DEFAULT_MODEL);
        assert_eq!(settings.temperature(), DEFAULT_TEMPERATURE);
        assert_eq!(settings.max_tokens(), DEFAULT_MAX_TOKENS);
        assert_eq!(settings.voice_id(), DEFAULT_VOICE_ID);
        assert!(settings.features.auto_title());
        assert!(!settings.features.voice_replies());
    }

    #[test]
    fn test_api_key_is_sealed() {
        let mut settings = Settings::default();
        settings.set_api_key(Provider::OpenRouter, "sk-or-123").unwrap();

        let stored = settings.api_keys.get("open_router").unwrap();
        assert_ne!(stored, "sk-or-123");
        assert_eq!(settings.get_api_key(Provider::OpenRouter).as_deref(), Some("sk-or-123"));
        assert!(!settings.has_api_key(Provider::ElevenLabs));
    }

    #[test]
    fn test_empty_key_removes_entry() {
        let mut settings = Settings::default();
        settings.set_api_key(Provider::OpenAi, "sk-1").unwrap();
        settings.set_api_key(Provider::OpenAi, "   ").unwrap();
        assert!(settings.api_keys.is_empty());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.toml");

        let mut settings = Settings::default();
        settings.model = Some("anthropic/claude-3.5-sonnet".to_string());
        settings.temperature = Some(0.2);
        settings.features.image_generation = Some(false);
        settings.set_api_key(Provider::ElevenLabs, "xi-key").unwrap();
        settings.touch(1_700_000_000_000);
        settings.save_to(&path).unwrap();

        let loaded = Settings::load_from(&path).unwrap();
        assert_eq!(loaded, settings);
        assert_eq!(loaded.get_api_key(Provider::ElevenLabs).as_deref(), Some("xi-key"));
        assert!(!loaded.features.image_generation());
    }

    #[test]
    fn test_load_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Settings::load_from(&dir.path().join("missing.toml")).is_err());
    }
}

use std::path::PathBuf;
use std::sync::OnceLock;

const APP_DIR: &str = "parley";

static DATA_DIR_OVERRIDE: OnceLock<PathBuf> = OnceLock::new();

pub struct PathManager;

impl PathManager {
    /// Set a custom data directory (the app sandbox on Android/iOS, where
    /// standard detection fails). Only the first call has an effect.
    pub fn set_data_dir(path: PathBuf) {
        let _ = DATA_DIR_OVERRIDE.set(path);
    }

    pub fn data_dir() -> Option<PathBuf> {
        if let Some(d) = DATA_DIR_OVERRIDE.get() {
            return Some(d.clone());
        }
        dirs::data_dir().map(|d| d.join(APP_DIR))
    }

    pub fn config_dir() -> Option<PathBuf> {
        if DATA_DIR_OVERRIDE.get().is_some() {
            return Self::data_dir();
        }
        dirs::config_dir().map(|d| d.join(APP_DIR))
    }

    pub fn cache_dir() -> Option<PathBuf> {
        if DATA_DIR_OVERRIDE.get().is_some() {
            return Self::data_dir().map(|d| d.join("cache"));
        }
        dirs::cache_dir().map(|d| d.join(APP_DIR))
    }

    pub fn settings_path() -> Option<PathBuf> {
        Self::config_dir().map(|d| d.join("settings.toml"))
    }

    /// Local snapshot of the conversation list
    pub fn conversations_path() -> Option<PathBuf> {
        Self::data_dir().map(|d| d.join("conversations.json"))
    }

    /// Synthesized speech is written here before playback and removed after
    pub fn audio_cache_dir() -> Option<PathBuf> {
        Self::cache_dir().map(|d| d.join("audio"))
    }

    pub fn logs_dir() -> Option<PathBuf> {
        Self::data_dir().map(|d| d.join("logs"))
    }

    pub fn log_file_path() -> Option<PathBuf> {
        Self::logs_dir().map(|d| d.join("parley.log"))
    }

    pub fn ensure_dirs_exist() -> std::io::Result<()> {
        let dirs = [
            Self::data_dir(),
            Self::config_dir(),
            Self::logs_dir(),
            Self::audio_cache_dir(),
        ];
        for d in dirs.into_iter().flatten() {
            std::fs::create_dir_all(&d)?;
        }
        Ok(())
    }
}

//! On-device persistence of the conversation list

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::types::Conversation;

/// Whole-snapshot persistence for the conversation list.
#[async_trait]
pub trait LocalStore: Send + Sync {
    async fn load(&self) -> Result<Vec<Conversation>>;

    async fn save(&self, conversations: &[Conversation]) -> Result<()>;
}

/// In-memory store for tests and ephemeral sessions
#[derive(Debug, Default)]
pub struct MemoryStore {
    conversations: Mutex<Vec<Conversation>>,
    saves: Mutex<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_conversations(conversations: Vec<Conversation>) -> Self {
        Self {
            conversations: Mutex::new(conversations),
            saves: Mutex::new(0),
        }
    }

    /// Last saved snapshot
    pub fn snapshot(&self) -> Vec<Conversation> {
        self.conversations.lock().clone()
    }

    pub fn save_count(&self) -> usize {
        *self.saves.lock()
    }
}

#[async_trait]
impl LocalStore for MemoryStore {
    async fn load(&self) -> Result<Vec<Conversation>> {
        Ok(self.conversations.lock().clone())
    }

    async fn save(&self, conversations: &[Conversation]) -> Result<()> {
        *self.conversations.lock() = conversations.to_vec();
        *self.saves.lock() += 1;
        Ok(())
    }
}

/// JSON snapshot on disk, written atomically through a temp file.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at `PathManager::conversations_path()`
    pub fn default_location() -> Option<Self> {
        config::PathManager::conversations_path().map(Self::new)
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

#[async_trait]
impl LocalStore for JsonFileStore {
    async fn load(&self) -> Result<Vec<Conversation>> {
        if !fs::try_exists(&self.path).await? {
            return Ok(Vec::new());
        }
        let data = fs::read(&self.path)
            .await
            .with_context(|| format!("reading {}", self.path.display()))?;
        if data.is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_slice(&data).with_context(|| format!("parsing {}", self.path.display()))
    }

    async fn save(&self, conversations: &[Conversation]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let data = serde_json::to_vec(conversations)?;

        let temp_path = self.path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(&data).await?;
        file.sync_all().await?;
        fs::rename(&temp_path, &self.path).await?;

        tracing::debug!(count = conversations.len(), path = %self.path.display(), "Saved conversations");
        Ok(())
    }
}

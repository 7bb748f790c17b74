//! Hosted backend collaborators
//!
//! The core only needs the request/response contracts of the hosted auth,
//! table and object storage services. `SupabaseClient` implements all of
//! them over REST.

mod supabase;

pub use supabase::{SupabaseClient, SupabaseConfig};

use anyhow::Result;
use async_trait::async_trait;

/// Object storage for attachments and generated images.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Store `bytes` at `path` and return its public URL.
    async fn upload(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<String>;

    async fn remove(&self, path: &str) -> Result<()>;
}

use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::sync::Arc;

use super::ConversationStore;
use super::turn::PendingTurn;
use crate::remote::ObjectStorage;
use crate::storage::{Attachment, ConversationId, MessageId};

/// Where an attachment lives in the bucket.
pub(crate) fn attachment_path(
    user_id: Option<&str>,
    conversation_id: &ConversationId,
    message_id: &MessageId,
    attachment: &Attachment,
) -> String {
    let name: String = attachment
        .name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect();
    format!(
        "{}/{}/{}/{}-{}",
        user_id.unwrap_or("anonymous"),
        conversation_id,
        message_id,
        attachment.id,
        name
    )
}

async fn attachment_bytes(attachment: &Attachment) -> Result<Vec<u8>> {
    if let Some(data) = &attachment.data {
        return STANDARD.decode(data).context("decoding inline attachment payload");
    }
    let path = attachment.uri.strip_prefix("file://").unwrap_or(&attachment.uri);
    tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path))
}

async fn upload(storage: &dyn ObjectStorage, path: &str, attachment: &Attachment) -> Result<String> {
    let bytes = attachment_bytes(attachment).await?;
    storage.upload(path, bytes, &attachment.mime_type).await
}

impl ConversationStore {
    /// Upload the turn's attachments in the background and point each one at
    /// its remote copy. Failures keep the local URI.
    pub(super) fn upload_attachments(&self, turn: &PendingTurn, attachments: Vec<Attachment>) {
        let Some(storage) = self.inner.storage.clone() else {
            return;
        };
        let user_id = self.user_id();

        for attachment in attachments.into_iter().filter(|a| !a.is_remote()) {
            let store = self.clone();
            let storage: Arc<dyn ObjectStorage> = Arc::clone(&storage);
            let conversation_id = turn.conversation_id.clone();
            let message_id = turn.user_message_id.clone();
            let path = attachment_path(user_id.as_deref(), &conversation_id, &message_id, &attachment);

            tokio::spawn(async move {
                match upload(storage.as_ref(), &path, &attachment).await {
                    Ok(url) => {
                        if !store.update_attachment_uri(&conversation_id, &message_id, &attachment.id, &url) {
                            tracing::debug!(attachment = %attachment.id, "Uploaded attachment no longer exists");
                        }
                    }
                    Err(e) => {
                        tracing::warn!(attachment = %attachment.id, "Attachment upload failed, keeping local copy: {:#}", e);
                    }
                }
            });
        }
    }
}

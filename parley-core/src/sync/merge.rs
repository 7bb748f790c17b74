use std::collections::HashMap;

use crate::storage::{Conversation, ConversationId};

/// Last-write-wins merge of a local and a remote conversation snapshot.
///
/// Local records of `user_id` (and unowned ones) seed the result; a remote
/// record is taken only when absent locally or strictly newer. Records are
/// only ever added or upgraded, so merging a partial page is safe. Output is
/// ordered by `updated_at` descending, then id.
pub fn merge_conversations(
    local: &[Conversation],
    remote: &[Conversation],
    user_id: &str,
) -> Vec<Conversation> {
    let mut merged: HashMap<&ConversationId, &Conversation> = HashMap::new();
    for conversation in local.iter().filter(|c| c.visible_to(Some(user_id))) {
        merged.insert(&conversation.id, conversation);
    }

    for conversation in remote {
        let newer = merged
            .get(&conversation.id)
            .is_none_or(|existing| existing.updated_at < conversation.updated_at);
        if newer {
            merged.insert(&conversation.id, conversation);
        }
    }

    let mut result: Vec<Conversation> = merged.into_values().cloned().collect();
    result.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
    result
}

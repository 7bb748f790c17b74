use crate::storage::{Conversation, ConversationId, MessageId, SyncStatus};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TurnStatus {
    Pending,
    Committed,
    RolledBack,
}

/// One send attempt: the optimistic user message and its reply placeholder.
///
/// A turn settles exactly once. Rolling back removes exactly the recorded
/// pair. The conversation's metadata is restored only if nothing else
/// changed the conversation while the turn was in flight.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingTurn {
    pub conversation_id: ConversationId,
    pub user_message_id: MessageId,
    pub placeholder_id: MessageId,
    pub status: TurnStatus,
    /// The conversation was created for this turn.
    pub created_conversation: bool,
    previous_updated_at: i64,
    previous_sync_status: SyncStatus,
    changed_elsewhere: bool,
}

impl PendingTurn {
    pub(crate) fn new(
        conversation: &Conversation,
        user_message_id: MessageId,
        placeholder_id: MessageId,
        created_conversation: bool,
    ) -> Self {
        Self {
            conversation_id: conversation.id.clone(),
            user_message_id,
            placeholder_id,
            status: TurnStatus::Pending,
            created_conversation,
            previous_updated_at: conversation.updated_at,
            previous_sync_status: conversation.sync_status,
            changed_elsewhere: false,
        }
    }

    /// Record a mutation of the conversation that did not come from this turn.
    pub(crate) fn note_change_elsewhere(&mut self) {
        self.changed_elsewhere = true;
    }

    pub fn changed_elsewhere(&self) -> bool {
        self.changed_elsewhere
    }

    pub fn is_pending(&self) -> bool {
        self.status == TurnStatus::Pending
    }

    fn settle(&mut self, status: TurnStatus) -> bool {
        if !self.is_pending() {
            return false;
        }
        self.status = status;
        true
    }

    pub(crate) fn commit(&mut self) -> bool {
        self.settle(TurnStatus::Committed)
    }

    /// Transition to rolled back and undo the turn in `conversation`.
    ///
    /// When the conversation was also changed elsewhere it stays dirty and
    /// `updated_at` moves forward to `now`.
    pub(crate) fn roll_back(&mut self, conversation: &mut Conversation, now: i64) -> bool {
        if !self.settle(TurnStatus::RolledBack) {
            return false;
        }
        conversation
            .messages
            .retain(|m| m.id != self.user_message_id && m.id != self.placeholder_id);
        if self.changed_elsewhere {
            conversation.touch(now.max(conversation.updated_at));
            conversation.sync_status = SyncStatus::Pending;
        } else {
            conversation.updated_at = self.previous_updated_at;
            conversation.sync_status = self.previous_sync_status;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Message;

    fn conversation_with_turn() -> (Conversation, PendingTurn, Vec<Message>) {
        let mut conversation = Conversation::new("m", None, 100);
        conversation.messages.push(Message::user("q1", 100));
        conversation.messages.push(Message::assistant("a1", 101));
        conversation.sync_status = SyncStatus::Synced;
        let before = conversation.messages.clone();

        let user = Message::user("q2", 200);
        let placeholder = Message::placeholder(201);
        let turn = PendingTurn::new(&conversation, user.id.clone(), placeholder.id.clone(), false);
        conversation.messages.push(user);
        conversation.messages.push(placeholder);
        conversation.touch(201);
        conversation.sync_status = SyncStatus::Pending;
        (conversation, turn, before)
    }

    #[test]
    fn test_roll_back_restores_conversation() {
        let (mut conversation, mut turn, before) = conversation_with_turn();
        assert!(turn.roll_back(&mut conversation, 500));
        assert_eq!(conversation.messages, before);
        assert_eq!(conversation.updated_at, 100);
        assert_eq!(conversation.sync_status, SyncStatus::Synced);
        assert_eq!(turn.status, TurnStatus::RolledBack);
    }

    #[test]
    fn test_roll_back_keeps_changes_made_elsewhere() {
        let (mut conversation, mut turn, before) = conversation_with_turn();
        conversation.title = "Renamed".into();
        conversation.touch(300);
        turn.note_change_elsewhere();

        assert!(turn.roll_back(&mut conversation, 400));
        assert_eq!(conversation.messages, before);
        assert_eq!(conversation.title, "Renamed");
        assert_eq!(conversation.updated_at, 400);
        assert_eq!(conversation.sync_status, SyncStatus::Pending);
    }

    #[test]
    fn test_settles_once() {
        let (mut conversation, mut turn, _) = conversation_with_turn();
        assert!(turn.commit());
        assert!(!turn.roll_back(&mut conversation, 500));
        assert_eq!(conversation.messages.len(), 4);
        assert_eq!(turn.status, TurnStatus::Committed);
    }
}

use serde::{Deserialize, Serialize};

pub use cache::{CacheUpdate, ConversationCache, UpdateKind};
pub use message::{ConversationId, DraftMessage, Message, MessageBody, MessageId, UserId};

mod cache;
mod message;

/// A two-party conversation as the backend describes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: ConversationId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_id: Option<MessageId>,
}

impl Conversation {
    pub fn participants(&self) -> (&UserId, &UserId) {
        (&self.sender_id, &self.receiver_id)
    }

    /// The peer of `viewer`, or `None` when `viewer` is not in this conversation.
    pub fn other_participant(&self, viewer: &UserId) -> Option<&UserId> {
        if &self.sender_id == viewer {
            Some(&self.receiver_id)
        } else if &self.receiver_id == viewer {
            Some(&self.sender_id)
        } else {
            None
        }
    }
}

/// Backward pagination state for one conversation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageCursor {
    /// Messages obtained through history fetches so far.
    pub loaded: usize,
    pub has_more: bool,
    pub fetching_older: bool,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct CacheEntry {
    pub(crate) messages: Vec<Message>,
    pub(crate) cursor: PageCursor,
    pub(crate) conversation: Option<Conversation>,
    /// Set once history has been fetched; entries created by live events
    /// alone stay unhydrated so the next open still loads history.
    pub(crate) hydrated: bool,
}

impl CacheEntry {
    pub(crate) fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }

    pub(crate) fn contains(&self, id: &MessageId) -> bool {
        self.messages.iter().any(|m| &m.id == id)
    }

    /// Inserts in timestamp order. Returns false if the id is already present.
    fn insert(&mut self, message: Message) -> bool {
        if self.contains(&message.id) {
            return false;
        }

        // Fast path: in-order arrival goes on the end
        if self
            .messages
            .last()
            .map_or(true, |last| last.timestamp <= message.timestamp)
        {
            if let Some(conversation) = self.conversation.as_mut() {
                conversation.last_message_id = Some(message.id.clone());
            }
            self.messages.push(message);
        } else {
            let pos = self
                .messages
                .partition_point(|existing| existing.timestamp <= message.timestamp);
            self.messages.insert(pos, message);
        }
        true
    }

    /// Prepends the ids from `page` not already cached, keeping page order.
    fn merge_older(&mut self, page: Vec<Message>) -> usize {
        let mut fresh: Vec<Message> = Vec::with_capacity(page.len());
        for message in page {
            if !self.contains(&message.id) && !fresh.iter().any(|m| m.id == message.id) {
                fresh.push(message);
            }
        }
        let merged = fresh.len();
        if merged > 0 {
            fresh.append(&mut self.messages);
            self.messages = fresh;
        }
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conversation() -> Conversation {
        Conversation {
            id: "c1".into(),
            sender_id: "alice".into(),
            receiver_id: "bob".into(),
            last_message_id: None,
        }
    }

    #[test]
    fn other_participant_is_derived_from_viewer() {
        let c = conversation();
        assert_eq!(c.other_participant(&"alice".into()), Some(&UserId::new("bob")));
        assert_eq!(c.other_participant(&"bob".into()), Some(&UserId::new("alice")));
        assert_eq!(c.other_participant(&"carol".into()), None);
        assert_eq!(c.participants(), (&UserId::new("alice"), &UserId::new("bob")));
    }

    #[test]
    fn decodes_backend_conversation() {
        let json = r#"{"id":3,"senderId":"a","receiverId":"b","lastMessageId":9,"messages":[]}"#;
        let c: Conversation = serde_json::from_str(json).unwrap();
        assert_eq!(c.id, ConversationId::new("3"));
        assert_eq!(c.last_message_id, Some(MessageId::new("9")));
    }
}

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::conversations::{Conversation, ConversationId, DraftMessage, Message, MessageId, UserId};
use crate::error::Result;

pub use rest::RestBackend;

mod rest;

/// One page of persisted history plus the conversation it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationPage {
    #[serde(flatten)]
    pub conversation: Conversation,
    #[serde(default)]
    pub messages: Vec<Message>,
}

/// Page request for [`Backend::fetch_conversation`]. `offset` counts back from
/// the newest message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageRequest {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl PageRequest {
    pub fn latest(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            offset: None,
        }
    }

    pub fn at(limit: usize, offset: usize) -> Self {
        Self {
            limit: Some(limit),
            offset: Some(offset),
        }
    }
}

/// REST surface the sync core depends on.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn fetch_conversation(
        &self,
        id: &ConversationId,
        page: PageRequest,
    ) -> Result<ConversationPage>;

    /// Approximate; only used as a pagination hint.
    async fn message_count(&self, id: &ConversationId) -> Result<usize>;

    async fn create_message(&self, conversation: &ConversationId, draft: &DraftMessage)
        -> Result<Message>;

    async fn update_message(
        &self,
        id: &MessageId,
        content: &str,
        conversation: &ConversationId,
    ) -> Result<Message>;

    async fn delete_message(&self, id: &MessageId) -> Result<()>;

    async fn message(&self, id: &MessageId) -> Result<Message>;

    async fn conversations_for(&self, user: &UserId) -> Result<Vec<Conversation>>;

    async fn create_conversation(&self, sender: &UserId, receiver: &UserId) -> Result<Conversation>;

    async fn delete_conversation(&self, id: &ConversationId) -> Result<()>;
}

//! In-process fakes for the REST backend and the push transport.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::DateTime;
use tokio::sync::Notify;

use chatsync::backend::{Backend, ConversationPage, PageRequest};
use chatsync::conversations::{
    Conversation, ConversationId, DraftMessage, Message, MessageId, UserId,
};
use chatsync::transport::{Publish, PushTransport};
use chatsync::{Result, SyncError};

pub fn msg(conversation: &str, id: &str, at: i64) -> Message {
    Message {
        id: id.into(),
        conversation_id: conversation.into(),
        author_id: "alice".into(),
        receiver_id: Some("bob".into()),
        content: format!("body of {id}"),
        timestamp: DateTime::from_timestamp_millis(at).unwrap(),
    }
}

pub fn ids(messages: &[Message]) -> Vec<String> {
    messages.iter().map(|m| m.id.to_string()).collect()
}

fn not_found(what: &str) -> SyncError {
    SyncError::Status {
        status: 404,
        url: what.to_string(),
    }
}

#[derive(Default)]
pub struct FakeBackend {
    /// Oldest first, like the server's storage order.
    conversations: Mutex<HashMap<ConversationId, Vec<Message>>>,
    pub fetches: Mutex<Vec<(ConversationId, PageRequest)>>,
    pub count_calls: AtomicUsize,
    pub deletes: Mutex<Vec<MessageId>>,
    pub fail_fetch: AtomicBool,
    pub fail_count: AtomicBool,
    pub fail_writes: AtomicBool,
    count_override: Mutex<Option<usize>>,
    gate: Mutex<Option<Arc<Notify>>>,
    next_id: AtomicUsize,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds `n` messages `m0..m{n-1}` into `conversation`.
    pub fn with_history(conversation: &str, n: usize) -> Self {
        let backend = Self::new();
        for i in 0..n {
            backend.push(msg(conversation, &format!("m{i}"), i as i64 * 1_000));
        }
        backend
    }

    pub fn push(&self, message: Message) {
        self.conversations
            .lock()
            .unwrap()
            .entry(message.conversation_id.clone())
            .or_default()
            .push(message);
    }

    pub fn set_count(&self, count: usize) {
        *self.count_override.lock().unwrap() = Some(count);
    }

    pub fn set_next_id(&self, n: usize) {
        self.next_id.store(n, Ordering::SeqCst);
    }

    /// Subsequent history fetches block until the returned handle is notified.
    pub fn hold_fetches(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.lock().unwrap().len()
    }

    fn stored(&self, id: &ConversationId) -> Vec<Message> {
        self.conversations
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .unwrap_or_default()
    }

    fn meta(id: &ConversationId) -> Conversation {
        Conversation {
            id: id.clone(),
            sender_id: "alice".into(),
            receiver_id: "bob".into(),
            last_message_id: None,
        }
    }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn fetch_conversation(
        &self,
        id: &ConversationId,
        page: PageRequest,
    ) -> Result<ConversationPage> {
        self.fetches.lock().unwrap().push((id.clone(), page));
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(SyncError::Status {
                status: 503,
                url: format!("chats/{id}"),
            });
        }

        let all = self.stored(id);
        let end = all.len().saturating_sub(page.offset.unwrap_or(0));
        let start = page.limit.map_or(0, |limit| end.saturating_sub(limit));
        let messages = all[start..end].to_vec();
        let mut conversation = Self::meta(id);
        conversation.last_message_id = all.last().map(|m| m.id.clone());
        Ok(ConversationPage {
            conversation,
            messages,
        })
    }

    async fn message_count(&self, id: &ConversationId) -> Result<usize> {
        self.count_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_count.load(Ordering::SeqCst) {
            return Err(not_found("messages/length"));
        }
        let forced = *self.count_override.lock().unwrap();
        Ok(forced.unwrap_or_else(|| self.stored(id).len()))
    }

    async fn create_message(
        &self,
        conversation: &ConversationId,
        draft: &DraftMessage,
    ) -> Result<Message> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(SyncError::Status {
                status: 500,
                url: "messages/".to_string(),
            });
        }
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let saved = Message {
            id: MessageId::new(format!("m{n}")),
            conversation_id: conversation.clone(),
            author_id: draft.author.clone(),
            receiver_id: None,
            content: draft.content.clone(),
            timestamp: draft.timestamp,
        };
        self.push(saved.clone());
        Ok(saved)
    }

    async fn update_message(
        &self,
        id: &MessageId,
        content: &str,
        conversation: &ConversationId,
    ) -> Result<Message> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(SyncError::Status {
                status: 500,
                url: format!("messages/{id}"),
            });
        }
        let mut conversations = self.conversations.lock().unwrap();
        let stored = conversations
            .get_mut(conversation)
            .and_then(|list| list.iter_mut().find(|m| &m.id == id))
            .ok_or_else(|| not_found(id.as_str()))?;
        stored.content = content.to_string();
        Ok(stored.clone())
    }

    async fn delete_message(&self, id: &MessageId) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(SyncError::Status {
                status: 500,
                url: format!("messages/{id}"),
            });
        }
        self.deletes.lock().unwrap().push(id.clone());
        for list in self.conversations.lock().unwrap().values_mut() {
            list.retain(|m| &m.id != id);
        }
        Ok(())
    }

    async fn message(&self, id: &MessageId) -> Result<Message> {
        self.conversations
            .lock()
            .unwrap()
            .values()
            .flatten()
            .find(|m| &m.id == id)
            .cloned()
            .ok_or_else(|| not_found(id.as_str()))
    }

    async fn conversations_for(&self, user: &UserId) -> Result<Vec<Conversation>> {
        let conversations = self.conversations.lock().unwrap();
        let mut list: Vec<Conversation> = conversations
            .iter()
            .map(|(id, messages)| {
                let mut meta = Self::meta(id);
                meta.last_message_id = messages.last().map(|m| m.id.clone());
                meta
            })
            .filter(|c| c.other_participant(user).is_some())
            .collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(list)
    }

    async fn create_conversation(&self, sender: &UserId, receiver: &UserId) -> Result<Conversation> {
        let id = ConversationId::new(format!("c{}", self.next_id.fetch_add(1, Ordering::SeqCst)));
        self.conversations
            .lock()
            .unwrap()
            .insert(id.clone(), Vec::new());
        Ok(Conversation {
            id,
            sender_id: sender.clone(),
            receiver_id: receiver.clone(),
            last_message_id: None,
        })
    }

    async fn delete_conversation(&self, id: &ConversationId) -> Result<()> {
        self.conversations
            .lock()
            .unwrap()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| not_found(id.as_str()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Join(ConversationId),
    Leave(ConversationId),
    Publish(Publish),
}

#[derive(Default)]
pub struct FakeTransport {
    pub calls: Mutex<Vec<Call>>,
    /// Publishes fail as they do while the socket is reconnecting.
    pub fail_publish: AtomicBool,
}

impl FakeTransport {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn joins(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, Call::Join(_)))
            .count()
    }

    pub fn publishes(&self) -> Vec<Publish> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Publish(publish) => Some(publish),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl PushTransport for FakeTransport {
    async fn join(&self, conversation: &ConversationId) -> Result<()> {
        self.calls.lock().unwrap().push(Call::Join(conversation.clone()));
        Ok(())
    }

    async fn leave(&self, conversation: &ConversationId) -> Result<()> {
        self.calls.lock().unwrap().push(Call::Leave(conversation.clone()));
        Ok(())
    }

    async fn publish(&self, event: Publish) -> Result<()> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(SyncError::ChannelClosed);
        }
        self.calls.lock().unwrap().push(Call::Publish(event));
        Ok(())
    }
}

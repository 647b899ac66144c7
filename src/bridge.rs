//! Live channel bridge: keeps the open conversation's cache entry in step with
//! push events and routes local mutations through the backend.

use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::backend::Backend;
use crate::conversations::{
    Conversation, ConversationCache, ConversationId, DraftMessage, Message, MessageId, UserId,
};
use crate::error::{Result, SyncError};
use crate::history::{HistoryLoader, LoadOutcome, OlderOutcome};
use crate::transport::{Publish, PushTransport, TransportEvent};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeState {
    Disconnected,
    Subscribed(ConversationId),
}

#[derive(Debug, Default)]
struct Subscription {
    connected: bool,
    open: Option<ConversationId>,
}

/// Owns the subscription for at most one open conversation.
///
/// All methods take `&self`; wrap the bridge in an `Arc` to drive history
/// fetches from spawned tasks while events keep flowing.
pub struct LiveBridge {
    backend: Arc<dyn Backend>,
    transport: Arc<dyn PushTransport>,
    cache: ConversationCache,
    history: HistoryLoader,
    active: watch::Sender<Option<ConversationId>>,
    subscription: Mutex<Subscription>,
}

impl std::fmt::Debug for LiveBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveBridge")
            .field("active", &*self.active.borrow())
            .field("history", &self.history)
            .finish_non_exhaustive()
    }
}

impl LiveBridge {
    pub fn new(
        backend: Arc<dyn Backend>,
        transport: Arc<dyn PushTransport>,
        cache: ConversationCache,
        page_size: usize,
    ) -> Self {
        let (active, active_rx) = watch::channel(None);
        let history = HistoryLoader::new(Arc::clone(&backend), cache.clone(), page_size, active_rx);
        Self {
            backend,
            transport,
            cache,
            history,
            active,
            subscription: Mutex::new(Subscription::default()),
        }
    }

    pub fn cache(&self) -> &ConversationCache {
        &self.cache
    }

    pub fn history(&self) -> &HistoryLoader {
        &self.history
    }

    pub fn current(&self) -> Option<ConversationId> {
        self.active.borrow().clone()
    }

    pub async fn state(&self) -> BridgeState {
        let sub = self.subscription.lock().await;
        match (&sub.open, sub.connected) {
            (Some(id), true) => BridgeState::Subscribed(id.clone()),
            _ => BridgeState::Disconnected,
        }
    }

    /// Makes `conversation` the open one: leaves the previous conversation
    /// before joining the new one. No-op when it is already open.
    pub async fn switch(&self, conversation: &ConversationId) {
        let mut sub = self.subscription.lock().await;
        if sub.open.as_ref() == Some(conversation) {
            return;
        }

        // From here on, late results for the old id are stale
        self.active.send_replace(Some(conversation.clone()));

        if let Some(previous) = sub.open.take() {
            if sub.connected {
                self.leave(&previous).await;
            }
        }

        sub.open = Some(conversation.clone());
        if sub.connected {
            self.join(conversation).await;
        }
        info!(conversation = %conversation, "Opened conversation");
    }

    /// Switches to `conversation` and loads its latest history.
    pub async fn open(&self, conversation: &ConversationId) -> LoadOutcome {
        self.switch(conversation).await;
        self.history.load_initial(conversation).await
    }

    pub async fn close(&self) {
        let mut sub = self.subscription.lock().await;
        self.active.send_replace(None);
        if let Some(previous) = sub.open.take() {
            if sub.connected {
                self.leave(&previous).await;
            }
            info!(conversation = %previous, "Closed conversation");
        }
    }

    pub async fn load_older(&self) -> OlderOutcome {
        match self.current() {
            Some(conversation) => self.history.load_older(&conversation).await,
            None => OlderOutcome::Skipped,
        }
    }

    pub async fn handle_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => {
                let mut sub = self.subscription.lock().await;
                sub.connected = true;
                // The server forgets rooms across reconnects
                if let Some(open) = sub.open.clone() {
                    self.join(&open).await;
                }
            }
            TransportEvent::Disconnected => {
                self.subscription.lock().await.connected = false;
                debug!("Push transport lost; waiting for reconnect");
            }
            TransportEvent::NewMessage(message) => {
                if self.is_current(&message.conversation_id) {
                    let conversation = message.conversation_id.clone();
                    self.cache.append(&conversation, message);
                } else {
                    debug!(conversation = %message.conversation_id, "Dropping event for closed conversation");
                }
            }
            TransportEvent::UpdateMessage(message) => {
                if self.is_current(&message.conversation_id) {
                    let conversation = message.conversation_id.clone();
                    self.cache.replace_message(&conversation, message);
                } else {
                    debug!(conversation = %message.conversation_id, "Dropping event for closed conversation");
                }
            }
            TransportEvent::DeleteMessage { id } => {
                if let Some(conversation) = self.current() {
                    self.cache.remove(&conversation, &id);
                }
            }
        }
    }

    /// Drains `events` until the transport goes away.
    pub async fn run(&self, mut events: tokio::sync::mpsc::UnboundedReceiver<TransportEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_event(event).await;
        }
        warn!("Push transport event stream ended");
    }

    /// Creates the message at the backend, republishes it, and makes it
    /// visible locally. A publish lost to a reconnect still leaves the
    /// confirmed message in the cache; a later echo of it is absorbed.
    pub async fn send(&self, conversation: &ConversationId, draft: DraftMessage) -> Result<Message> {
        let saved = match self.backend.create_message(conversation, &draft).await {
            Ok(saved) => saved,
            Err(e) => {
                warn!(conversation = %conversation, error = %e, "Failed to send message");
                return Err(e);
            }
        };

        if let Err(e) = self.transport.publish(Publish::Created(saved.clone())).await {
            warn!(message = %saved.id, error = %e, "Failed to publish sent message");
        }

        self.cache.append(conversation, saved.clone());
        Ok(saved)
    }

    /// Edits a message. The cache changes only after the backend confirms.
    pub async fn update(
        &self,
        conversation: &ConversationId,
        id: &MessageId,
        content: &str,
    ) -> Result<Message> {
        let updated = match self.backend.update_message(id, content, conversation).await {
            Ok(updated) => updated,
            Err(e) => {
                warn!(message = %id, error = %e, "Failed to update message");
                return Err(e);
            }
        };

        if let Err(e) = self.transport.publish(Publish::Updated(updated.clone())).await {
            warn!(message = %id, error = %e, "Failed to publish message update");
        }

        self.cache.replace_message(conversation, updated.clone());
        Ok(updated)
    }

    /// Deletes at the backend and relays the deletion. The local copy goes
    /// away when the `delete_message` event arrives, so there is a single
    /// removal path.
    pub async fn remove(&self, conversation: &ConversationId, id: &MessageId) -> Result<()> {
        if let Err(e) = self.backend.delete_message(id).await {
            warn!(message = %id, error = %e, "Failed to delete message");
            return Err(e);
        }

        let deleted = Publish::Deleted {
            conversation: conversation.clone(),
            id: id.clone(),
        };
        if let Err(e) = self.transport.publish(deleted).await {
            warn!(message = %id, error = %e, "Failed to publish message deletion");
        }
        Ok(())
    }

    pub async fn conversations_for(&self, user: &UserId) -> Result<Vec<Conversation>> {
        self.backend.conversations_for(user).await
    }

    pub async fn add_conversation(&self, sender: &UserId, receiver: &UserId) -> Result<Conversation> {
        let conversation = self.backend.create_conversation(sender, receiver).await?;
        info!(conversation = %conversation.id, "Created conversation");
        Ok(conversation)
    }

    pub async fn delete_conversation(&self, conversation: &ConversationId) -> Result<()> {
        self.backend.delete_conversation(conversation).await?;
        if self.current().as_ref() == Some(conversation) {
            self.close().await;
        }
        self.cache.forget(conversation);
        info!(conversation = %conversation, "Deleted conversation");
        Ok(())
    }

    /// Latest message of a conversation, from cache when possible.
    pub async fn last_message(&self, conversation: &Conversation) -> Result<Option<Message>> {
        let Some(id) = conversation.last_message_id.as_ref() else {
            return Ok(None);
        };
        if let Some(cached) = self
            .cache
            .get(&conversation.id)
            .into_iter()
            .find(|m| &m.id == id)
        {
            return Ok(Some(cached));
        }
        match self.backend.message(id).await {
            Ok(message) => Ok(Some(message)),
            Err(SyncError::Status { status: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn is_current(&self, conversation: &ConversationId) -> bool {
        self.active.borrow().as_ref() == Some(conversation)
    }

    async fn join(&self, conversation: &ConversationId) {
        debug!(conversation = %conversation, "Joining conversation room");
        if let Err(e) = self.transport.join(conversation).await {
            warn!(conversation = %conversation, error = %e, "Failed to join conversation room");
        }
    }

    async fn leave(&self, conversation: &ConversationId) {
        debug!(conversation = %conversation, "Leaving conversation room");
        if let Err(e) = self.transport.leave(conversation).await {
            warn!(conversation = %conversation, error = %e, "Failed to leave conversation room");
        }
    }
}

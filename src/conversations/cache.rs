use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::broadcast;
use tracing::trace;

use super::{CacheEntry, Conversation, ConversationId, Message, MessageId, PageCursor};

const UPDATE_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateKind {
    Replaced,
    Appended(MessageId),
    Patched(MessageId),
    Removed(MessageId),
    MergedOlder(usize),
    Cursor,
    Forgotten,
}

/// Sent to observers after every mutation that changed something.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheUpdate {
    pub conversation: ConversationId,
    pub kind: UpdateKind,
}

/// Per-conversation message lists for one session.
///
/// Cloning yields another handle onto the same store. Every operation runs to
/// completion under a short lock and never awaits, so callers on different
/// tasks always observe whole mutations.
#[derive(Debug, Clone)]
pub struct ConversationCache {
    entries: Arc<RwLock<HashMap<ConversationId, CacheEntry>>>,
    updates: broadcast::Sender<CacheUpdate>,
}

impl Default for ConversationCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationCache {
    pub fn new() -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CAPACITY);
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            updates,
        }
    }

    /// Registers an observer. Lagging receivers lose the oldest updates.
    pub fn subscribe(&self) -> broadcast::Receiver<CacheUpdate> {
        self.updates.subscribe()
    }

    pub fn get(&self, conversation: &ConversationId) -> Vec<Message> {
        self.read()
            .get(conversation)
            .map(|entry| entry.messages.clone())
            .unwrap_or_default()
    }

    pub fn contains(&self, conversation: &ConversationId) -> bool {
        self.read().contains_key(conversation)
    }

    pub fn is_hydrated(&self, conversation: &ConversationId) -> bool {
        self.read()
            .get(conversation)
            .is_some_and(|entry| entry.hydrated)
    }

    pub fn cursor(&self, conversation: &ConversationId) -> Option<PageCursor> {
        self.read().get(conversation).map(|entry| entry.cursor)
    }

    pub fn conversation(&self, conversation: &ConversationId) -> Option<Conversation> {
        self.read()
            .get(conversation)
            .and_then(|entry| entry.conversation.clone())
    }

    pub fn len(&self, conversation: &ConversationId) -> usize {
        self.read()
            .get(conversation)
            .map_or(0, |entry| entry.messages.len())
    }

    pub fn replace(&self, conversation: &ConversationId, messages: Vec<Message>) {
        {
            let mut entries = self.write();
            let entry = entries.entry(conversation.clone()).or_default();
            entry.messages = messages;
            entry.hydrated = true;
        }
        self.notify(conversation, UpdateKind::Replaced);
    }

    /// Installs a freshly fetched latest page.
    ///
    /// Messages already cached under this key that the page does not carry
    /// (live arrivals that raced the fetch) are kept at their sorted position.
    pub fn populate(
        &self,
        conversation: &ConversationId,
        meta: Option<Conversation>,
        page: Vec<Message>,
        cursor: PageCursor,
    ) {
        {
            let mut entries = self.write();
            let previous = entries.remove(conversation).unwrap_or_default();
            let mut entry = CacheEntry::new(page);
            entry.conversation = meta;
            entry.cursor = cursor;
            entry.hydrated = true;
            for message in previous.messages {
                entry.insert(message);
            }
            entries.insert(conversation.clone(), entry);
        }
        self.notify(conversation, UpdateKind::Replaced);
    }

    /// Inserts `message` unless its id is already cached. Returns whether the
    /// list changed.
    pub fn append(&self, conversation: &ConversationId, message: Message) -> bool {
        let id = message.id.clone();
        let inserted = self
            .write()
            .entry(conversation.clone())
            .or_default()
            .insert(message);
        if inserted {
            self.notify(conversation, UpdateKind::Appended(id));
        } else {
            trace!(conversation = %conversation, message = %id, "Duplicate append ignored");
        }
        inserted
    }

    /// Replaces only the content of a cached message.
    pub fn patch(&self, conversation: &ConversationId, id: &MessageId, content: &str) -> bool {
        let patched = self.with_message(conversation, id, |message| {
            message.content = content.to_string();
        });
        if patched {
            self.notify(conversation, UpdateKind::Patched(id.clone()));
        }
        patched
    }

    /// Replaces every field of the cached message with the same id. Unknown
    /// ids are ignored rather than inserted.
    pub fn replace_message(&self, conversation: &ConversationId, message: Message) -> bool {
        let id = message.id.clone();
        let replaced = self.with_message(conversation, &id, |slot| *slot = message);
        if replaced {
            self.notify(conversation, UpdateKind::Patched(id));
        }
        replaced
    }

    pub fn remove(&self, conversation: &ConversationId, id: &MessageId) -> bool {
        let removed = {
            let mut entries = self.write();
            match entries.get_mut(conversation) {
                Some(entry) => {
                    let before = entry.messages.len();
                    entry.messages.retain(|m| &m.id != id);
                    entry.messages.len() != before
                }
                None => false,
            }
        };
        if removed {
            self.notify(conversation, UpdateKind::Removed(id.clone()));
        }
        removed
    }

    /// Prepends an older page, skipping ids already present. Returns how many
    /// messages were actually added.
    pub fn merge_older(&self, conversation: &ConversationId, page: Vec<Message>) -> usize {
        let merged = self
            .write()
            .get_mut(conversation)
            .map_or(0, |entry| entry.merge_older(page));
        if merged > 0 {
            self.notify(conversation, UpdateKind::MergedOlder(merged));
        }
        merged
    }

    /// Claims the backward-pagination guard. Fails if the entry is absent, has
    /// no older history, or already has a fetch in flight.
    pub fn try_begin_older(&self, conversation: &ConversationId) -> bool {
        let claimed = {
            let mut entries = self.write();
            match entries.get_mut(conversation) {
                Some(entry) if entry.cursor.has_more && !entry.cursor.fetching_older => {
                    entry.cursor.fetching_older = true;
                    true
                }
                _ => false,
            }
        };
        if claimed {
            self.notify(conversation, UpdateKind::Cursor);
        }
        claimed
    }

    pub fn update_cursor(&self, conversation: &ConversationId, f: impl FnOnce(&mut PageCursor)) {
        let found = match self.write().get_mut(conversation) {
            Some(entry) => {
                f(&mut entry.cursor);
                true
            }
            None => false,
        };
        if found {
            self.notify(conversation, UpdateKind::Cursor);
        }
    }

    /// Drops the whole entry, e.g. after the conversation was deleted.
    pub fn forget(&self, conversation: &ConversationId) -> bool {
        let existed = self.write().remove(conversation).is_some();
        if existed {
            self.notify(conversation, UpdateKind::Forgotten);
        }
        existed
    }

    fn with_message(
        &self,
        conversation: &ConversationId,
        id: &MessageId,
        f: impl FnOnce(&mut Message),
    ) -> bool {
        let mut entries = self.write();
        let slot = entries
            .get_mut(conversation)
            .and_then(|entry| entry.messages.iter_mut().find(|m| &m.id == id));
        match slot {
            Some(message) => {
                f(message);
                true
            }
            None => false,
        }
    }

    fn notify(&self, conversation: &ConversationId, kind: UpdateKind) {
        // No receivers is fine
        let _ = self.updates.send(CacheUpdate {
            conversation: conversation.clone(),
            kind,
        });
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<ConversationId, CacheEntry>> {
        self.entries.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<ConversationId, CacheEntry>> {
        self.entries.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

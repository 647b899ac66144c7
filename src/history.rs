//! Loading persisted history into the [`ConversationCache`].
//!
//! Failures never touch cached state: they are logged and reported through the
//! returned outcome. A response for a conversation that is no longer the open
//! one is discarded.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::backend::{Backend, PageRequest};
use crate::conversations::{ConversationCache, ConversationId, PageCursor};

pub const DEFAULT_PAGE_SIZE: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Entry was already hydrated; no request was made.
    CacheHit,
    Loaded { fetched: usize, has_more: bool },
    /// Another initial load for the same conversation is running.
    InFlight,
    Stale,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OlderOutcome {
    /// Guard held by another fetch, no older history, or nothing cached yet.
    Skipped,
    Merged { merged: usize, has_more: bool },
    /// The count hint says everything has been loaded already.
    Exhausted,
    Stale,
    Failed,
}

#[derive(Clone)]
pub struct HistoryLoader {
    backend: Arc<dyn Backend>,
    cache: ConversationCache,
    page_size: usize,
    active: watch::Receiver<Option<ConversationId>>,
    loading: Arc<Mutex<HashSet<ConversationId>>>,
}

impl std::fmt::Debug for HistoryLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryLoader")
            .field("page_size", &self.page_size)
            .field("active", &*self.active.borrow())
            .finish_non_exhaustive()
    }
}

impl HistoryLoader {
    pub fn new(
        backend: Arc<dyn Backend>,
        cache: ConversationCache,
        page_size: usize,
        active: watch::Receiver<Option<ConversationId>>,
    ) -> Self {
        Self {
            backend,
            cache,
            page_size: page_size.max(1),
            active,
            loading: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn is_loading(&self, conversation: &ConversationId) -> bool {
        self.loading
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(conversation)
    }

    pub fn is_loading_older(&self, conversation: &ConversationId) -> bool {
        self.cache
            .cursor(conversation)
            .is_some_and(|cursor| cursor.fetching_older)
    }

    fn is_current(&self, conversation: &ConversationId) -> bool {
        self.active.borrow().as_ref() == Some(conversation)
    }

    /// Fetches the newest page unless the cache already holds this conversation.
    pub async fn load_initial(&self, conversation: &ConversationId) -> LoadOutcome {
        if self.cache.is_hydrated(conversation) {
            debug!(conversation = %conversation, "History cache hit");
            return LoadOutcome::CacheHit;
        }

        let Some(_loading) = LoadingGuard::claim(&self.loading, conversation) else {
            return LoadOutcome::InFlight;
        };

        let page = match self
            .backend
            .fetch_conversation(conversation, PageRequest::latest(self.page_size))
            .await
        {
            Ok(page) => page,
            Err(e) => {
                warn!(conversation = %conversation, error = %e, "Failed to load history");
                return LoadOutcome::Failed;
            }
        };

        if !self.is_current(conversation) {
            debug!(conversation = %conversation, "Discarding stale history page");
            return LoadOutcome::Stale;
        }

        let fetched = page.messages.len();
        let has_more = fetched >= self.page_size;
        self.cache.populate(
            conversation,
            Some(page.conversation),
            page.messages,
            PageCursor {
                loaded: fetched,
                has_more,
                fetching_older: false,
            },
        );

        info!(conversation = %conversation, fetched, has_more, "Loaded history");
        LoadOutcome::Loaded { fetched, has_more }
    }

    /// Fetches the next older page at the current cursor and merges it ahead
    /// of the cached list. Dropped, not queued, while another is in flight.
    pub async fn load_older(&self, conversation: &ConversationId) -> OlderOutcome {
        if !self.cache.try_begin_older(conversation) {
            return OlderOutcome::Skipped;
        }
        let fetch = OlderFetch::new(&self.cache, conversation);

        let total = match self.backend.message_count(conversation).await {
            Ok(total) => Some(total),
            Err(e) => {
                warn!(conversation = %conversation, error = %e, "Message count unavailable");
                None
            }
        };

        let offset = self.cache.cursor(conversation).map_or(0, |cursor| cursor.loaded);
        if total.is_some_and(|total| offset >= total) {
            fetch.finish(|cursor| cursor.has_more = false);
            return OlderOutcome::Exhausted;
        }

        let page = match self
            .backend
            .fetch_conversation(conversation, PageRequest::at(self.page_size, offset))
            .await
        {
            Ok(page) => page,
            Err(e) => {
                warn!(conversation = %conversation, offset, error = %e, "Failed to load older page");
                return OlderOutcome::Failed;
            }
        };

        if !self.is_current(conversation) {
            debug!(conversation = %conversation, "Discarding stale older page");
            return OlderOutcome::Stale;
        }

        let fetched = page.messages.len();
        let merged = self.cache.merge_older(conversation, page.messages);
        // A page made only of known ids still has to move the cursor forward
        let advance = if merged == 0 { fetched } else { merged };
        let page_size = self.page_size;

        let mut has_more = false;
        fetch.finish(|cursor| {
            cursor.loaded += advance;
            cursor.has_more =
                fetched >= page_size && !total.is_some_and(|total| cursor.loaded >= total);
            has_more = cursor.has_more;
        });

        info!(conversation = %conversation, fetched, merged, has_more, "Merged older page");
        OlderOutcome::Merged { merged, has_more }
    }
}

struct LoadingGuard {
    set: Arc<Mutex<HashSet<ConversationId>>>,
    conversation: ConversationId,
}

impl LoadingGuard {
    fn claim(set: &Arc<Mutex<HashSet<ConversationId>>>, conversation: &ConversationId) -> Option<Self> {
        let inserted = set
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(conversation.clone());
        inserted.then(|| Self {
            set: Arc::clone(set),
            conversation: conversation.clone(),
        })
    }
}

impl Drop for LoadingGuard {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&self.conversation);
    }
}

/// Holds the backward-pagination guard; releases it on every exit path.
struct OlderFetch<'a> {
    cache: &'a ConversationCache,
    conversation: ConversationId,
    finished: bool,
}

impl<'a> OlderFetch<'a> {
    fn new(cache: &'a ConversationCache, conversation: &ConversationId) -> Self {
        Self {
            cache,
            conversation: conversation.clone(),
            finished: false,
        }
    }

    fn finish(mut self, f: impl FnOnce(&mut PageCursor)) {
        self.finished = true;
        self.cache.update_cursor(&self.conversation, |cursor| {
            f(cursor);
            cursor.fetching_older = false;
        });
    }
}

impl Drop for OlderFetch<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.cache
                .update_cursor(&self.conversation, |cursor| cursor.fetching_older = false);
        }
    }
}

//! In-memory conversation store with per-id linearization.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::config::StoreConfig;
use crate::error::AgentError;

use super::types::{Conversation, ConversationId};

/// Shared handle to one conversation. Holding the lock for the duration of a
/// turn is what linearizes concurrent requests on the same id; requests for
/// different ids never contend.
pub type ConversationHandle = Arc<Mutex<Conversation>>;

/// Storage for live conversations, keyed by id.
///
/// The backing is injectable so a distributed store can replace the
/// in-memory map without changing callers.
pub trait ConversationStore: Send + Sync {
    /// Create a conversation with a fresh unique id.
    fn create(&self) -> (ConversationId, ConversationHandle);

    /// Look up a conversation by id.
    ///
    /// # Errors
    /// Returns `AgentError::ConversationNotFound` so the HTTP boundary can
    /// map an unknown id to a "conversation expired" response.
    fn get(&self, id: &str) -> Result<ConversationHandle, AgentError>;

    /// Drop a conversation.
    fn remove(&self, id: &str);

    /// Number of live conversations.
    fn len(&self) -> usize;

    /// Whether the store is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Process-local store backed by a concurrent map.
///
/// Eviction policy: conversations idle past the configured TTL are swept on
/// every `create`; if the store is still at capacity afterwards, the least
/// recently active conversations are dropped.
pub struct InMemoryConversationStore {
    config: StoreConfig,
    conversations: DashMap<ConversationId, ConversationHandle>,
}

impl InMemoryConversationStore {
    /// Create a store with the given limits.
    #[must_use]
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            conversations: DashMap::new(),
        }
    }

    fn sweep(&self) {
        let now = Utc::now();
        let ttl = chrono::Duration::seconds(self.config.idle_ttl_seconds.min(i64::MAX as u64) as i64);

        let expired: Vec<ConversationId> = self
            .conversations
            .iter()
            .filter_map(|entry| {
                // A locked conversation is mid-turn and therefore active.
                let conv = entry.value().try_lock().ok()?;
                (now - conv.last_active > ttl).then(|| entry.key().clone())
            })
            .collect();
        for id in expired {
            tracing::debug!(conversation_id = %id, "evicting idle conversation");
            self.conversations.remove(&id);
        }

        if self.conversations.len() >= self.config.max_conversations {
            let mut by_age: Vec<(ConversationId, chrono::DateTime<Utc>)> = self
                .conversations
                .iter()
                .filter_map(|entry| {
                    let conv = entry.value().try_lock().ok()?;
                    Some((entry.key().clone(), conv.last_active))
                })
                .collect();
            by_age.sort_by_key(|(_, last_active)| *last_active);

            let excess = self.conversations.len() + 1 - self.config.max_conversations;
            for (id, _) in by_age.into_iter().take(excess) {
                tracing::warn!(conversation_id = %id, "evicting conversation at capacity");
                self.conversations.remove(&id);
            }
        }
    }
}

impl ConversationStore for InMemoryConversationStore {
    fn create(&self) -> (ConversationId, ConversationHandle) {
        self.sweep();

        let conversation = Conversation::new();
        let id = conversation.id.clone();
        let handle: ConversationHandle = Arc::new(Mutex::new(conversation));
        self.conversations.insert(id.clone(), Arc::clone(&handle));
        (id, handle)
    }

    fn get(&self, id: &str) -> Result<ConversationHandle, AgentError> {
        self.conversations
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| AgentError::ConversationNotFound(id.to_string()))
    }

    fn remove(&self, id: &str) {
        self.conversations.remove(id);
    }

    fn len(&self) -> usize {
        self.conversations.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::types::Turn;

    fn small_store(max: usize) -> InMemoryConversationStore {
        InMemoryConversationStore::new(StoreConfig {
            max_conversations: max,
            idle_ttl_seconds: 3600,
        })
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = small_store(10);
        let (id, handle) = store.create();

        handle.lock().await.push_turn(Turn::user("hello"));

        let again = store.get(&id).expect("conversation should exist");
        assert_eq!(again.lock().await.turns.len(), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_get_unknown_id() {
        let store = small_store(10);
        let err = store.get("no-such-id").unwrap_err();
        assert!(matches!(err, AgentError::ConversationNotFound(_)));
    }

    #[test]
    fn test_capacity_eviction_drops_oldest() {
        let store = small_store(2);
        let (first, _) = store.create();
        let (second, _) = store.create();
        // Third create pushes the store past capacity; the oldest goes.
        let (third, _) = store.create();

        assert!(store.len() <= 2);
        assert!(store.get(&first).is_err());
        assert!(store.get(&second).is_ok());
        assert!(store.get(&third).is_ok());
    }

    #[tokio::test]
    async fn test_sequential_updates_observed() {
        let store = small_store(10);
        let (id, _) = store.create();

        {
            let handle = store.get(&id).unwrap();
            let mut conv = handle.lock().await;
            conv.push_turn(Turn::user("first"));
        }
        {
            let handle = store.get(&id).unwrap();
            let conv = handle.lock().await;
            assert_eq!(conv.turns.len(), 1);
            assert_eq!(conv.turns[0].text, "first");
        }
    }
}

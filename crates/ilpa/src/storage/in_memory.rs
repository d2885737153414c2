//! Process-local backend for the memory buffer and the conversation log

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StoreError;
use crate::memory::types::{
    ConversationMessage, EntryId, MemoryEntry, NewConversationMessage, NewMemoryEntry,
};
use crate::storage::{ConversationLog, EntryClock, MemoryStore, StoreResult, newest_first};

#[derive(Debug, Default)]
struct Inner {
    clock: EntryClock,
    memories: BTreeMap<EntryId, MemoryEntry>,
    messages: Vec<ConversationMessage>,
}

/// In-memory store backed by a `BTreeMap<EntryId, MemoryEntry>` and a message list.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Unavailable("in-memory store lock poisoned".to_string()))
    }

    /// Every stored memory entry, oldest first
    pub fn all_memories(&self) -> StoreResult<Vec<MemoryEntry>> {
        Ok(self.lock()?.memories.values().cloned().collect())
    }

    /// Every logged message, in insertion order
    pub fn all_messages(&self) -> StoreResult<Vec<ConversationMessage>> {
        Ok(self.lock()?.messages.clone())
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn append_memory(&self, entry: NewMemoryEntry) -> StoreResult<MemoryEntry> {
        let mut inner = self.lock()?;
        let (id, timestamp) = inner.clock.next();
        let entry = entry.into_entry(id, timestamp);
        inner.memories.insert(entry.id, entry.clone());
        Ok(entry)
    }

    async fn recent_memories(
        &self,
        user_id: &str,
        agent_type: &str,
        limit: usize,
    ) -> StoreResult<Vec<MemoryEntry>> {
        let inner = self.lock()?;
        let mut entries: Vec<MemoryEntry> = inner
            .memories
            .values()
            .filter(|e| e.user_id == user_id && e.agent_type == agent_type)
            .cloned()
            .collect();
        entries.sort_by(newest_first);
        entries.truncate(limit);
        Ok(entries)
    }

    async fn delete_memory(&self, id: EntryId) -> StoreResult<bool> {
        Ok(self.lock()?.memories.remove(&id).is_some())
    }

    async fn count_memories(&self, user_id: &str, agent_type: &str) -> StoreResult<usize> {
        let inner = self.lock()?;
        Ok(inner
            .memories
            .values()
            .filter(|e| e.user_id == user_id && e.agent_type == agent_type)
            .count())
    }
}

#[async_trait]
impl ConversationLog for InMemoryStore {
    async fn append_message(
        &self,
        message: NewConversationMessage,
    ) -> StoreResult<ConversationMessage> {
        let message = message.into_message(Uuid::new_v4());
        self.lock()?.messages.push(message.clone());
        Ok(message)
    }

    async fn recent_messages(
        &self,
        user_id: &str,
        limit: usize,
    ) -> StoreResult<Vec<ConversationMessage>> {
        let inner = self.lock()?;
        // Insertion order breaks timestamp ties
        let mut messages: Vec<(usize, &ConversationMessage)> = inner
            .messages
            .iter()
            .enumerate()
            .filter(|(_, m)| m.user_id == user_id)
            .collect();
        messages.sort_by(|(ia, a), (ib, b)| b.timestamp.cmp(&a.timestamp).then(ib.cmp(ia)));
        Ok(messages
            .into_iter()
            .take(limit)
            .map(|(_, m)| m.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::{LIFE_COACH_AGENT, MessageType};

    fn memory(user: &str, content: &str) -> NewMemoryEntry {
        NewMemoryEntry::new(user, LIFE_COACH_AGENT, content, None)
    }

    #[tokio::test]
    async fn test_append_assigns_increasing_ids() {
        let store = InMemoryStore::new();
        let a = store.append_memory(memory("u1", "User: a")).await.unwrap();
        let b = store.append_memory(memory("u1", "User: b")).await.unwrap();
        assert!(b.id > a.id);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_appends_order_by_timestamp_and_id_alike() {
        let store = std::sync::Arc::new(InMemoryStore::new());

        let handles: Vec<_> = (0..32)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .append_memory(memory("u1", &format!("User: {i}")))
                        .await
                        .unwrap()
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        // all_memories is id order; timestamps must never disagree with it
        let entries = store.all_memories().unwrap();
        assert_eq!(entries.len(), 32);
        assert!(entries.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[tokio::test]
    async fn test_recent_memories_newest_first_and_limited() {
        let store = InMemoryStore::new();
        for i in 0..6 {
            store
                .append_memory(memory("u1", &format!("User: {i}")))
                .await
                .unwrap();
        }
        store.append_memory(memory("u2", "User: other")).await.unwrap();

        let recent = store
            .recent_memories("u1", LIFE_COACH_AGENT, 3)
            .await
            .unwrap();
        let contents: Vec<_> = recent.iter().map(|e| e.content.as_str()).collect();
        assert_eq!(contents, vec!["User: 5", "User: 4", "User: 3"]);
    }

    #[tokio::test]
    async fn test_recent_memories_scoped_by_agent() {
        let store = InMemoryStore::new();
        store.append_memory(memory("u1", "User: coach")).await.unwrap();
        store
            .append_memory(NewMemoryEntry::new("u1", "health", "User: health", None))
            .await
            .unwrap();

        let recent = store.recent_memories("u1", "health", 10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].content, "User: health");
        assert_eq!(store.count_memories("u1", LIFE_COACH_AGENT).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = InMemoryStore::new();
        let entry = store.append_memory(memory("u1", "User: a")).await.unwrap();

        assert!(store.delete_memory(entry.id).await.unwrap());
        assert!(!store.delete_memory(entry.id).await.unwrap());
        assert_eq!(store.count_memories("u1", LIFE_COACH_AGENT).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_ids_not_reused_after_delete() {
        let store = InMemoryStore::new();
        let a = store.append_memory(memory("u1", "User: a")).await.unwrap();
        store.delete_memory(a.id).await.unwrap();
        let b = store.append_memory(memory("u1", "User: b")).await.unwrap();
        assert!(b.id > a.id);
    }

    #[tokio::test]
    async fn test_recent_messages_newest_first() {
        let store = InMemoryStore::new();
        for (i, kind) in [MessageType::User, MessageType::Assistant, MessageType::User]
            .into_iter()
            .enumerate()
        {
            store
                .append_message(NewConversationMessage::new(
                    "u1",
                    LIFE_COACH_AGENT,
                    kind,
                    format!("m{i}"),
                    Some("s".to_string()),
                ))
                .await
                .unwrap();
        }

        let recent = store.recent_messages("u1", 2).await.unwrap();
        let contents: Vec<_> = recent.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m2", "m1"]);
        assert!(store.recent_messages("nobody", 10).await.unwrap().is_empty());
    }
}

//! Storage seams for the memory buffer and the conversation log
//!
//! The core only talks to these traits. Backends:
//! - `LanceStore`: durable LanceDB tables on local disk
//! - `InMemoryStore`: process-local, for development and tests
//!
//! Every insert is an independent atomic append; the core holds no locks
//! across calls and relies on the backend's own write ordering.

pub mod in_memory;
pub mod lance;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::memory::types::{
    ConversationMessage, EntryId, MemoryEntry, NewConversationMessage, NewMemoryEntry,
};

pub use in_memory::InMemoryStore;
pub use lance::LanceStore;

/// Result type for storage operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Append-only, per-(user, agent) ordered memory buffer.
///
/// Guarantees:
/// - `append_memory` assigns a fresh id, strictly greater than every id it
///   handed out before.
/// - `recent_memories` returns newest-first, ordered by `(timestamp, id)`.
/// - `delete_memory` is idempotent: deleting an unknown id returns `Ok(false)`.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Durably insert an entry and return it with its assigned id
    async fn append_memory(&self, entry: NewMemoryEntry) -> StoreResult<MemoryEntry>;

    /// Up to `limit` most recent entries for the pair, newest first
    async fn recent_memories(
        &self,
        user_id: &str,
        agent_type: &str,
        limit: usize,
    ) -> StoreResult<Vec<MemoryEntry>>;

    /// Remove one entry. `Ok(false)` when nothing matched.
    async fn delete_memory(&self, id: EntryId) -> StoreResult<bool>;

    /// Number of stored entries for the pair
    async fn count_memories(&self, user_id: &str, agent_type: &str) -> StoreResult<usize>;
}

/// Append-only transcript of every user and assistant message.
#[async_trait]
pub trait ConversationLog: Send + Sync {
    /// Durably insert a message and return it with its assigned id
    async fn append_message(
        &self,
        message: NewConversationMessage,
    ) -> StoreResult<ConversationMessage>;

    /// Up to `limit` most recent messages for the user across agents, newest first
    async fn recent_messages(
        &self,
        user_id: &str,
        limit: usize,
    ) -> StoreResult<Vec<ConversationMessage>>;
}

/// A backend that serves both the memory buffer and the conversation log
pub trait ChatStore: MemoryStore + ConversationLog {}

impl<T: MemoryStore + ConversationLog> ChatStore for T {}

/// Shared handles to both halves of one backend
#[derive(Clone)]
pub struct StoreHandles {
    pub memory: Arc<dyn MemoryStore>,
    pub log: Arc<dyn ConversationLog>,
}

impl StoreHandles {
    /// Split a combined backend into its two trait objects
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: ChatStore + 'static,
    {
        Self {
            memory: store.clone(),
            log: store,
        }
    }
}

/// Hands out memory ids and timestamps as one step.
///
/// Backends call `next` under a single lock, so `(timestamp, id)` order always
/// matches assignment order, even if the wall clock steps backwards.
#[derive(Debug)]
pub(crate) struct EntryClock {
    last_id: u64,
    last_timestamp: DateTime<Utc>,
}

impl EntryClock {
    pub(crate) fn resume(last_id: u64, last_timestamp: DateTime<Utc>) -> Self {
        Self {
            last_id,
            last_timestamp,
        }
    }

    pub(crate) fn next(&mut self) -> (EntryId, DateTime<Utc>) {
        self.last_id += 1;
        self.last_timestamp = self.last_timestamp.max(Utc::now());
        (EntryId(self.last_id), self.last_timestamp)
    }
}

impl Default for EntryClock {
    fn default() -> Self {
        Self::resume(0, DateTime::<Utc>::MIN_UTC)
    }
}

/// Newest-first ordering shared by all backends
pub(crate) fn newest_first(a: &MemoryEntry, b: &MemoryEntry) -> std::cmp::Ordering {
    b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id))
}

/// Escape a string literal for a LanceDB SQL filter
pub(crate) fn sql_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn entry(id: u64, offset_secs: i64) -> MemoryEntry {
        MemoryEntry {
            id: EntryId(id),
            user_id: "u".to_string(),
            agent_type: "life_coach".to_string(),
            content: format!("entry {id}"),
            session_id: None,
            timestamp: Utc::now() + Duration::seconds(offset_secs),
        }
    }

    #[test]
    fn test_newest_first_orders_by_timestamp_then_id() {
        let base = Utc::now();
        let mut a = entry(1, 0);
        let mut b = entry(2, 0);
        a.timestamp = base;
        b.timestamp = base;
        let c = entry(3, -60);

        let mut entries = vec![c.clone(), a.clone(), b.clone()];
        entries.sort_by(newest_first);

        let ids: Vec<u64> = entries.iter().map(|e| e.id.as_u64()).collect();
        assert_eq!(ids, vec![2, 1, 3]);
    }

    #[test]
    fn test_entry_clock_never_runs_backwards() {
        let future = Utc::now() + Duration::hours(1);
        let mut clock = EntryClock::resume(41, future);

        let (first_id, first_ts) = clock.next();
        let (second_id, second_ts) = clock.next();

        assert_eq!((first_id, second_id), (EntryId(42), EntryId(43)));
        assert_eq!(first_ts, future);
        assert!(second_ts >= first_ts);
    }

    #[test]
    fn test_sql_quote_escapes_single_quotes() {
        assert_eq!(sql_quote("plain"), "'plain'");
        assert_eq!(sql_quote("o'brien"), "'o''brien'");
    }
}

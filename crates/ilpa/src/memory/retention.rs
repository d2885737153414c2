//! Memory retention
//!
//! Keeps the `buffer_capacity` newest entries of each (user, agent) buffer and
//! deletes the rest one by one, oldest first, so an interrupted pass always
//! leaves a contiguous newest suffix. Passes read then delete without a transaction,
//! so two concurrent passes may target the same entries; deletes are
//! idempotent and the bound converges once writers settle.

use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::Mutex as TokioMutex;
use tokio::task::JoinHandle;

use crate::config::MemoryConfig;
use crate::error::StoreError;
use crate::memory::types::EntryId;
use crate::storage::MemoryStore;

/// A retention pass that stopped early. Logged, never returned to a turn.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CleanupFailure {
    #[error("cleanup scan failed: {0}")]
    Scan(#[source] StoreError),

    #[error("failed to delete memory entry {id} after removing {removed}: {source}")]
    Delete {
        id: EntryId,
        removed: usize,
        #[source]
        source: StoreError,
    },
}

type PairLocks = DashMap<(String, String), Arc<TokioMutex<()>>>;

/// Trims memory buffers down to their capacity.
#[derive(Clone)]
pub struct RetentionEnforcer {
    store: Arc<dyn MemoryStore>,
    buffer_capacity: usize,
    batch_limit: usize,
    locks: Option<Arc<PairLocks>>,
}

impl RetentionEnforcer {
    pub fn new(store: Arc<dyn MemoryStore>, config: &MemoryConfig) -> Self {
        let locks = config
            .serialize_cleanup
            .then(|| Arc::new(PairLocks::new()));

        Self {
            store,
            buffer_capacity: config.buffer_capacity,
            batch_limit: config.cleanup_batch_limit,
            locks,
        }
    }

    /// Override the capacity, e.g. for a one-off prune
    pub fn with_capacity(mut self, buffer_capacity: usize) -> Self {
        self.buffer_capacity = buffer_capacity;
        self
    }

    pub fn buffer_capacity(&self) -> usize {
        self.buffer_capacity
    }

    /// Run one pass, stopping at the first failed delete.
    ///
    /// Returns how many entries were actually removed. Entries another pass
    /// already deleted are not counted.
    pub async fn try_enforce(
        &self,
        user_id: &str,
        agent_type: &str,
    ) -> Result<usize, CleanupFailure> {
        let _guard = match &self.locks {
            Some(locks) => {
                let lock = locks
                    .entry((user_id.to_string(), agent_type.to_string()))
                    .or_default()
                    .clone();
                Some(lock.lock_owned().await)
            }
            None => None,
        };

        let entries = self
            .store
            .recent_memories(user_id, agent_type, usize::MAX)
            .await
            .map_err(CleanupFailure::Scan)?;

        if entries.len() <= self.buffer_capacity {
            return Ok(0);
        }

        let mut removed = 0;
        // Newest-first scan; walk the excess from the oldest end
        let excess = &entries[self.buffer_capacity..];
        for entry in excess.iter().rev().take(self.batch_limit) {
            match self.store.delete_memory(entry.id).await {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(source) => {
                    return Err(CleanupFailure::Delete {
                        id: entry.id,
                        removed,
                        source,
                    });
                }
            }
        }

        Ok(removed)
    }

    /// Run one pass and swallow failures. Returns the removed count.
    pub async fn enforce(&self, user_id: &str, agent_type: &str) -> usize {
        match self.try_enforce(user_id, agent_type).await {
            Ok(removed) => {
                if removed > 0 {
                    tracing::info!(
                        "Cleaned up {removed} old memory entries for user {user_id} ({agent_type})"
                    );
                }
                removed
            }
            Err(e) => {
                tracing::warn!("Memory cleanup for user {user_id} ({agent_type}) failed: {e}");
                match e {
                    CleanupFailure::Delete { removed, .. } => removed,
                    CleanupFailure::Scan(_) => 0,
                }
            }
        }
    }

    /// Run one pass on the runtime without waiting for it
    pub fn spawn(&self, user_id: &str, agent_type: &str) -> JoinHandle<usize> {
        let enforcer = self.clone();
        let user_id = user_id.to_string();
        let agent_type = agent_type.to_string();
        tokio::spawn(async move { enforcer.enforce(&user_id, &agent_type).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::{LIFE_COACH_AGENT, NewMemoryEntry};
    use crate::storage::InMemoryStore;
    use crate::testing::FaultyStore;

    fn config(buffer_capacity: usize) -> MemoryConfig {
        MemoryConfig {
            buffer_capacity,
            ..MemoryConfig::default()
        }
    }

    async fn fill(store: &dyn MemoryStore, count: usize) {
        for i in 0..count {
            store
                .append_memory(NewMemoryEntry::new(
                    "u1",
                    LIFE_COACH_AGENT,
                    format!("entry {i}"),
                    None,
                ))
                .await
                .unwrap();
        }
    }

    /// Stored contents for u1, oldest first
    async fn contents(store: &dyn MemoryStore) -> Vec<String> {
        let mut entries = store
            .recent_memories("u1", LIFE_COACH_AGENT, usize::MAX)
            .await
            .unwrap();
        entries.reverse();
        entries.into_iter().map(|e| e.content).collect()
    }

    #[tokio::test]
    async fn test_no_op_at_or_below_capacity() {
        let store = Arc::new(InMemoryStore::new());
        fill(store.as_ref(), 3).await;

        let enforcer = RetentionEnforcer::new(store.clone(), &config(3));
        assert_eq!(enforcer.try_enforce("u1", LIFE_COACH_AGENT).await, Ok(0));
        assert_eq!(store.count_memories("u1", LIFE_COACH_AGENT).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_keeps_newest_entries() {
        let store = Arc::new(InMemoryStore::new());
        fill(store.as_ref(), 8).await;

        let enforcer = RetentionEnforcer::new(store.clone(), &config(5));
        assert_eq!(enforcer.try_enforce("u1", LIFE_COACH_AGENT).await, Ok(3));

        let kept: Vec<String> = store
            .all_memories()
            .unwrap()
            .into_iter()
            .map(|e| e.content)
            .collect();
        assert_eq!(
            kept,
            vec!["entry 3", "entry 4", "entry 5", "entry 6", "entry 7"]
        );
    }

    #[tokio::test]
    async fn test_second_pass_removes_nothing() {
        let store = Arc::new(InMemoryStore::new());
        fill(store.as_ref(), 12).await;

        let enforcer = RetentionEnforcer::new(store.clone(), &config(10));
        assert_eq!(enforcer.enforce("u1", LIFE_COACH_AGENT).await, 2);
        assert_eq!(enforcer.enforce("u1", LIFE_COACH_AGENT).await, 0);
    }

    #[tokio::test]
    async fn test_other_pairs_untouched() {
        let store = Arc::new(InMemoryStore::new());
        fill(store.as_ref(), 4).await;
        store
            .append_memory(NewMemoryEntry::new("u2", LIFE_COACH_AGENT, "other", None))
            .await
            .unwrap();

        let enforcer = RetentionEnforcer::new(store.clone(), &config(1));
        enforcer.enforce("u1", LIFE_COACH_AGENT).await;

        assert_eq!(store.count_memories("u1", LIFE_COACH_AGENT).await.unwrap(), 1);
        assert_eq!(store.count_memories("u2", LIFE_COACH_AGENT).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_partial_failure_then_retry() {
        let store = Arc::new(FaultyStore::new());
        fill(store.as_ref(), 6).await;
        store.fail_deletes_after(1);

        let enforcer = RetentionEnforcer::new(store.clone(), &config(2));
        let result = enforcer.try_enforce("u1", LIFE_COACH_AGENT).await;
        assert!(matches!(
            result,
            Err(CleanupFailure::Delete { removed: 1, .. })
        ));
        // Only the oldest entry went; the survivors are still a newest run
        assert_eq!(
            contents(store.as_ref()).await,
            ["entry 1", "entry 2", "entry 3", "entry 4", "entry 5"]
        );

        store.heal();
        assert_eq!(enforcer.enforce("u1", LIFE_COACH_AGENT).await, 3);
        assert_eq!(contents(store.as_ref()).await, ["entry 4", "entry 5"]);
    }

    #[tokio::test]
    async fn test_scan_failure_is_swallowed() {
        let store = Arc::new(FaultyStore::new());
        fill(store.as_ref(), 4).await;
        store.fail_queries_after(0);

        let enforcer = RetentionEnforcer::new(store.clone(), &config(1));
        assert!(matches!(
            enforcer.try_enforce("u1", LIFE_COACH_AGENT).await,
            Err(CleanupFailure::Scan(StoreError::Unavailable(_)))
        ));
        assert_eq!(enforcer.enforce("u1", LIFE_COACH_AGENT).await, 0);
    }

    #[tokio::test]
    async fn test_batch_limit_deletes_oldest_and_converges_over_passes() {
        let store = Arc::new(InMemoryStore::new());
        fill(store.as_ref(), 10).await;

        let config = MemoryConfig {
            buffer_capacity: 2,
            cleanup_batch_limit: 2,
            ..MemoryConfig::default()
        };
        let enforcer = RetentionEnforcer::new(store.clone(), &config);

        assert_eq!(enforcer.enforce("u1", LIFE_COACH_AGENT).await, 2);
        assert_eq!(
            contents(store.as_ref()).await,
            ["entry 2", "entry 3", "entry 4", "entry 5", "entry 6", "entry 7", "entry 8", "entry 9"]
        );
        while enforcer.enforce("u1", LIFE_COACH_AGENT).await > 0 {}
        assert_eq!(store.count_memories("u1", LIFE_COACH_AGENT).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_spawned_pass_reports_removed() {
        let store = Arc::new(InMemoryStore::new());
        fill(store.as_ref(), 7).await;

        let enforcer = RetentionEnforcer::new(store.clone(), &config(4));
        let removed = enforcer.spawn("u1", LIFE_COACH_AGENT).await.unwrap();
        assert_eq!(removed, 3);
    }

    #[tokio::test]
    async fn test_serialized_passes_do_not_double_count() {
        let store = Arc::new(InMemoryStore::new());
        fill(store.as_ref(), 20).await;

        let config = MemoryConfig {
            buffer_capacity: 5,
            serialize_cleanup: true,
            ..MemoryConfig::default()
        };
        let enforcer = RetentionEnforcer::new(store.clone(), &config);

        let a = enforcer.spawn("u1", LIFE_COACH_AGENT);
        let b = enforcer.spawn("u1", LIFE_COACH_AGENT);
        let total = a.await.unwrap() + b.await.unwrap();

        assert_eq!(total, 15);
        assert_eq!(store.count_memories("u1", LIFE_COACH_AGENT).await.unwrap(), 5);
    }
}

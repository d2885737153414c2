//! Integration tests for memory retention
//!
//! Covers the bound, the keep-newest rule and racing cleanup passes on both
//! backends.

use std::collections::BTreeSet;
use std::sync::Arc;

use ilpa_server::config::MemoryConfig;
use ilpa_server::memory::{EntryId, LIFE_COACH_AGENT, NewMemoryEntry, RetentionEnforcer};
use ilpa_server::storage::{InMemoryStore, LanceStore, MemoryStore};
use tempfile::tempdir;

fn config(buffer_capacity: usize) -> MemoryConfig {
    MemoryConfig {
        buffer_capacity,
        ..MemoryConfig::default()
    }
}

async fn fill(store: &dyn MemoryStore, user: &str, count: usize) -> Vec<EntryId> {
    let mut ids = Vec::with_capacity(count);
    for i in 0..count {
        let entry = store
            .append_memory(NewMemoryEntry::new(
                user,
                LIFE_COACH_AGENT,
                format!("User: note {i}"),
                None,
            ))
            .await
            .unwrap();
        ids.push(entry.id);
    }
    ids
}

async fn surviving_ids(store: &dyn MemoryStore, user: &str) -> BTreeSet<EntryId> {
    store
        .recent_memories(user, LIFE_COACH_AGENT, usize::MAX)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.id)
        .collect()
}

mod bound_tests {
    use super::*;

    #[tokio::test]
    async fn test_survivors_are_exactly_the_newest() {
        let store = Arc::new(InMemoryStore::new());
        let ids = fill(store.as_ref(), "u1", 37).await;

        let enforcer = RetentionEnforcer::new(store.clone(), &config(12));
        assert_eq!(enforcer.enforce("u1", LIFE_COACH_AGENT).await, 25);

        let expected: BTreeSet<EntryId> = ids[25..].iter().copied().collect();
        assert_eq!(surviving_ids(store.as_ref(), "u1").await, expected);
    }

    #[tokio::test]
    async fn test_interleaved_writes_and_passes_stay_bounded() {
        let store = Arc::new(InMemoryStore::new());
        let enforcer = RetentionEnforcer::new(store.clone(), &config(5));

        for _ in 0..20 {
            fill(store.as_ref(), "u1", 2).await;
            enforcer.enforce("u1", LIFE_COACH_AGENT).await;
            let count = store.count_memories("u1", LIFE_COACH_AGENT).await.unwrap();
            assert!(count <= 5);
        }

        // No write since the last pass
        assert_eq!(enforcer.enforce("u1", LIFE_COACH_AGENT).await, 0);
    }
}

mod race_tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_racing_passes_converge() {
        let store = Arc::new(InMemoryStore::new());
        let ids = fill(store.as_ref(), "u1", 60).await;
        let enforcer = RetentionEnforcer::new(store.clone(), &config(10));

        let handles: Vec<_> = (0..4)
            .map(|_| enforcer.spawn("u1", LIFE_COACH_AGENT))
            .collect();

        let mut removed = 0;
        for handle in handles {
            removed += handle.await.unwrap();
        }

        // Overlapping deletes are no-ops, so each entry is counted once
        assert_eq!(removed, 50);
        let expected: BTreeSet<EntryId> = ids[50..].iter().copied().collect();
        assert_eq!(surviving_ids(store.as_ref(), "u1").await, expected);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_racing_writers_and_passes_settle() {
        let store = Arc::new(InMemoryStore::new());
        let enforcer = RetentionEnforcer::new(store.clone(), &config(8));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let store = store.clone();
            let enforcer = enforcer.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..10 {
                    fill(store.as_ref(), "u1", 2).await;
                    enforcer.enforce("u1", LIFE_COACH_AGENT).await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        enforcer.enforce("u1", LIFE_COACH_AGENT).await;
        let count = store.count_memories("u1", LIFE_COACH_AGENT).await.unwrap();
        assert_eq!(count, 8);
    }
}

mod lance_tests {
    use super::*;

    #[tokio::test]
    async fn test_retention_on_lance_backend() {
        let dir = tempdir().unwrap();
        let store = Arc::new(LanceStore::open(dir.path()).await.unwrap());
        let ids = fill(store.as_ref(), "u1", 9).await;
        fill(store.as_ref(), "u2", 3).await;

        let enforcer = RetentionEnforcer::new(store.clone(), &config(4));
        assert_eq!(enforcer.enforce("u1", LIFE_COACH_AGENT).await, 5);
        assert_eq!(enforcer.enforce("u1", LIFE_COACH_AGENT).await, 0);

        let expected: BTreeSet<EntryId> = ids[5..].iter().copied().collect();
        assert_eq!(surviving_ids(store.as_ref(), "u1").await, expected);
        assert_eq!(store.count_memories("u2", LIFE_COACH_AGENT).await.unwrap(), 3);
    }
}

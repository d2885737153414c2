//! Test doubles for the store and gateway seams
//!
//! - `ScriptedGateway`: replies with fixed text (or fails) and records prompts
//! - `FaultyStore`: an `InMemoryStore` with switchable failures

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::completion::{CompletionGateway, GatewayError, SamplingParams};
use crate::error::StoreError;
use crate::memory::types::{
    ConversationMessage, EntryId, MemoryEntry, NewConversationMessage, NewMemoryEntry,
};
use crate::storage::{ConversationLog, InMemoryStore, MemoryStore, StoreResult};

/// Gateway returning a scripted reply
#[derive(Debug)]
pub struct ScriptedGateway {
    reply: Result<String, GatewayError>,
    prompts: Mutex<Vec<(String, SamplingParams)>>,
}

impl ScriptedGateway {
    /// Always reply with `text`
    pub fn replying(text: impl Into<String>) -> Self {
        Self {
            reply: Ok(text.into()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Always fail with `error`
    pub fn failing(error: GatewayError) -> Self {
        Self {
            reply: Err(error),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Prompts received so far, in call order
    pub fn prompts(&self) -> Vec<String> {
        self.calls().into_iter().map(|(prompt, _)| prompt).collect()
    }

    /// Prompts and sampling parameters received so far
    pub fn calls(&self) -> Vec<(String, SamplingParams)> {
        self.prompts
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl CompletionGateway for ScriptedGateway {
    async fn generate(
        &self,
        prompt: &str,
        params: SamplingParams,
    ) -> Result<String, GatewayError> {
        if let Ok(mut calls) = self.prompts.lock() {
            calls.push((prompt.to_string(), params));
        }
        self.reply.clone()
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// Lets a fixed number of calls through, then fails every call
#[derive(Debug)]
struct Tripwire(AtomicUsize);

impl Tripwire {
    const DISARMED: usize = usize::MAX;

    fn new() -> Self {
        Self(AtomicUsize::new(Self::DISARMED))
    }

    fn arm(&self, successes: usize) {
        self.0.store(successes, Ordering::SeqCst);
    }

    fn disarm(&self) {
        self.0.store(Self::DISARMED, Ordering::SeqCst);
    }

    fn pass(&self) -> bool {
        self.0
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| match left {
                Self::DISARMED => Some(left),
                0 => None,
                n => Some(n - 1),
            })
            .is_ok()
    }
}

/// In-memory store that fails on demand.
///
/// Each `fail_*_after(n)` lets `n` more calls of that kind succeed and fails
/// the rest until `heal` is called.
#[derive(Debug)]
pub struct FaultyStore {
    inner: InMemoryStore,
    memory_appends: Tripwire,
    message_appends: Tripwire,
    queries: Tripwire,
    deletes: Tripwire,
}

impl Default for FaultyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FaultyStore {
    pub fn new() -> Self {
        Self {
            inner: InMemoryStore::new(),
            memory_appends: Tripwire::new(),
            message_appends: Tripwire::new(),
            queries: Tripwire::new(),
            deletes: Tripwire::new(),
        }
    }

    /// The wrapped store, bypassing every fault
    pub fn inner(&self) -> &InMemoryStore {
        &self.inner
    }

    pub fn fail_memory_appends_after(&self, successes: usize) {
        self.memory_appends.arm(successes);
    }

    pub fn fail_message_appends_after(&self, successes: usize) {
        self.message_appends.arm(successes);
    }

    /// Fails memory and message reads alike
    pub fn fail_queries_after(&self, successes: usize) {
        self.queries.arm(successes);
    }

    pub fn fail_deletes_after(&self, successes: usize) {
        self.deletes.arm(successes);
    }

    /// Clear every injected fault
    pub fn heal(&self) {
        self.memory_appends.disarm();
        self.message_appends.disarm();
        self.queries.disarm();
        self.deletes.disarm();
    }
}

#[async_trait]
impl MemoryStore for FaultyStore {
    async fn append_memory(&self, entry: NewMemoryEntry) -> StoreResult<MemoryEntry> {
        if !self.memory_appends.pass() {
            return Err(StoreError::WriteRejected("injected memory append failure".into()));
        }
        self.inner.append_memory(entry).await
    }

    async fn recent_memories(
        &self,
        user_id: &str,
        agent_type: &str,
        limit: usize,
    ) -> StoreResult<Vec<MemoryEntry>> {
        if !self.queries.pass() {
            return Err(StoreError::Unavailable("injected query failure".into()));
        }
        self.inner.recent_memories(user_id, agent_type, limit).await
    }

    async fn delete_memory(&self, id: EntryId) -> StoreResult<bool> {
        if !self.deletes.pass() {
            return Err(StoreError::Unavailable("injected delete failure".into()));
        }
        self.inner.delete_memory(id).await
    }

    async fn count_memories(&self, user_id: &str, agent_type: &str) -> StoreResult<usize> {
        self.inner.count_memories(user_id, agent_type).await
    }
}

#[async_trait]
impl ConversationLog for FaultyStore {
    async fn append_message(
        &self,
        message: NewConversationMessage,
    ) -> StoreResult<ConversationMessage> {
        if !self.message_appends.pass() {
            return Err(StoreError::WriteRejected("injected message append failure".into()));
        }
        self.inner.append_message(message).await
    }

    async fn recent_messages(
        &self,
        user_id: &str,
        limit: usize,
    ) -> StoreResult<Vec<ConversationMessage>> {
        if !self.queries.pass() {
            return Err(StoreError::Unavailable("injected query failure".into()));
        }
        self.inner.recent_messages(user_id, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::LIFE_COACH_AGENT;

    #[tokio::test]
    async fn scripted_gateway_records_prompts() {
        let gateway = ScriptedGateway::replying("hi there");
        let reply = gateway
            .generate("prompt one", SamplingParams::default())
            .await
            .unwrap();

        assert_eq!(reply, "hi there");
        assert_eq!(gateway.prompts(), vec!["prompt one".to_string()]);
    }

    #[tokio::test]
    async fn scripted_gateway_fails_on_demand() {
        let gateway = ScriptedGateway::failing(GatewayError::Timeout("slow".into()));
        let result = gateway.generate("p", SamplingParams::default()).await;
        assert_eq!(result, Err(GatewayError::Timeout("slow".into())));
    }

    #[tokio::test]
    async fn faulty_store_trips_after_successes() {
        let store = FaultyStore::new();
        store.fail_memory_appends_after(1);

        let entry = NewMemoryEntry::new("u1", LIFE_COACH_AGENT, "User: a", None);
        assert!(store.append_memory(entry.clone()).await.is_ok());
        assert!(matches!(
            store.append_memory(entry.clone()).await,
            Err(StoreError::WriteRejected(_))
        ));

        store.heal();
        assert!(store.append_memory(entry).await.is_ok());
        assert_eq!(store.inner().all_memories().unwrap().len(), 2);
    }
}

//! Context assembly
//!
//! Reads the newest memory entries for a (user, agent) pair and folds them,
//! oldest first, between a fixed preamble and the current message.

use std::sync::Arc;

use crate::config::MemoryConfig;
use crate::error::StoreError;
use crate::memory::types::MemoryEntry;
use crate::storage::MemoryStore;

const CONTEXT_HEADER: &str = "\n\nRecent conversation context:";

/// Builds the prompt sent to the completion gateway.
///
/// Two limits apply: `context_window` entries are fetched from the store and
/// only the newest `context_entries` of those are rendered.
pub struct ContextAssembler {
    store: Arc<dyn MemoryStore>,
    context_window: usize,
    context_entries: usize,
    preamble: String,
    cue: String,
}

impl ContextAssembler {
    pub fn new(
        store: Arc<dyn MemoryStore>,
        config: &MemoryConfig,
        preamble: impl Into<String>,
        cue: impl Into<String>,
    ) -> Self {
        Self {
            store,
            context_window: config.context_window,
            context_entries: config.effective_context_entries(),
            preamble: preamble.into(),
            cue: cue.into(),
        }
    }

    /// Number of entries that actually reach the prompt
    pub fn context_entries(&self) -> usize {
        self.context_entries
    }

    /// Up to `context_window` most recent entries, newest first.
    ///
    /// Store failures are returned as-is; there is no fallback to an empty window.
    pub async fn fetch_window(
        &self,
        user_id: &str,
        agent_type: &str,
    ) -> Result<Vec<MemoryEntry>, StoreError> {
        self.store
            .recent_memories(user_id, agent_type, self.context_window)
            .await
    }

    /// Format a prompt from a newest-first window and the current message
    pub fn render(&self, window: &[MemoryEntry], current_message: &str) -> String {
        let mut parts: Vec<&str> = vec![self.preamble.as_str()];

        if !window.is_empty() {
            parts.push(CONTEXT_HEADER);
            parts.extend(
                window
                    .iter()
                    .take(self.context_entries)
                    .rev()
                    .map(|entry| entry.content.as_str()),
            );
        }

        let current = format!("\n\nCurrent message: {current_message}");
        parts.push(&current);
        parts.push(&self.cue);

        parts.join("\n")
    }

    /// Fetch the window and render it in one step
    pub async fn assemble(
        &self,
        user_id: &str,
        agent_type: &str,
        current_message: &str,
    ) -> Result<String, StoreError> {
        let window = self.fetch_window(user_id, agent_type).await?;
        Ok(self.render(&window, current_message))
    }
}

//! Per-message conversation cycle
//!
//! Start -> snapshot -> persist inbound -> assemble -> generate -> persist
//! outbound -> reclaim -> done. Storage failures abort the turn; generation
//! failures are replaced by a fixed reply.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::coach::prompts::{FALLBACK_REPLY, LIFE_COACH_PREAMBLE, RESPONSE_CUE};
use crate::completion::{CompletionGateway, SamplingParams};
use crate::config::{MemoryConfig, ReclaimMode};
use crate::error::StoreError;
use crate::memory::context::ContextAssembler;
use crate::memory::retention::RetentionEnforcer;
use crate::memory::session::SessionId;
use crate::memory::types::{
    LIFE_COACH_AGENT, MessageType, NewConversationMessage, NewMemoryEntry,
};
use crate::storage::StoreHandles;

/// Step at which a turn was aborted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnStage {
    /// Reading the memory window that precedes the turn
    Snapshot,
    PersistInbound,
    PersistOutbound,
}

impl fmt::Display for TurnStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self {
            TurnStage::Snapshot => "snapshot",
            TurnStage::PersistInbound => "persist_inbound",
            TurnStage::PersistOutbound => "persist_outbound",
        };
        f.write_str(stage)
    }
}

/// A turn that could not be completed. No reply is produced.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TurnError {
    #[error("turn aborted during {stage}: {source}")]
    Aborted {
        stage: TurnStage,
        #[source]
        source: StoreError,
    },
}

impl TurnError {
    pub fn stage(&self) -> TurnStage {
        match self {
            TurnError::Aborted { stage, .. } => *stage,
        }
    }
}

/// Reply returned for a completed turn
#[derive(Debug, Clone, PartialEq)]
pub struct TurnReply {
    pub content: String,
    pub session_id: SessionId,
    pub timestamp: DateTime<Utc>,
    pub agent_type: String,
    /// The provider failed and `content` is the fixed fallback text
    pub fallback: bool,
}

/// Drives one conversational agent over shared stores.
///
/// Holds no per-conversation state; concurrent calls are independent.
pub struct ConversationOrchestrator {
    stores: StoreHandles,
    gateway: Arc<dyn CompletionGateway>,
    assembler: ContextAssembler,
    retention: RetentionEnforcer,
    reclaim: ReclaimMode,
    sampling: SamplingParams,
    agent_type: String,
}

impl ConversationOrchestrator {
    pub fn new(
        stores: StoreHandles,
        gateway: Arc<dyn CompletionGateway>,
        config: &MemoryConfig,
        sampling: SamplingParams,
    ) -> Self {
        let assembler = ContextAssembler::new(
            stores.memory.clone(),
            config,
            LIFE_COACH_PREAMBLE,
            RESPONSE_CUE,
        );
        let retention = RetentionEnforcer::new(stores.memory.clone(), config);

        Self {
            stores,
            gateway,
            assembler,
            retention,
            reclaim: config.reclaim,
            sampling,
            agent_type: LIFE_COACH_AGENT.to_string(),
        }
    }

    pub fn agent_type(&self) -> &str {
        &self.agent_type
    }

    /// Handle one inbound message and produce the coach's reply
    pub async fn process_message(
        &self,
        user_id: &str,
        content: &str,
        session_id: Option<SessionId>,
    ) -> Result<TurnReply, TurnError> {
        let session_id = session_id.unwrap_or_else(SessionId::generate);
        let agent_type = self.agent_type.as_str();

        let window = self
            .assembler
            .fetch_window(user_id, agent_type)
            .await
            .map_err(|source| self.abort(TurnStage::Snapshot, source))?;
        debug!(
            "Turn for user {user_id} in session {session_id}: {} memory entries in window",
            window.len()
        );

        self.persist_inbound(user_id, content, &session_id).await?;

        let prompt = self.assembler.render(&window, content);

        let (reply, fallback) = match self.gateway.generate(&prompt, self.sampling).await {
            Ok(text) => (text, false),
            Err(e) => {
                warn!(
                    "Completion via {} failed, using fallback reply: {e}",
                    self.gateway.name()
                );
                (FALLBACK_REPLY.to_string(), true)
            }
        };

        self.persist_outbound(user_id, &reply, &session_id, fallback)
            .await?;

        match self.reclaim {
            ReclaimMode::Inline => {
                self.retention.enforce(user_id, agent_type).await;
            }
            ReclaimMode::Background => {
                self.retention.spawn(user_id, agent_type);
            }
        }

        Ok(TurnReply {
            content: reply,
            session_id,
            timestamp: Utc::now(),
            agent_type: self.agent_type.clone(),
            fallback,
        })
    }

    /// Write the user message to the memory buffer, then the log.
    ///
    /// If the log write fails the memory entry is removed again so the turn
    /// leaves no record behind.
    async fn persist_inbound(
        &self,
        user_id: &str,
        content: &str,
        session_id: &SessionId,
    ) -> Result<(), TurnError> {
        let message = NewConversationMessage::new(
            user_id,
            &self.agent_type,
            MessageType::User,
            content,
            Some(session_id.to_string()),
        );
        self.persist_pair(TurnStage::PersistInbound, message).await
    }

    async fn persist_outbound(
        &self,
        user_id: &str,
        reply: &str,
        session_id: &SessionId,
        fallback: bool,
    ) -> Result<(), TurnError> {
        let mut message = NewConversationMessage::new(
            user_id,
            &self.agent_type,
            MessageType::Assistant,
            reply,
            Some(session_id.to_string()),
        );
        if fallback {
            message = message.with_metadata("fallback", Value::Bool(true));
        }
        self.persist_pair(TurnStage::PersistOutbound, message).await
    }

    /// Record one message in the memory buffer and then the log.
    ///
    /// A failed log write deletes the memory entry again, so a half that
    /// aborts leaves nothing behind in either store.
    async fn persist_pair(
        &self,
        stage: TurnStage,
        message: NewConversationMessage,
    ) -> Result<(), TurnError> {
        let entry = self
            .stores
            .memory
            .append_memory(NewMemoryEntry::new(
                &message.user_id,
                &message.agent_type,
                format!("{}: {}", message.message_type.speaker_label(), message.content),
                message.session_id.clone(),
            ))
            .await
            .map_err(|source| self.abort(stage, source))?;

        if let Err(source) = self.stores.log.append_message(message).await {
            if let Err(e) = self.stores.memory.delete_memory(entry.id).await {
                error!("Failed to roll back memory entry {} after log failure: {e}", entry.id);
            }
            return Err(self.abort(stage, source));
        }

        Ok(())
    }

    fn abort(&self, stage: TurnStage, source: StoreError) -> TurnError {
        error!("Turn aborted during {stage}: {source}");
        TurnError::Aborted { stage, source }
    }
}

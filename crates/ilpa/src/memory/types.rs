//! Record types for the memory buffer and the conversation log
//!
//! Memory entries are the rolling context the coach sees; conversation
//! messages are the permanent transcript shown in history views.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Agent identifier of the life coach
pub const LIFE_COACH_AGENT: &str = "life_coach";

/// Store-assigned identity of a memory entry.
///
/// Ids grow strictly with insertion order within one store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(pub u64);

impl EntryId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single line of the rolling memory buffer. Never mutated once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: EntryId,
    pub user_id: String,
    pub agent_type: String,
    /// Speaker-prefixed text, e.g. `User: hello`
    pub content: String,
    pub session_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// A memory entry before the store has assigned it an id and a timestamp
#[derive(Debug, Clone, PartialEq)]
pub struct NewMemoryEntry {
    pub user_id: String,
    pub agent_type: String,
    pub content: String,
    pub session_id: Option<String>,
}

impl NewMemoryEntry {
    pub fn new(
        user_id: impl Into<String>,
        agent_type: impl Into<String>,
        content: impl Into<String>,
        session_id: Option<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            agent_type: agent_type.into(),
            content: content.into(),
            session_id,
        }
    }

    /// Attach the id and timestamp the store assigned together
    pub fn into_entry(self, id: EntryId, timestamp: DateTime<Utc>) -> MemoryEntry {
        MemoryEntry {
            id,
            user_id: self.user_id,
            agent_type: self.agent_type,
            content: self.content,
            session_id: self.session_id,
            timestamp,
        }
    }
}

/// Who authored a conversation message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    User,
    Assistant,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::User => "user",
            MessageType::Assistant => "assistant",
        }
    }

    /// Prefix used when the message is folded into the memory buffer
    pub fn speaker_label(&self) -> &'static str {
        match self {
            MessageType::User => "User",
            MessageType::Assistant => "Assistant",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "user" => Some(MessageType::User),
            "assistant" => Some(MessageType::Assistant),
            _ => None,
        }
    }
}

/// One transcript line. Written once, never deleted by the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub id: Uuid,
    pub user_id: String,
    pub agent_type: String,
    pub message_type: MessageType,
    pub content: String,
    pub session_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// A transcript line before the log has assigned it an id
#[derive(Debug, Clone, PartialEq)]
pub struct NewConversationMessage {
    pub user_id: String,
    pub agent_type: String,
    pub message_type: MessageType,
    pub content: String,
    pub session_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub metadata: Map<String, Value>,
}

impl NewConversationMessage {
    /// Create a new message stamped with the current time and empty metadata
    pub fn new(
        user_id: impl Into<String>,
        agent_type: impl Into<String>,
        message_type: MessageType,
        content: impl Into<String>,
        session_id: Option<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            agent_type: agent_type.into(),
            message_type,
            content: content.into(),
            session_id,
            timestamp: Utc::now(),
            metadata: Map::new(),
        }
    }

    /// Attach an opaque metadata value
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Attach the log-assigned id
    pub fn into_message(self, id: Uuid) -> ConversationMessage {
        ConversationMessage {
            id,
            user_id: self.user_id,
            agent_type: self.agent_type,
            message_type: self.message_type,
            content: self.content,
            session_id: self.session_id,
            timestamp: self.timestamp,
            metadata: self.metadata,
        }
    }
}

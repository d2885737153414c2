//! Bounded conversation memory
//!
//! - `context`: folds the newest memory entries into a prompt
//! - `retention`: keeps each (user, agent) buffer at its configured capacity
//! - `session`: correlation tokens carried on every record
//! - `types`: memory entries and conversation messages

pub mod context;
pub mod retention;
pub mod session;
pub mod types;

pub use context::ContextAssembler;
pub use retention::{CleanupFailure, RetentionEnforcer};
pub use session::{SessionId, SessionIdError};
pub use types::{
    ConversationMessage, EntryId, LIFE_COACH_AGENT, MemoryEntry, MessageType,
    NewConversationMessage, NewMemoryEntry,
};

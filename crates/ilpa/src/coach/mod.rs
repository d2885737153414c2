//! The life coach: one conversational agent built on the memory core

pub mod orchestrator;
pub mod prompts;

pub use orchestrator::{ConversationOrchestrator, TurnError, TurnReply, TurnStage};

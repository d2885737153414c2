//! ILPA - conversational life-coach backend
//!
//! Accepts chat messages, folds the most recent memory buffer into a prompt,
//! asks a language-model provider for a reply and keeps the per-user memory
//! buffer bounded over time.

pub mod coach;
pub mod completion;
pub mod config;
pub mod error;
pub mod memory;
pub mod server;
pub mod storage;
pub mod testing;

pub use error::IlpaError;

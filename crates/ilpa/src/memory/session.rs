//! Session correlation tokens
//!
//! A session groups the messages and memory entries of one logical
//! conversation. It has no record of its own; the token is carried on every
//! entry. Tokens are opaque: any non-blank text of at most 128 characters
//! without control characters.

use thiserror::Error;
use uuid::Uuid;

/// Maximum length for session IDs
const MAX_SESSION_ID_LEN: usize = 128;

/// Errors that can occur during session ID validation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionIdError {
    #[error("Session ID cannot be empty")]
    Empty,

    #[error("Session ID must not contain control characters")]
    ControlChars,

    #[error("Session ID exceeds maximum length of {MAX_SESSION_ID_LEN} characters")]
    TooLong,
}

/// A validated session ID
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    /// Mint a fresh, unique session token
    pub fn generate() -> Self {
        SessionId(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(s: &str) -> Result<(), SessionIdError> {
        if s.trim().is_empty() {
            return Err(SessionIdError::Empty);
        }

        if s.chars().count() > MAX_SESSION_ID_LEN {
            return Err(SessionIdError::TooLong);
        }

        if s.chars().any(char::is_control) {
            return Err(SessionIdError::ControlChars);
        }

        Ok(())
    }
}

impl TryFrom<&str> for SessionId {
    type Error = SessionIdError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::validate(value)?;
        Ok(SessionId(value.to_string()))
    }
}

impl TryFrom<String> for SessionId {
    type Error = SessionIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::validate(&value)?;
        Ok(SessionId(value))
    }
}

impl From<SessionId> for String {
    fn from(session_id: SessionId) -> Self {
        session_id.0
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

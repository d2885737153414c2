//! Error types for ILPA

use thiserror::Error;

use crate::coach::TurnError;
use crate::completion::GatewayError;

/// Main error type for ILPA startup, configuration and serving
#[derive(Error, Debug)]
pub enum IlpaError {
    /// Storage-related errors (LanceDB, file system, etc.)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Completion provider errors
    #[error("Completion error: {0}")]
    Completion(String),

    /// HTTP server errors
    #[error("Server error: {0}")]
    Server(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type alias for ILPA operations
pub type Result<T> = std::result::Result<T, IlpaError>;

/// Durability failures raised by the memory store and the conversation log.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backend could not be reached or could not serve the read
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The backend refused to persist a record
    #[error("write rejected: {0}")]
    WriteRejected(String),
}

impl From<StoreError> for IlpaError {
    fn from(e: StoreError) -> Self {
        IlpaError::Storage(e.to_string())
    }
}

impl From<GatewayError> for IlpaError {
    fn from(e: GatewayError) -> Self {
        IlpaError::Completion(e.to_string())
    }
}

impl From<TurnError> for IlpaError {
    fn from(e: TurnError) -> Self {
        IlpaError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for IlpaError {
    fn from(e: serde_json::Error) -> Self {
        IlpaError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display() {
        let err = StoreError::Unavailable("connection refused".to_string());
        assert_eq!(err.to_string(), "store unavailable: connection refused");

        let err = StoreError::WriteRejected("schema mismatch".to_string());
        assert_eq!(err.to_string(), "write rejected: schema mismatch");
    }

    #[test]
    fn test_store_error_converts_to_storage() {
        let err: IlpaError = StoreError::Unavailable("down".to_string()).into();
        assert!(matches!(err, IlpaError::Storage(ref msg) if msg.contains("down")));
    }
}

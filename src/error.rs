//! Error types for vidqa
//!
//! One error type covers the whole crate so that storage, DOM and selector
//! failures can bubble through the same `?` chain up to the caller that
//! decides what to do with them.

use crate::dom::{DomError, SelectorError};
use crate::history::WritePhase;
use thiserror::Error;

/// Main error type for cache, history and observation operations
#[derive(Error, Debug)]
pub enum VidqaError {
    /// A predicate-based lookup matched nothing
    #[error("Not found: {0}")]
    NotFound(String),

    /// Underlying SQLite connection or statement failure
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// A history write aborted part-way through its transaction
    #[error("Transaction aborted during {phase}: {source}")]
    Transaction {
        phase: WritePhase,
        #[source]
        source: rusqlite::Error,
    },

    /// Another item already uses this timestamp as its key
    #[error("Duplicate history key: timestamp {0} already exists")]
    DuplicateKey(i64),

    /// Filesystem error while preparing the database location
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A blocking storage task panicked or was cancelled
    #[error("Storage task failed: {0}")]
    TaskJoin(String),

    /// DOM API failure while wiring observers
    #[error("DOM error: {0}")]
    Dom(#[from] DomError),

    /// Malformed selector string
    #[error(transparent)]
    Selector(#[from] SelectorError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/Deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type alias for vidqa operations
pub type Result<T> = std::result::Result<T, VidqaError>;

impl VidqaError {
    /// True for the recoverable "nothing matched" outcome
    pub fn is_not_found(&self) -> bool {
        matches!(self, VidqaError::NotFound(_))
    }

    /// True for failures raised by the storage layer
    pub fn is_storage_fault(&self) -> bool {
        matches!(
            self,
            VidqaError::Storage(_)
                | VidqaError::Transaction { .. }
                | VidqaError::DuplicateKey(_)
                | VidqaError::TaskJoin(_)
                | VidqaError::Io(_)
        )
    }
}

impl From<serde_json::Error> for VidqaError {
    fn from(e: serde_json::Error) -> Self {
        VidqaError::Serialization(e.to_string())
    }
}

impl From<tokio::task::JoinError> for VidqaError {
    fn from(e: tokio::task::JoinError) -> Self {
        VidqaError::TaskJoin(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = VidqaError::NotFound("no pending question".to_string());
        assert_eq!(error.to_string(), "Not found: no pending question");

        let dup = VidqaError::DuplicateKey(42);
        assert!(dup.to_string().contains("timestamp 42"));

        let tx = VidqaError::Transaction {
            phase: WritePhase::CountChecked,
            source: rusqlite::Error::QueryReturnedNoRows,
        };
        assert!(tx.to_string().contains("count check"));
    }

    #[test]
    fn test_error_classification() {
        assert!(VidqaError::NotFound("x".into()).is_not_found());
        assert!(!VidqaError::NotFound("x".into()).is_storage_fault());
        assert!(VidqaError::DuplicateKey(1).is_storage_fault());
        assert!(VidqaError::Storage(rusqlite::Error::InvalidQuery).is_storage_fault());
    }

    #[test]
    fn test_serde_error_conversion() {
        let err = serde_json::from_str::<u32>("not a number").unwrap_err();
        let error: VidqaError = err.into();
        assert!(matches!(error, VidqaError::Serialization(_)));
    }
}

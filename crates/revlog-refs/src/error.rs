//! Error types for ref operations.

use revlog_types::ObjectId;
use thiserror::Error;

/// Errors that can occur during ref operations.
#[derive(Debug, Error)]
pub enum RefError {
    /// The ref name does not follow the ref naming rules.
    #[error("invalid ref name: {name}: {reason}")]
    InvalidRefName { name: String, reason: String },

    /// A command's expected old value did not match the live ref value.
    #[error("lock failure on {name}: expected {expected}, found {actual}")]
    LockFailure {
        name: String,
        expected: ObjectId,
        actual: ObjectId,
    },

    /// One or more commands of a batch were rejected; nothing was applied
    /// for atomic batches.
    #[error("batch ref update rejected: {}", .rejected.join(", "))]
    BatchRejected { rejected: Vec<String> },

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error during file-based ref operations.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience type alias for ref operations.
pub type Result<T> = std::result::Result<T, RefError>;

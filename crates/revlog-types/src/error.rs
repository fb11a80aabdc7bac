use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid hex string: {0}")]
    InvalidHex(String),

    #[error("invalid byte length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("invalid {what}: {value:?}")]
    InvalidId { what: &'static str, value: String },

    #[error("invalid repository name {name:?}: {reason}")]
    InvalidRepoName { name: String, reason: String },
}

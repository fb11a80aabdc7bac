//! Error types for transactions.

use revlog_refs::RefError;
use revlog_store::StoreError;
use revlog_types::{AccountId, EntityId, ObjectId, RepoName};
use thiserror::Error;

/// Coarse classification of a [`TxnError`], deciding how a caller reacts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Misuse of the transaction object. Never retried.
    InvalidState,
    /// The expected state no longer matches the store. The caller re-reads
    /// and retries the whole logical operation.
    Concurrency,
    /// A precondition on history shape failed, or history is malformed.
    Structural,
    /// The object or ref store failed, including a rejected atomic batch.
    Storage,
}

#[derive(Debug, Error)]
pub enum TxnError {
    #[error("update manager was already executed")]
    AlreadyExecuted,

    /// An append-style edit and a rewrite target the same ref.
    #[error("cannot both append to and rewrite {ref_name} in one transaction")]
    ConflictingEdits { ref_name: String },

    #[error("edit targets repository {actual}, transaction is for {expected}")]
    WrongRepository { expected: RepoName, actual: RepoName },

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("stale metadata for entity {entity}: expected {expected}, found {actual}")]
    StaleMetadata {
        entity: EntityId,
        expected: ObjectId,
        actual: ObjectId,
    },

    #[error("stale annex for entity {entity}, account {account}: expected {expected}, found {actual}")]
    StaleAnnex {
        entity: EntityId,
        account: AccountId,
        expected: ObjectId,
        actual: ObjectId,
    },

    /// A root-only edit found the ref already has history.
    #[error("root-only edit on {ref_name}, which already points at {tip}")]
    RootOnly { ref_name: String, tip: ObjectId },

    #[error("cannot rewrite {ref_name}: ref does not exist")]
    EmptyRef { ref_name: String },

    #[error("rewrite of {ref_name} failed: {reason}")]
    RewriteFailed { ref_name: String, reason: String },

    #[error("repository not found: {0}")]
    RepositoryNotFound(RepoName),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("ref error: {0}")]
    Ref(#[from] RefError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl TxnError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TxnError::AlreadyExecuted
            | TxnError::ConflictingEdits { .. }
            | TxnError::WrongRepository { .. }
            | TxnError::InvalidState(_)
            | TxnError::Config(_) => ErrorKind::InvalidState,
            TxnError::StaleMetadata { .. } | TxnError::StaleAnnex { .. } => {
                ErrorKind::Concurrency
            }
            TxnError::RootOnly { .. }
            | TxnError::EmptyRef { .. }
            | TxnError::RewriteFailed { .. } => ErrorKind::Structural,
            TxnError::RepositoryNotFound(_)
            | TxnError::Store(_)
            | TxnError::Ref(_)
            | TxnError::Io(_) => ErrorKind::Storage,
        }
    }

    /// Only concurrency failures are worth retrying from freshly read state.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Concurrency
    }
}

pub type TxnResult<T> = Result<T, TxnError>;

/// Failure of a [`HistoryRewrite`](crate::HistoryRewrite).
#[derive(Debug, Error)]
pub enum RewriteError {
    /// Existing history could not be interpreted.
    #[error("malformed history: {0}")]
    Malformed(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl RewriteError {
    /// Classify a store error met while walking history. Missing, misfiled
    /// and undecodable objects are malformed history; I/O and serialization
    /// failures stay store errors.
    pub fn from_history(err: StoreError) -> Self {
        match err {
            StoreError::CorruptObject { id, reason } => {
                RewriteError::Malformed(format!("{}: {reason}", id.short_hex()))
            }
            StoreError::NotFound(id) => {
                RewriteError::Malformed(format!("dangling reference to {}", id.short_hex()))
            }
            StoreError::HashMismatch { expected, computed } => RewriteError::Malformed(format!(
                "object filed as {} hashes to {}",
                expected.short_hex(),
                computed.short_hex()
            )),
            other => RewriteError::Store(other),
        }
    }

    pub(crate) fn into_txn(self, ref_name: &str) -> TxnError {
        match self {
            RewriteError::Malformed(reason) => TxnError::RewriteFailed {
                ref_name: ref_name.to_string(),
                reason,
            },
            RewriteError::Store(e) => TxnError::Store(e),
        }
    }
}

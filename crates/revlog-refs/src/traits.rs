//! The [`RefStore`] trait defining the ref storage interface.

use revlog_types::ObjectId;

use crate::error::Result;
use crate::types::{BatchRefUpdate, ReflogEntry};

/// Storage backend for named refs.
///
/// Refs map a name to a commit id. Every mutation goes through
/// [`apply_batch`](Self::apply_batch); there is no single-ref write path.
/// Implementations must be thread-safe (`Send + Sync`).
pub trait RefStore: Send + Sync {
    /// Read a ref's current value. Returns `Ok(None)` if it does not exist.
    fn read_ref(&self, name: &str) -> Result<Option<ObjectId>>;

    /// List every ref whose name starts with `prefix`, sorted by name.
    ///
    /// Pass `""` to list all refs.
    fn list_refs(&self, prefix: &str) -> Result<Vec<(String, ObjectId)>>;

    /// Submit a batch of transitions.
    ///
    /// Each command's status is recorded in `batch`. For atomic batches either
    /// every command applies or none does, and any failure is returned as
    /// [`RefError::BatchRejected`](crate::RefError::BatchRejected).
    fn apply_batch(&self, batch: &mut BatchRefUpdate) -> Result<()>;

    /// Log entries for `name`, oldest first.
    fn reflog(&self, name: &str) -> Result<Vec<ReflogEntry>>;

    /// Value of `name`, or the null id when absent.
    fn resolve(&self, name: &str) -> Result<ObjectId> {
        Ok(self.read_ref(name)?.unwrap_or_default())
    }
}

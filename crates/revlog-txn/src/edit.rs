//! The seams through which callers describe changes.

use revlog_types::{AccountId, EntityId, ObjectId, RepoName};

use crate::context::Stage;
use crate::error::{RewriteError, TxnResult};
use crate::expected::ExpectedState;

/// An append-style change to one ref: given the current tip, produce a new
/// one.
pub trait Edit {
    /// Project the edited entity belongs to.
    fn project(&self) -> &RepoName;

    fn entity(&self) -> EntityId;

    fn ref_name(&self) -> String;

    /// What the caller believed the entity's refs were when building the edit.
    fn expected_state(&self) -> Option<&ExpectedState> {
        None
    }

    /// Whether this edit may create the ref.
    fn allow_write_to_new_ref(&self) -> bool {
        false
    }

    /// Whether this edit may only write the first commit of a ref.
    fn is_root_only(&self) -> bool {
        false
    }

    /// Build on `tip` (null for a new ref). `None` means nothing changed.
    fn apply(&self, stage: &mut Stage<'_>, tip: ObjectId) -> TxnResult<Option<ObjectId>>;
}

/// An edit of one account's annex ref, stored in the shared repository.
pub trait AnnexEdit: Edit {
    fn account(&self) -> AccountId;
}

/// Replaces part of a ref's existing history instead of appending to it.
pub trait HistoryRewrite {
    fn project(&self) -> &RepoName;

    fn entity(&self) -> EntityId;

    fn ref_name(&self) -> String;

    /// Rewrite history ending at `tip`, which is never null. `None` means
    /// nothing changed.
    fn rewrite(
        &self,
        stage: &mut Stage<'_>,
        tip: ObjectId,
    ) -> Result<Option<ObjectId>, RewriteError>;
}

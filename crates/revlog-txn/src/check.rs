//! Optimistic comparison of expected state against the store.
//!
//! Both the metadata and the annex checks compare against the values refs
//! had before the transaction, never against values the transaction itself
//! staged.

use tracing::warn;

use crate::collector::UpdateCollector;
use crate::context::StagingContext;
use crate::edit::{AnnexEdit, Edit};
use crate::error::{TxnError, TxnResult};

/// The first metadata edit of each ref speaks for the ref.
pub(crate) fn check_metadata(
    ctx: Option<&mut StagingContext>,
    metadata: &UpdateCollector<dyn Edit>,
) -> TxnResult<()> {
    let Some(ctx) = ctx else {
        return Ok(());
    };
    for (ref_name, edits) in metadata.iter() {
        let Some(first) = edits.first() else {
            continue;
        };
        let Some(expected) = first.expected_state() else {
            continue;
        };
        let actual = ctx.original_ref(ref_name)?;
        if !expected.is_meta_up_to_date(actual) {
            warn!(entity = %first.entity(), expected = %expected.meta(), actual = %actual, "stale metadata");
            return Err(TxnError::StaleMetadata {
                entity: first.entity(),
                expected: expected.meta(),
                actual,
            });
        }
    }
    Ok(())
}

/// Annex refs are checked per (entity, account) against the shared
/// repository.
pub(crate) fn check_annex(
    ctx: Option<&mut StagingContext>,
    annex: &UpdateCollector<dyn AnnexEdit>,
) -> TxnResult<()> {
    let Some(ctx) = ctx else {
        return Ok(());
    };
    for (ref_name, edits) in annex.iter() {
        let Some(first) = edits.first() else {
            continue;
        };
        let Some(expected) = first.expected_state() else {
            continue;
        };
        let account = first.account();
        let actual = ctx.original_ref(ref_name)?;
        if !expected.is_annex_up_to_date(account, actual) {
            warn!(entity = %first.entity(), account = %account, actual = %actual, "stale annex");
            return Err(TxnError::StaleAnnex {
                entity: first.entity(),
                account,
                expected: expected.annex(account),
                actual,
            });
        }
    }
    Ok(())
}

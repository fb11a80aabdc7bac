//! Batch application shared by every [`RefStore`](crate::RefStore) backend.

use std::collections::{BTreeMap, BTreeSet};

use revlog_types::ObjectId;
use tracing::{debug, warn};

use crate::error::{RefError, Result};
use crate::names::validate_ref_name;
use crate::types::{BatchRefUpdate, CommandStatus, ReflogEntry};

/// What [`apply_batch`] did to the ref table.
///
/// `entries` holds a reflog entry for every ref that moved. It is non-empty
/// alongside an error when a non-atomic batch applied in part, and the caller
/// records those entries before reporting the error.
#[derive(Debug)]
pub(crate) struct Applied {
    pub entries: Vec<(String, ReflogEntry)>,
    pub result: Result<()>,
}

/// Check every command of `batch` against `refs` and apply the ones that
/// pass.
///
/// Atomic batches apply nothing unless every command passes; the failing
/// commands carry their reason and the rest are marked
/// [`CommandStatus::Aborted`]. Non-atomic batches apply the passing commands
/// and still report the failures as an error.
///
/// Refs in `locked` are treated as held by another writer.
pub(crate) fn apply_batch(
    refs: &mut BTreeMap<String, ObjectId>,
    locked: &BTreeSet<String>,
    batch: &mut BatchRefUpdate,
) -> Applied {
    let mut seen = BTreeSet::new();
    let mut checked = Vec::with_capacity(batch.len());
    for cmd in batch.commands() {
        let status = if let Err(e) = validate_ref_name(&cmd.name) {
            Some(CommandStatus::Rejected(e.to_string()))
        } else if !seen.insert(cmd.name.as_str()) {
            Some(CommandStatus::Rejected("duplicate command".into()))
        } else if locked.contains(&cmd.name) {
            Some(CommandStatus::Rejected("ref is locked".into()))
        } else {
            let actual = refs.get(&cmd.name).copied().unwrap_or_default();
            (actual != cmd.old).then_some(CommandStatus::LockFailure { actual })
        };
        checked.push(status);
    }

    let any_failed = checked.iter().any(Option::is_some);
    if any_failed && batch.is_atomic() {
        for (i, status) in checked.into_iter().enumerate() {
            batch.set_status(i, status.unwrap_or(CommandStatus::Aborted));
        }
        let rejected = batch.failures();
        warn!(commands = batch.len(), ?rejected, "atomic ref batch rejected");
        return Applied {
            entries: Vec::new(),
            result: Err(RefError::BatchRejected { rejected }),
        };
    }

    let mut entries = Vec::new();
    for (i, status) in checked.into_iter().enumerate() {
        if let Some(status) = status {
            batch.set_status(i, status);
            continue;
        }
        let cmd = batch.commands()[i].clone();
        if !cmd.is_noop() {
            if cmd.new.is_null() {
                refs.remove(&cmd.name);
            } else {
                refs.insert(cmd.name.clone(), cmd.new);
            }
            debug!(name = %cmd.name, old = %cmd.old.short_hex(), new = %cmd.new.short_hex(), "ref moved");
            entries.push((
                cmd.name,
                ReflogEntry {
                    old: cmd.old,
                    new: cmd.new,
                    identity: batch.identity().cloned(),
                    message: batch.message().map(str::to_string),
                    attestation: batch.attestation().cloned(),
                },
            ));
        }
        batch.set_status(i, CommandStatus::Ok);
    }

    let result = if any_failed {
        let rejected = batch.failures();
        warn!(?rejected, applied = entries.len(), "non-atomic ref batch partially applied");
        Err(RefError::BatchRejected { rejected })
    } else {
        Ok(())
    };
    Applied { entries, result }
}

//! Folding queued edits into ref transitions.

use std::fmt;

use revlog_refs::{annex_prefix, entity_meta_ref, RefTransition};
use revlog_types::EntityId;
use tracing::debug;

use crate::collector::UpdateCollector;
use crate::context::StagingContext;
use crate::edit::{Edit, HistoryRewrite};
use crate::error::{TxnError, TxnResult};

/// Staging runs these phases in declaration order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum StagePhase {
    Metadata,
    Annex,
    Annotations,
    Rewrites,
    Deletions,
}

impl fmt::Display for StagePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StagePhase::Metadata => "metadata",
            StagePhase::Annex => "annex",
            StagePhase::Annotations => "annotations",
            StagePhase::Rewrites => "rewrites",
            StagePhase::Deletions => "deletions",
        };
        f.write_str(name)
    }
}

/// Observes staging between phases.
///
/// `primary` and `shared` are the transitions accumulated so far; either is
/// empty when its repository was not opened.
pub trait StageListener {
    fn after_phase(&mut self, phase: StagePhase, primary: &[RefTransition], shared: &[RefTransition]);
}

/// Fold each ref's append-style edits into at most one transition.
pub(crate) fn stage_appends<E: Edit + ?Sized>(
    ctx: &mut StagingContext,
    edits: &UpdateCollector<E>,
) -> TxnResult<()> {
    for (ref_name, queued) in edits.iter() {
        let old = ctx.read_ref(ref_name)?;
        if old.is_null() && !queued.iter().any(|e| e.allow_write_to_new_ref()) {
            debug!(ref_name, "skipping edits: ref does not exist and no edit may create it");
            continue;
        }
        let mut tip = old;
        for edit in queued {
            if edit.is_root_only() && !old.is_null() {
                return Err(TxnError::RootOnly {
                    ref_name: ref_name.to_string(),
                    tip: old,
                });
            }
            if let Some(next) = edit.apply(&mut ctx.stage()?, tip)? {
                tip = next;
            }
        }
        if tip != old {
            ctx.add_transition(RefTransition::new(old, tip, ref_name))?;
        }
    }
    Ok(())
}

/// Fold each ref's rewrites onto its current tip.
pub(crate) fn stage_rewrites(
    ctx: &mut StagingContext,
    rewrites: &UpdateCollector<dyn HistoryRewrite>,
) -> TxnResult<()> {
    for (ref_name, queued) in rewrites.iter() {
        let old = ctx.read_ref(ref_name)?;
        if old.is_null() {
            return Err(TxnError::EmptyRef {
                ref_name: ref_name.to_string(),
            });
        }
        let mut tip = old;
        for rewrite in queued {
            let next = rewrite
                .rewrite(&mut ctx.stage()?, tip)
                .map_err(|e| e.into_txn(ref_name))?;
            if let Some(next) = next {
                tip = next;
            }
        }
        if tip != old {
            ctx.add_transition(RefTransition::new(old, tip, ref_name))?;
        }
    }
    Ok(())
}

/// Tombstone each entity's metadata ref and every account's annex ref.
pub(crate) fn stage_deletions(
    primary: &mut StagingContext,
    mut shared: Option<&mut StagingContext>,
    entities: &[EntityId],
) -> TxnResult<()> {
    for &entity in entities {
        let meta = entity_meta_ref(entity);
        let old = primary.read_ref(&meta)?;
        if !old.is_null() {
            primary.add_transition(RefTransition::delete(old, meta))?;
        }

        let Some(shared) = shared.as_deref_mut() else {
            continue;
        };
        for name in shared.ref_names(&annex_prefix(entity))? {
            let old = shared.read_ref(&name)?;
            if !old.is_null() {
                shared.add_transition(RefTransition::delete(old, name))?;
            }
        }
        debug!(entity = %entity, "staged deletion");
    }
    Ok(())
}

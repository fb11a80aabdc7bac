//! In-memory ref store for testing and ephemeral use.
//!
//! [`InMemoryRefStore`] keeps refs and their logs behind one `RwLock`, so a
//! batch is applied under a single write guard and readers never observe a
//! half-applied batch.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::RwLock;

use revlog_types::ObjectId;

use crate::apply::apply_batch;
use crate::error::{RefError, Result};
use crate::traits::RefStore;
use crate::types::{BatchRefUpdate, ReflogEntry};

#[derive(Debug, Default)]
struct State {
    refs: BTreeMap<String, ObjectId>,
    reflogs: BTreeMap<String, Vec<ReflogEntry>>,
    locked: BTreeSet<String>,
}

/// An in-memory implementation of [`RefStore`]. Data is lost when the store
/// is dropped.
#[derive(Debug, Default)]
pub struct InMemoryRefStore {
    state: RwLock<State>,
}

fn poisoned<E: std::fmt::Display>(e: E) -> RefError {
    RefError::Serialization(format!("lock poisoned: {e}"))
}

impl InMemoryRefStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `name` as held by another writer. Until
    /// [`unlock_ref`](Self::unlock_ref) is called, any batch touching it is
    /// rejected.
    pub fn lock_ref(&self, name: impl Into<String>) -> Result<()> {
        self.state.write().map_err(poisoned)?.locked.insert(name.into());
        Ok(())
    }

    pub fn unlock_ref(&self, name: &str) -> Result<()> {
        self.state.write().map_err(poisoned)?.locked.remove(name);
        Ok(())
    }

    /// Number of refs currently stored.
    pub fn len(&self) -> usize {
        self.state.read().map(|s| s.refs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RefStore for InMemoryRefStore {
    fn read_ref(&self, name: &str) -> Result<Option<ObjectId>> {
        let state = self.state.read().map_err(poisoned)?;
        Ok(state.refs.get(name).copied())
    }

    fn list_refs(&self, prefix: &str) -> Result<Vec<(String, ObjectId)>> {
        let state = self.state.read().map_err(poisoned)?;
        Ok(state
            .refs
            .range(prefix.to_string()..)
            .take_while(|(name, _)| name.starts_with(prefix))
            .map(|(name, id)| (name.clone(), *id))
            .collect())
    }

    fn apply_batch(&self, batch: &mut BatchRefUpdate) -> Result<()> {
        let mut state = self.state.write().map_err(poisoned)?;
        let State {
            refs,
            reflogs,
            locked,
        } = &mut *state;
        let applied = apply_batch(refs, locked, batch);
        for (name, entry) in applied.entries {
            reflogs.entry(name).or_default().push(entry);
        }
        applied.result
    }

    fn reflog(&self, name: &str) -> Result<Vec<ReflogEntry>> {
        let state = self.state.read().map_err(poisoned)?;
        Ok(state.reflogs.get(name).cloned().unwrap_or_default())
    }
}

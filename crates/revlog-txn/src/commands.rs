//! Accumulated ref transitions for one repository.

use std::collections::HashMap;

use revlog_refs::{BatchRefUpdate, RefStore, RefTransition};
use revlog_types::ObjectId;
use tracing::debug;

use crate::error::{TxnError, TxnResult};

/// Ordered list of pending transitions with a cache of the values refs had
/// before the transaction touched them.
///
/// At most one transition is kept per ref. Adding a second one chains it onto
/// the first, so edits staged later observe the value produced by edits
/// staged earlier.
#[derive(Debug, Default)]
pub struct RefTransitions {
    transitions: Vec<RefTransition>,
    originals: HashMap<String, ObjectId>,
}

impl RefTransitions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value `name` had before this transaction, read once from `refs` and
    /// cached. Absent refs read as the null id.
    pub fn original(&mut self, refs: &dyn RefStore, name: &str) -> TxnResult<ObjectId> {
        if let Some(id) = self.originals.get(name) {
            return Ok(*id);
        }
        let id = refs.resolve(name)?;
        self.originals.insert(name.to_string(), id);
        Ok(id)
    }

    /// Value `name` will have once the pending transitions apply.
    pub fn get(&mut self, refs: &dyn RefStore, name: &str) -> TxnResult<ObjectId> {
        match self.pending(name) {
            Some(t) => Ok(t.new),
            None => self.original(refs, name),
        }
    }

    fn pending(&self, name: &str) -> Option<&RefTransition> {
        self.transitions.iter().find(|t| t.name == name)
    }

    /// Queue a transition, chaining it onto any pending transition for the
    /// same ref. A chain that ends where it started is dropped.
    pub fn add(&mut self, transition: RefTransition) -> TxnResult<()> {
        let Some(pos) = self.transitions.iter().position(|t| t.name == transition.name) else {
            if !transition.is_noop() {
                debug!(transition = %transition, "queued ref transition");
                self.transitions.push(transition);
            }
            return Ok(());
        };
        let existing = &self.transitions[pos];
        if existing.new != transition.old {
            return Err(TxnError::InvalidState(format!(
                "cannot chain {transition} onto {existing}"
            )));
        }
        let joined = RefTransition::new(existing.old, transition.new, transition.name);
        if joined.is_noop() {
            debug!(name = %joined.name, "chained transition became a no-op");
            self.transitions.remove(pos);
        } else {
            debug!(transition = %joined, "chained ref transition");
            self.transitions[pos] = joined;
        }
        Ok(())
    }

    /// Pending transitions in first-insertion order.
    pub fn transitions(&self) -> &[RefTransition] {
        &self.transitions
    }

    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    /// Append every pending transition to `batch`.
    pub fn add_to(&self, batch: &mut BatchRefUpdate) {
        for t in &self.transitions {
            batch.add_command(t.clone());
        }
    }
}

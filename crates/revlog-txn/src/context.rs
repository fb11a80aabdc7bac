//! Per-repository staging scratch space.

use std::sync::Arc;

use revlog_refs::{RefStore, RefTransition};
use revlog_store::{Commit, LayeredReader, ObjectBuffer, StoreResult, StoredObject, Tree};
use revlog_types::{ObjectId, RepoName};
use tracing::debug;

use crate::commands::RefTransitions;
use crate::error::{TxnError, TxnResult};
use crate::repo::{RepoReader, Repository};

enum Handle {
    /// Opened for this transaction; closed with the context.
    Owned(Repository),
    /// Supplied by the caller, who stays responsible for closing it.
    Donated(Arc<Repository>),
}

impl Handle {
    fn repo(&self) -> &Repository {
        match self {
            Handle::Owned(repo) => repo,
            Handle::Donated(repo) => repo,
        }
    }
}

/// Holds a repository handle, a reader, a buffer of objects not yet written
/// to the repository, and the ref transitions accumulated for it.
///
/// Buffered objects are visible through [`view`](Self::view) and
/// [`Stage`] only.
pub struct StagingContext {
    handle: Option<Handle>,
    reader: Option<RepoReader>,
    buffer: ObjectBuffer,
    transitions: RefTransitions,
}

impl StagingContext {
    /// Take ownership of `repo` for the duration of the transaction.
    pub fn open(repo: Repository) -> Self {
        Self::with_handle(Handle::Owned(repo), RefTransitions::new())
    }

    /// Stage against a caller-held repository, continuing from transitions the
    /// caller already accumulated.
    pub fn donated(repo: Arc<Repository>, transitions: RefTransitions) -> Self {
        Self::with_handle(Handle::Donated(repo), transitions)
    }

    fn with_handle(handle: Handle, transitions: RefTransitions) -> Self {
        let reader = handle.repo().new_reader();
        debug!(repo = %handle.repo().name(), "opened staging context");
        Self {
            handle: Some(handle),
            reader: Some(reader),
            buffer: ObjectBuffer::new(),
            transitions,
        }
    }

    fn closed() -> TxnError {
        TxnError::InvalidState("staging context is closed".into())
    }

    pub fn repo(&self) -> TxnResult<&Repository> {
        self.handle.as_ref().map(Handle::repo).ok_or_else(Self::closed)
    }

    pub fn name(&self) -> TxnResult<&RepoName> {
        Ok(self.repo()?.name())
    }

    /// Read view over buffered objects, then durable ones.
    pub fn view(&self) -> TxnResult<LayeredReader<'_>> {
        let reader = self.reader.as_ref().ok_or_else(Self::closed)?;
        Ok(LayeredReader::new(&self.buffer, reader.objects()))
    }

    /// Write access for edits: reads through the view, inserts into the
    /// buffer.
    pub fn stage(&mut self) -> TxnResult<Stage<'_>> {
        let reader = self.reader.as_ref().ok_or_else(Self::closed)?;
        Ok(Stage {
            buffer: &mut self.buffer,
            reader,
        })
    }

    fn refs(&self) -> TxnResult<&dyn RefStore> {
        Ok(self.repo()?.refs())
    }

    /// Current value of `name` including this transaction's pending
    /// transitions.
    pub fn read_ref(&mut self, name: &str) -> TxnResult<ObjectId> {
        let refs = self.handle.as_ref().ok_or_else(Self::closed)?.repo().refs();
        self.transitions.get(refs, name)
    }

    /// Value of `name` before the transaction.
    pub fn original_ref(&mut self, name: &str) -> TxnResult<ObjectId> {
        let refs = self.handle.as_ref().ok_or_else(Self::closed)?.repo().refs();
        self.transitions.original(refs, name)
    }

    /// Names under `prefix` that exist in the store or are pending creation.
    pub fn ref_names(&self, prefix: &str) -> TxnResult<Vec<String>> {
        let mut names: Vec<String> = self
            .refs()?
            .list_refs(prefix)?
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        for t in self.transitions.transitions() {
            if t.name.starts_with(prefix) && !names.contains(&t.name) {
                names.push(t.name.clone());
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn add_transition(&mut self, transition: RefTransition) -> TxnResult<()> {
        self.transitions.add(transition)
    }

    pub fn transitions(&self) -> &RefTransitions {
        &self.transitions
    }

    pub fn buffered_objects(&self) -> usize {
        self.buffer.len()
    }

    /// Write buffered objects into the repository's object store.
    pub fn flush(&mut self) -> TxnResult<usize> {
        let handle = self.handle.as_ref().ok_or_else(Self::closed)?;
        let written = self.buffer.flush_into(handle.repo().objects())?;
        if written > 0 {
            debug!(repo = %handle.repo().name(), written, "flushed staged objects");
        }
        Ok(written)
    }

    /// Release the reader, then the buffer, then the repository handle if
    /// this context opened it. Calling again is a no-op.
    pub fn close(&mut self) {
        drop(self.reader.take());
        self.buffer.clear();
        match self.handle.take() {
            Some(Handle::Owned(repo)) => repo.close(),
            Some(Handle::Donated(repo)) => {
                debug!(repo = %repo.name(), "released donated repository");
            }
            None => {}
        }
    }
}

impl Drop for StagingContext {
    fn drop(&mut self) {
        self.close();
    }
}

/// Handed to edits while they run: reads see buffered objects, writes land in
/// the buffer.
pub struct Stage<'a> {
    buffer: &'a mut ObjectBuffer,
    reader: &'a RepoReader,
}

impl<'a> Stage<'a> {
    pub fn reader(&self) -> LayeredReader<'_> {
        LayeredReader::new(&*self.buffer, self.reader.objects())
    }

    pub fn insert(&mut self, object: StoredObject) -> StoreResult<ObjectId> {
        self.buffer.insert(object)
    }

    pub fn insert_blob(&mut self, data: impl Into<Vec<u8>>) -> StoreResult<ObjectId> {
        self.buffer.insert_blob(data)
    }

    pub fn insert_tree(&mut self, tree: &Tree) -> StoreResult<ObjectId> {
        self.buffer.insert_tree(tree)
    }

    pub fn insert_commit(&mut self, commit: &Commit) -> StoreResult<ObjectId> {
        self.buffer.insert_commit(commit)
    }

    /// Tree of `commit`, or the empty tree for the null id.
    pub fn tree_of(&self, commit: ObjectId) -> StoreResult<Tree> {
        if commit.is_null() {
            return Ok(Tree::empty());
        }
        let reader = self.reader();
        let commit = reader.read_commit(&commit)?;
        reader.read_tree(&commit.tree)
    }
}

use std::collections::HashMap;

use revlog_types::ObjectId;

use crate::error::{StoreError, StoreResult};
use crate::object::{Blob, Commit, StoredObject, Tree};
use crate::traits::ObjectStore;

/// Temporary in-memory object buffer.
///
/// Objects inserted here are invisible to the durable store until
/// [`flush_into`](Self::flush_into) is called. Insertion order is kept so a
/// flush writes parents before the commits that reference them.
#[derive(Debug, Default)]
pub struct ObjectBuffer {
    objects: HashMap<ObjectId, StoredObject>,
    order: Vec<ObjectId>,
}

impl ObjectBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer an object and return its id. Re-inserting identical content is
    /// a no-op.
    pub fn insert(&mut self, object: StoredObject) -> StoreResult<ObjectId> {
        let id = object.compute_id();
        if id.is_null() {
            return Err(StoreError::NullObjectId);
        }
        if !self.objects.contains_key(&id) {
            self.order.push(id);
            self.objects.insert(id, object);
        }
        Ok(id)
    }

    pub fn insert_blob(&mut self, data: impl Into<Vec<u8>>) -> StoreResult<ObjectId> {
        self.insert(Blob::new(data).to_stored_object())
    }

    pub fn insert_tree(&mut self, tree: &Tree) -> StoreResult<ObjectId> {
        self.insert(tree.to_stored_object()?)
    }

    pub fn insert_commit(&mut self, commit: &Commit) -> StoreResult<ObjectId> {
        self.insert(commit.to_stored_object()?)
    }

    pub fn get(&self, id: &ObjectId) -> Option<&StoredObject> {
        self.objects.get(id)
    }

    pub fn contains(&self, id: &ObjectId) -> bool {
        self.objects.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Drop all buffered objects without writing them anywhere.
    pub fn clear(&mut self) {
        self.objects.clear();
        self.order.clear();
    }

    /// Write every buffered object into `store`, in insertion order, then
    /// empty the buffer. Returns the number of objects written.
    ///
    /// On error the buffer is left intact so the flush can be retried.
    pub fn flush_into(&mut self, store: &dyn ObjectStore) -> StoreResult<usize> {
        let objects: Vec<StoredObject> = self
            .order
            .iter()
            .filter_map(|id| self.objects.get(id).cloned())
            .collect();
        let count = objects.len();
        store.write_batch(&objects)?;
        self.clear();
        Ok(count)
    }
}

/// Read view that resolves ids in a buffer first and then in a durable store.
#[derive(Clone, Copy)]
pub struct LayeredReader<'a> {
    buffer: &'a ObjectBuffer,
    base: &'a dyn ObjectStore,
}

impl<'a> LayeredReader<'a> {
    pub fn new(buffer: &'a ObjectBuffer, base: &'a dyn ObjectStore) -> Self {
        Self { buffer, base }
    }

    pub fn read(&self, id: &ObjectId) -> StoreResult<Option<StoredObject>> {
        if let Some(obj) = self.buffer.get(id) {
            return Ok(Some(obj.clone()));
        }
        self.base.read(id)
    }

    pub fn exists(&self, id: &ObjectId) -> StoreResult<bool> {
        Ok(self.buffer.contains(id) || self.base.exists(id)?)
    }

    pub fn read_commit(&self, id: &ObjectId) -> StoreResult<Commit> {
        let obj = self.read(id)?.ok_or(StoreError::NotFound(*id))?;
        Commit::from_stored_object(&obj)
    }

    pub fn read_tree(&self, id: &ObjectId) -> StoreResult<Tree> {
        let obj = self.read(id)?.ok_or(StoreError::NotFound(*id))?;
        Tree::from_stored_object(&obj)
    }

    pub fn read_blob(&self, id: &ObjectId) -> StoreResult<Blob> {
        let obj = self.read(id)?.ok_or(StoreError::NotFound(*id))?;
        Blob::from_stored_object(&obj)
    }
}

//! Object store held in process memory.

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use revlog_types::ObjectId;

use crate::error::{StoreError, StoreResult};
use crate::object::StoredObject;
use crate::traits::ObjectStore;

/// Objects keyed by id. A batch write lands under a single lock, so a
/// flushed staging buffer becomes visible all at once.
#[derive(Default)]
pub struct InMemoryObjectStore {
    objects: RwLock<BTreeMap<ObjectId, StoredObject>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn objects(&self) -> RwLockReadGuard<'_, BTreeMap<ObjectId, StoredObject>> {
        self.objects.read().expect("object map lock poisoned")
    }

    fn objects_mut(&self) -> RwLockWriteGuard<'_, BTreeMap<ObjectId, StoredObject>> {
        self.objects.write().expect("object map lock poisoned")
    }

    pub fn len(&self) -> usize {
        self.objects().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects().is_empty()
    }

    /// Stored ids, ascending.
    pub fn ids(&self) -> Vec<ObjectId> {
        self.objects().keys().copied().collect()
    }
}

fn insert(map: &mut BTreeMap<ObjectId, StoredObject>, object: &StoredObject) -> StoreResult<ObjectId> {
    let id = object.compute_id();
    if id.is_null() {
        return Err(StoreError::NullObjectId);
    }
    map.entry(id).or_insert_with(|| object.clone());
    Ok(id)
}

impl ObjectStore for InMemoryObjectStore {
    fn read(&self, id: &ObjectId) -> StoreResult<Option<StoredObject>> {
        Ok(self.objects().get(id).cloned())
    }

    fn write(&self, object: &StoredObject) -> StoreResult<ObjectId> {
        insert(&mut self.objects_mut(), object)
    }

    fn exists(&self, id: &ObjectId) -> StoreResult<bool> {
        Ok(self.objects().contains_key(id))
    }

    fn write_batch(&self, objects: &[StoredObject]) -> StoreResult<Vec<ObjectId>> {
        let mut map = self.objects_mut();
        objects.iter().map(|object| insert(&mut map, object)).collect()
    }
}

impl std::fmt::Debug for InMemoryObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryObjectStore")
            .field("objects", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{Blob, Commit, Tree};
    use revlog_types::Identity;

    #[test]
    fn write_then_read() {
        let store = InMemoryObjectStore::new();
        let blob = Blob::new(b"hello".to_vec()).to_stored_object();
        let id = store.write(&blob).unwrap();
        assert_eq!(id, blob.compute_id());
        assert_eq!(store.read(&id).unwrap(), Some(blob));
        assert!(store.exists(&id).unwrap());
    }

    #[test]
    fn missing_object_reads_none() {
        let store = InMemoryObjectStore::new();
        assert!(store.read(&ObjectId::from_bytes(b"nope")).unwrap().is_none());
        assert!(matches!(
            store.read_commit(&ObjectId::from_bytes(b"nope")),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn writes_are_idempotent() {
        let store = InMemoryObjectStore::new();
        let blob = Blob::new(b"dup".to_vec()).to_stored_object();
        store.write(&blob).unwrap();
        store.write(&blob).unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn read_commit_and_tree_helpers() {
        let store = InMemoryObjectStore::new();
        let tree_id = store.write(&Tree::empty().to_stored_object().unwrap()).unwrap();
        let commit = Commit {
            tree: tree_id,
            parents: vec![],
            author: Identity::at("A", "a@example.com", 1),
            message: "root".into(),
        };
        let commit_id = store.write(&commit.to_stored_object().unwrap()).unwrap();
        assert_eq!(store.read_commit(&commit_id).unwrap(), commit);
        assert!(store.read_tree(&tree_id).unwrap().is_empty());
        // A commit is not a tree.
        assert!(store.read_tree(&commit_id).is_err());
    }

    #[test]
    fn write_batch_returns_ids_in_input_order() {
        let store = InMemoryObjectStore::new();
        let a = Blob::new(b"a".to_vec()).to_stored_object();
        let b = Blob::new(b"b".to_vec()).to_stored_object();
        let ids = store.write_batch(&[b.clone(), a.clone()]).unwrap();
        assert_eq!(ids, vec![b.compute_id(), a.compute_id()]);

        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(store.ids(), sorted);
    }
}

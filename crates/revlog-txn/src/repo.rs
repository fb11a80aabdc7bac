//! Repository handles and the managers that open them.
//!
//! A [`Repository`] pairs an object store with a ref store. Handles and the
//! readers opened from them are counted in a [`HandleStats`] shared with the
//! manager, so leaks are observable.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use revlog_refs::{FsRefStore, InMemoryRefStore, RefStore};
use revlog_store::{FsObjectStore, InMemoryObjectStore, ObjectStore};
use revlog_types::RepoName;
use tracing::debug;

use crate::error::{TxnError, TxnResult};

/// Counters of live repository handles and readers.
#[derive(Debug, Default)]
pub struct HandleStats {
    open_repos: AtomicUsize,
    open_readers: AtomicUsize,
}

impl HandleStats {
    pub fn open_repos(&self) -> usize {
        self.open_repos.load(Ordering::SeqCst)
    }

    pub fn open_readers(&self) -> usize {
        self.open_readers.load(Ordering::SeqCst)
    }
}

/// An open repository. Call [`close`](Self::close) when done; a handle that is
/// dropped without closing stays counted as open.
pub struct Repository {
    name: RepoName,
    objects: Arc<dyn ObjectStore>,
    refs: Arc<dyn RefStore>,
    stats: Arc<HandleStats>,
}

impl Repository {
    fn open(
        name: RepoName,
        objects: Arc<dyn ObjectStore>,
        refs: Arc<dyn RefStore>,
        stats: Arc<HandleStats>,
    ) -> Self {
        stats.open_repos.fetch_add(1, Ordering::SeqCst);
        Self {
            name,
            objects,
            refs,
            stats,
        }
    }

    pub fn name(&self) -> &RepoName {
        &self.name
    }

    pub fn objects(&self) -> &dyn ObjectStore {
        self.objects.as_ref()
    }

    pub fn refs(&self) -> &dyn RefStore {
        self.refs.as_ref()
    }

    /// Open a reader on the object store. It is released when dropped.
    pub fn new_reader(&self) -> RepoReader {
        self.stats.open_readers.fetch_add(1, Ordering::SeqCst);
        RepoReader {
            objects: Arc::clone(&self.objects),
            stats: Arc::clone(&self.stats),
        }
    }

    pub fn close(self) {
        self.stats.open_repos.fetch_sub(1, Ordering::SeqCst);
        debug!(repo = %self.name, "closed repository");
    }
}

impl fmt::Debug for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repository").field("name", &self.name).finish()
    }
}

/// Read access to a repository's durable objects.
pub struct RepoReader {
    objects: Arc<dyn ObjectStore>,
    stats: Arc<HandleStats>,
}

impl RepoReader {
    pub fn objects(&self) -> &dyn ObjectStore {
        self.objects.as_ref()
    }
}

impl Drop for RepoReader {
    fn drop(&mut self) {
        self.stats.open_readers.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Opens repositories by name.
pub trait RepositoryManager: Send + Sync {
    /// Open an existing repository.
    fn open(&self, name: &RepoName) -> TxnResult<Repository>;

    /// Counters for every handle this manager has opened.
    fn stats(&self) -> Arc<HandleStats>;
}

type MemoryRepo = (Arc<InMemoryObjectStore>, Arc<InMemoryRefStore>);

/// Repositories living in memory for the lifetime of the manager.
#[derive(Default)]
pub struct InMemoryRepositoryManager {
    repos: Mutex<HashMap<RepoName, MemoryRepo>>,
    stats: Arc<HandleStats>,
}

impl InMemoryRepositoryManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty repository. Creating an existing name is a no-op.
    pub fn create(&self, name: &RepoName) {
        self.repos
            .lock()
            .expect("repository map lock poisoned")
            .entry(name.clone())
            .or_default();
    }

    /// Direct access to a repository's ref store, bypassing handle tracking.
    pub fn ref_store(&self, name: &RepoName) -> Option<Arc<InMemoryRefStore>> {
        let repos = self.repos.lock().expect("repository map lock poisoned");
        repos.get(name).map(|(_, refs)| Arc::clone(refs))
    }

    /// Direct access to a repository's object store, bypassing handle tracking.
    pub fn object_store(&self, name: &RepoName) -> Option<Arc<InMemoryObjectStore>> {
        let repos = self.repos.lock().expect("repository map lock poisoned");
        repos.get(name).map(|(objects, _)| Arc::clone(objects))
    }
}

impl RepositoryManager for InMemoryRepositoryManager {
    fn open(&self, name: &RepoName) -> TxnResult<Repository> {
        let repos = self.repos.lock().expect("repository map lock poisoned");
        let (objects, refs) = repos
            .get(name)
            .ok_or_else(|| TxnError::RepositoryNotFound(name.clone()))?;
        Ok(Repository::open(
            name.clone(),
            Arc::clone(objects) as Arc<dyn ObjectStore>,
            Arc::clone(refs) as Arc<dyn RefStore>,
            Arc::clone(&self.stats),
        ))
    }

    fn stats(&self) -> Arc<HandleStats> {
        Arc::clone(&self.stats)
    }
}

/// Repositories stored as directories under a common root:
///
/// ```text
/// <root>/<name>/objects/      loose objects
/// <root>/<name>/refs.json     ref table
/// <root>/<name>/reflog.jsonl  ref log
/// ```
#[derive(Debug)]
pub struct FsRepositoryManager {
    root: PathBuf,
    stats: Arc<HandleStats>,
}

impl FsRepositoryManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            stats: Arc::new(HandleStats::default()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn repo_dir(&self, name: &RepoName) -> PathBuf {
        self.root.join(name.as_str())
    }

    /// Create the directory layout for `name`. Existing repositories are left
    /// as they are.
    pub fn create(&self, name: &RepoName) -> TxnResult<()> {
        let dir = self.repo_dir(name);
        FsObjectStore::open(dir.join("objects"))?;
        FsRefStore::open(&dir)?;
        debug!(repo = %name, dir = %dir.display(), "created repository");
        Ok(())
    }

    pub fn exists(&self, name: &RepoName) -> bool {
        self.repo_dir(name).join("objects").is_dir()
    }

    /// Names of every repository under the root.
    pub fn list(&self) -> TxnResult<Vec<RepoName>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            let Ok(name) = RepoName::new(entry.file_name().to_string_lossy()) else {
                continue;
            };
            if self.exists(&name) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }
}

impl RepositoryManager for FsRepositoryManager {
    fn open(&self, name: &RepoName) -> TxnResult<Repository> {
        if !self.exists(name) {
            return Err(TxnError::RepositoryNotFound(name.clone()));
        }
        let dir = self.repo_dir(name);
        let objects = FsObjectStore::open(dir.join("objects"))?;
        let refs = FsRefStore::open(&dir)?;
        Ok(Repository::open(
            name.clone(),
            Arc::new(objects),
            Arc::new(refs),
            Arc::clone(&self.stats),
        ))
    }

    fn stats(&self) -> Arc<HandleStats> {
        Arc::clone(&self.stats)
    }
}

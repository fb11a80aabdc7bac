//! File-backed ref store.
//!
//! Layout under the store root:
//!
//! - `refs.json`: a JSON object mapping each ref name to its hex commit id.
//!   It is rewritten whole through a temporary file and a rename, so a batch
//!   lands on disk in one step or not at all.
//! - `reflog.jsonl`: one JSON record per moved ref, appended after the
//!   ref table is replaced.
//!
//! Writers in the same process are serialized by a mutex. Cross-process
//! locking is not provided.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use revlog_types::ObjectId;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::apply::apply_batch;
use crate::error::{RefError, Result};
use crate::traits::RefStore;
use crate::types::{BatchRefUpdate, ReflogEntry};

const REFS_FILE: &str = "refs.json";
const REFLOG_FILE: &str = "reflog.jsonl";

#[derive(Serialize, Deserialize)]
struct ReflogRecord {
    name: String,
    #[serde(flatten)]
    entry: ReflogEntry,
}

#[derive(Debug)]
pub struct FsRefStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl FsRefStore {
    /// Open (creating if needed) a ref store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn load(&self) -> Result<BTreeMap<String, ObjectId>> {
        let bytes = match fs::read(self.root.join(REFS_FILE)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };
        let raw: BTreeMap<String, String> = serde_json::from_slice(&bytes)
            .map_err(|e| RefError::Serialization(format!("{REFS_FILE}: {e}")))?;
        raw.into_iter()
            .map(|(name, hex)| {
                let id = ObjectId::from_hex(&hex)
                    .map_err(|e| RefError::Serialization(format!("{name}: {e}")))?;
                Ok((name, id))
            })
            .collect()
    }

    fn save(&self, refs: &BTreeMap<String, ObjectId>) -> Result<()> {
        let raw: BTreeMap<&str, String> = refs
            .iter()
            .map(|(name, id)| (name.as_str(), id.to_hex()))
            .collect();
        let bytes = serde_json::to_vec_pretty(&raw)
            .map_err(|e| RefError::Serialization(e.to_string()))?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.root)?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.root.join(REFS_FILE))
            .map_err(|e| RefError::Io(e.error))?;
        Ok(())
    }

    fn append_reflog(&self, entries: Vec<(String, ReflogEntry)>) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.root.join(REFLOG_FILE))?;
        for (name, entry) in entries {
            let line = serde_json::to_string(&ReflogRecord { name, entry })
                .map_err(|e| RefError::Serialization(e.to_string()))?;
            writeln!(file, "{line}")?;
        }
        file.sync_data()?;
        Ok(())
    }
}

impl RefStore for FsRefStore {
    fn read_ref(&self, name: &str) -> Result<Option<ObjectId>> {
        Ok(self.load()?.get(name).copied())
    }

    fn list_refs(&self, prefix: &str) -> Result<Vec<(String, ObjectId)>> {
        Ok(self
            .load()?
            .into_iter()
            .filter(|(name, _)| name.starts_with(prefix))
            .collect())
    }

    fn apply_batch(&self, batch: &mut BatchRefUpdate) -> Result<()> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|e| RefError::Serialization(format!("lock poisoned: {e}")))?;
        let mut refs = self.load()?;
        let applied = apply_batch(&mut refs, &BTreeSet::new(), batch);
        if !applied.entries.is_empty() {
            // A partially applied non-atomic batch still records what moved.
            self.save(&refs)?;
            debug!(root = %self.root.display(), moved = applied.entries.len(), "ref table replaced");
            self.append_reflog(applied.entries)?;
        }
        applied.result
    }

    fn reflog(&self, name: &str) -> Result<Vec<ReflogEntry>> {
        let file = match fs::File::open(self.root.join(REFLOG_FILE)) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut out = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record: ReflogRecord = serde_json::from_str(&line)
                .map_err(|e| RefError::Serialization(format!("{REFLOG_FILE}: {e}")))?;
            if record.name == name {
                out.push(record.entry);
            }
        }
        Ok(out)
    }
}

//! Stock edits over flat key/value trees.
//!
//! Every commit written here carries a [`Tree`] mapping keys to blobs.
//! Appending edits copy the parent tree and apply a [`CommitSpec`]; rewrites
//! walk first-parent history and rebuild commits from the first one they
//! change.

use revlog_refs::{annex_ref, annotation_ref, entity_meta_ref, EntityRefKind};
use revlog_store::{Commit, LayeredReader};
use revlog_types::{AccountId, EntityId, Identity, ObjectId, RepoName};

use crate::context::Stage;
use crate::edit::{AnnexEdit, Edit, HistoryRewrite};
use crate::error::{RewriteError, TxnResult};
use crate::expected::ExpectedState;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TreeOp {
    Put { key: String, data: Vec<u8> },
    Remove { key: String },
}

/// Author, message and ordered tree operations of one commit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitSpec {
    pub author: Identity,
    pub message: String,
    pub ops: Vec<TreeOp>,
}

impl CommitSpec {
    pub fn new(author: Identity, message: impl Into<String>) -> Self {
        Self {
            author,
            message: message.into(),
            ops: Vec::new(),
        }
    }

    pub fn put(mut self, key: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        self.ops.push(TreeOp::Put {
            key: key.into(),
            data: data.into(),
        });
        self
    }

    pub fn remove(mut self, key: impl Into<String>) -> Self {
        self.ops.push(TreeOp::Remove { key: key.into() });
        self
    }

    /// Commit the parent's tree with `ops` applied on top of `tip`. Returns
    /// `None` when the tree would not change.
    fn commit_onto(&self, stage: &mut Stage<'_>, tip: ObjectId) -> TxnResult<Option<ObjectId>> {
        let parent_tree = stage.tree_of(tip)?;
        let mut tree = parent_tree.clone();
        for op in &self.ops {
            match op {
                TreeOp::Put { key, data } => {
                    let blob = stage.insert_blob(data.clone())?;
                    tree.upsert(key.clone(), blob);
                }
                TreeOp::Remove { key } => {
                    tree.remove(key);
                }
            }
        }
        if tree == parent_tree {
            return Ok(None);
        }
        let commit = Commit {
            tree: stage.insert_tree(&tree)?,
            parents: tip.non_null().into_iter().collect(),
            author: self.author.clone(),
            message: self.message.clone(),
        };
        Ok(Some(stage.insert_commit(&commit)?))
    }
}

/// Appends a commit to an entity's metadata or annotation ref.
#[derive(Clone, Debug)]
pub struct TreeEdit {
    project: RepoName,
    entity: EntityId,
    kind: EntityRefKind,
    spec: CommitSpec,
    expected: Option<ExpectedState>,
    allow_new_ref: bool,
    root_only: bool,
}

impl TreeEdit {
    pub fn metadata(project: RepoName, entity: EntityId, spec: CommitSpec) -> Self {
        Self::new(project, entity, EntityRefKind::Meta, spec)
    }

    pub fn annotation(project: RepoName, entity: EntityId, spec: CommitSpec) -> Self {
        Self::new(project, entity, EntityRefKind::Annotations, spec)
    }

    fn new(project: RepoName, entity: EntityId, kind: EntityRefKind, spec: CommitSpec) -> Self {
        Self {
            project,
            entity,
            kind,
            spec,
            expected: None,
            allow_new_ref: false,
            root_only: false,
        }
    }

    pub fn with_expected_state(mut self, expected: ExpectedState) -> Self {
        self.expected = Some(expected);
        self
    }

    /// Permit this edit to create the ref.
    pub fn allow_new_ref(mut self) -> Self {
        self.allow_new_ref = true;
        self
    }

    /// Only valid as the ref's first commit. Implies [`allow_new_ref`](Self::allow_new_ref).
    pub fn root_only(mut self) -> Self {
        self.root_only = true;
        self.allow_new_ref = true;
        self
    }
}

impl Edit for TreeEdit {
    fn project(&self) -> &RepoName {
        &self.project
    }

    fn entity(&self) -> EntityId {
        self.entity
    }

    fn ref_name(&self) -> String {
        match self.kind {
            EntityRefKind::Meta => entity_meta_ref(self.entity),
            EntityRefKind::Annotations => annotation_ref(self.entity),
        }
    }

    fn expected_state(&self) -> Option<&ExpectedState> {
        self.expected.as_ref()
    }

    fn allow_write_to_new_ref(&self) -> bool {
        self.allow_new_ref
    }

    fn is_root_only(&self) -> bool {
        self.root_only
    }

    fn apply(&self, stage: &mut Stage<'_>, tip: ObjectId) -> TxnResult<Option<ObjectId>> {
        self.spec.commit_onto(stage, tip)
    }
}

/// Appends a commit to one account's annex ref. Drafts may always start a
/// new ref.
#[derive(Clone, Debug)]
pub struct DraftEdit {
    project: RepoName,
    entity: EntityId,
    account: AccountId,
    spec: CommitSpec,
    expected: Option<ExpectedState>,
}

impl DraftEdit {
    pub fn new(project: RepoName, entity: EntityId, account: AccountId, spec: CommitSpec) -> Self {
        Self {
            project,
            entity,
            account,
            spec,
            expected: None,
        }
    }

    pub fn with_expected_state(mut self, expected: ExpectedState) -> Self {
        self.expected = Some(expected);
        self
    }
}

impl Edit for DraftEdit {
    fn project(&self) -> &RepoName {
        &self.project
    }

    fn entity(&self) -> EntityId {
        self.entity
    }

    fn ref_name(&self) -> String {
        annex_ref(self.entity, self.account)
    }

    fn expected_state(&self) -> Option<&ExpectedState> {
        self.expected.as_ref()
    }

    fn allow_write_to_new_ref(&self) -> bool {
        true
    }

    fn apply(&self, stage: &mut Stage<'_>, tip: ObjectId) -> TxnResult<Option<ObjectId>> {
        self.spec.commit_onto(stage, tip)
    }
}

impl AnnexEdit for DraftEdit {
    fn account(&self) -> AccountId {
        self.account
    }
}

/// First-parent history ending at `tip`, oldest first.
fn first_parent_history(
    reader: LayeredReader<'_>,
    tip: ObjectId,
) -> Result<Vec<(ObjectId, Commit)>, RewriteError> {
    let mut history = Vec::new();
    let mut next = Some(tip);
    while let Some(id) = next {
        let commit = reader.read_commit(&id).map_err(RewriteError::from_history)?;
        next = commit.first_parent();
        history.push((id, commit));
    }
    history.reverse();
    Ok(history)
}

/// Re-insert `history[from..]` after `change` runs on each commit, rewiring
/// first parents onto the rebuilt chain. Returns the new tip.
fn rebuild(
    stage: &mut Stage<'_>,
    history: &[(ObjectId, Commit)],
    from: usize,
    mut change: impl FnMut(&mut Stage<'_>, &mut Commit) -> Result<(), RewriteError>,
) -> Result<ObjectId, RewriteError> {
    let mut parent = from.checked_sub(1).map(|i| history[i].0);
    for (_, original) in &history[from..] {
        let mut commit = original.clone();
        change(stage, &mut commit)?;
        if let Some(p) = parent {
            if commit.parents.is_empty() {
                commit.parents.push(p);
            } else {
                commit.parents[0] = p;
            }
        }
        parent = Some(stage.insert_commit(&commit)?);
    }
    parent.ok_or_else(|| RewriteError::Malformed("nothing to rebuild".into()))
}

/// Removes a key from every commit of a ref's first-parent history.
///
/// Commits older than the first one carrying the key are kept as they are.
#[derive(Clone, Debug)]
pub struct PurgeKeyRewrite {
    project: RepoName,
    entity: EntityId,
    key: String,
}

impl PurgeKeyRewrite {
    pub fn new(project: RepoName, entity: EntityId, key: impl Into<String>) -> Self {
        Self {
            project,
            entity,
            key: key.into(),
        }
    }
}

impl HistoryRewrite for PurgeKeyRewrite {
    fn project(&self) -> &RepoName {
        &self.project
    }

    fn entity(&self) -> EntityId {
        self.entity
    }

    fn ref_name(&self) -> String {
        entity_meta_ref(self.entity)
    }

    fn rewrite(
        &self,
        stage: &mut Stage<'_>,
        tip: ObjectId,
    ) -> Result<Option<ObjectId>, RewriteError> {
        let history = first_parent_history(stage.reader(), tip)?;
        let mut first_carrier = None;
        for (i, (_, commit)) in history.iter().enumerate() {
            let tree = stage.reader().read_tree(&commit.tree).map_err(RewriteError::from_history)?;
            if tree.get(&self.key).is_some() {
                first_carrier = Some(i);
                break;
            }
        }
        let Some(from) = first_carrier else {
            return Ok(None);
        };
        let new_tip = rebuild(stage, &history, from, |stage, commit| {
            let mut tree = stage.reader().read_tree(&commit.tree).map_err(RewriteError::from_history)?;
            tree.remove(&self.key);
            commit.tree = stage.insert_tree(&tree)?;
            Ok(())
        })?;
        Ok(Some(new_tip))
    }
}

/// Replaces the message of one commit and rebuilds its descendants.
#[derive(Clone, Debug)]
pub struct RewordRewrite {
    project: RepoName,
    entity: EntityId,
    target: ObjectId,
    message: String,
}

impl RewordRewrite {
    pub fn new(
        project: RepoName,
        entity: EntityId,
        target: ObjectId,
        message: impl Into<String>,
    ) -> Self {
        Self {
            project,
            entity,
            target,
            message: message.into(),
        }
    }
}

impl HistoryRewrite for RewordRewrite {
    fn project(&self) -> &RepoName {
        &self.project
    }

    fn entity(&self) -> EntityId {
        self.entity
    }

    fn ref_name(&self) -> String {
        entity_meta_ref(self.entity)
    }

    fn rewrite(
        &self,
        stage: &mut Stage<'_>,
        tip: ObjectId,
    ) -> Result<Option<ObjectId>, RewriteError> {
        let history = first_parent_history(stage.reader(), tip)?;
        let from = history
            .iter()
            .position(|(id, _)| *id == self.target)
            .ok_or_else(|| {
                RewriteError::Malformed(format!(
                    "commit {} is not in the history of {}",
                    self.target.short_hex(),
                    tip.short_hex()
                ))
            })?;
        if history[from].1.message == self.message {
            return Ok(None);
        }
        let target = from;
        let mut index = from;
        let new_tip = rebuild(stage, &history, from, |_, commit| {
            if index == target {
                commit.message = self.message.clone();
            }
            index += 1;
            Ok(())
        })?;
        Ok(Some(new_tip))
    }
}

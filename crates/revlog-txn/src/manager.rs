//! The single-use transaction façade.

use std::sync::Arc;
use std::time::{Duration, Instant};

use revlog_crypto::Attestation;
use revlog_refs::{BatchRefUpdate, RefTransition};
use revlog_types::{EntityId, Identity, RepoName};
use tracing::{debug, info};

use crate::check::{check_annex, check_metadata};
use crate::collector::UpdateCollector;
use crate::commands::RefTransitions;
use crate::config::TxnConfig;
use crate::context::StagingContext;
use crate::edit::{AnnexEdit, Edit, HistoryRewrite};
use crate::error::{TxnError, TxnResult};
use crate::repo::{Repository, RepositoryManager};
use crate::stage::{stage_appends, stage_deletions, stage_rewrites, StageListener, StagePhase};

/// How long the last [`UpdateManager::execute_with`] call took.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExecuteTimings {
    /// Both expected-state checks and every staging phase. `None` when there
    /// was nothing to stage or staging failed.
    pub stage: Option<Duration>,
    /// The whole call, including submission and closing repositories.
    pub total: Duration,
}

/// Collects edits for one project and applies them as one batch per
/// repository.
///
/// Edits to entity metadata, annotation and rewrite refs land in the project
/// repository; annex edits land in the shared repository named by
/// [`TxnConfig::shared_repo`]. The project batch is submitted first. The two
/// batches are each atomic but not atomic together: if the shared batch fails
/// after the project batch landed, the caller has to reconcile.
///
/// A manager executes at most once. Repositories it opened are closed when
/// [`execute`](Self::execute) returns, on [`close`](Self::close), or on drop.
///
/// ```
/// use std::sync::Arc;
/// use revlog_txn::{CommitSpec, InMemoryRepositoryManager, TreeEdit, TxnConfig, UpdateManager};
/// use revlog_types::{EntityId, Identity, RepoName};
///
/// let repos = Arc::new(InMemoryRepositoryManager::new());
/// let project = RepoName::new("project").unwrap();
/// repos.create(&project);
///
/// let spec = CommitSpec::new(Identity::new("Alice", "alice@example.com"), "Create")
///     .put("subject", "Fix the frobnicator");
/// let edit = TreeEdit::metadata(project.clone(), EntityId::new(1).unwrap(), spec).allow_new_ref();
///
/// let mut txn = UpdateManager::new(project, repos, TxnConfig::default());
/// txn.add_metadata_edit(Box::new(edit)).unwrap();
/// let batch = txn.execute().unwrap().expect("one ref moved");
/// assert_eq!(batch.commands()[0].name, "refs/changes/01/1/meta");
/// ```
pub struct UpdateManager {
    project: RepoName,
    repo_manager: Arc<dyn RepositoryManager>,
    config: TxnConfig,

    metadata: UpdateCollector<dyn Edit>,
    annex: UpdateCollector<dyn AnnexEdit>,
    annotations: UpdateCollector<dyn Edit>,
    rewrites: UpdateCollector<dyn HistoryRewrite>,
    deletions: Vec<EntityId>,

    primary: Option<StagingContext>,
    shared: Option<StagingContext>,

    log_message: Option<String>,
    log_identity: Option<Identity>,
    attestation: Option<Attestation>,
    caller_label: Option<String>,
    listener: Option<Box<dyn StageListener>>,
    executed: bool,
    timings: Option<ExecuteTimings>,
}

impl UpdateManager {
    pub fn new(
        project: RepoName,
        repo_manager: Arc<dyn RepositoryManager>,
        config: TxnConfig,
    ) -> Self {
        Self {
            project,
            repo_manager,
            config,
            metadata: UpdateCollector::new(),
            annex: UpdateCollector::new(),
            annotations: UpdateCollector::new(),
            rewrites: UpdateCollector::new(),
            deletions: Vec::new(),
            primary: None,
            shared: None,
            log_message: None,
            log_identity: None,
            attestation: None,
            caller_label: None,
            listener: None,
            executed: false,
            timings: None,
        }
    }

    pub fn project(&self) -> &RepoName {
        &self.project
    }

    pub fn is_executed(&self) -> bool {
        self.executed
    }

    /// Set once [`execute_with`](Self::execute_with) has run, whatever its
    /// outcome.
    pub fn timings(&self) -> Option<ExecuteTimings> {
        self.timings
    }

    fn ensure_open(&self) -> TxnResult<()> {
        if self.executed {
            return Err(TxnError::AlreadyExecuted);
        }
        Ok(())
    }

    fn ensure_project(&self, project: &RepoName) -> TxnResult<()> {
        if *project != self.project {
            return Err(TxnError::WrongRepository {
                expected: self.project.clone(),
                actual: project.clone(),
            });
        }
        Ok(())
    }

    pub fn add_metadata_edit(&mut self, edit: Box<dyn Edit>) -> TxnResult<()> {
        self.ensure_open()?;
        self.ensure_project(edit.project())?;
        let ref_name = edit.ref_name();
        if self.rewrites.contains(&ref_name) {
            return Err(TxnError::ConflictingEdits { ref_name });
        }
        self.metadata.add(ref_name, edit);
        Ok(())
    }

    pub fn add_annex_edit(&mut self, edit: Box<dyn AnnexEdit>) -> TxnResult<()> {
        self.ensure_open()?;
        self.ensure_project(edit.project())?;
        self.annex.add(edit.ref_name(), edit);
        Ok(())
    }

    pub fn add_annotation_edit(&mut self, edit: Box<dyn Edit>) -> TxnResult<()> {
        self.ensure_open()?;
        self.ensure_project(edit.project())?;
        let ref_name = edit.ref_name();
        if self.rewrites.contains(&ref_name) {
            return Err(TxnError::ConflictingEdits { ref_name });
        }
        self.annotations.add(ref_name, edit);
        Ok(())
    }

    pub fn add_rewrite(&mut self, rewrite: Box<dyn HistoryRewrite>) -> TxnResult<()> {
        self.ensure_open()?;
        self.ensure_project(rewrite.project())?;
        let ref_name = rewrite.ref_name();
        if self.metadata.contains(&ref_name) || self.annotations.contains(&ref_name) {
            return Err(TxnError::ConflictingEdits { ref_name });
        }
        self.rewrites.add(ref_name, rewrite);
        Ok(())
    }

    /// Remove the entity's metadata ref and every account's annex ref for it.
    pub fn mark_for_deletion(&mut self, entity: EntityId) -> TxnResult<()> {
        self.ensure_open()?;
        if !self.deletions.contains(&entity) {
            self.deletions.push(entity);
        }
        Ok(())
    }

    pub fn set_log_message(&mut self, message: impl Into<String>) -> TxnResult<()> {
        self.ensure_open()?;
        self.log_message = Some(message.into());
        Ok(())
    }

    pub fn set_log_identity(&mut self, identity: Identity) -> TxnResult<()> {
        self.ensure_open()?;
        self.log_identity = Some(identity);
        Ok(())
    }

    /// Attach a push attestation to the project batch.
    pub fn set_attestation(&mut self, attestation: Attestation) -> TxnResult<()> {
        self.ensure_open()?;
        self.attestation = Some(attestation);
        Ok(())
    }

    /// Name of the operation driving this transaction, used as the log
    /// message when none is set.
    pub fn set_caller_label(&mut self, label: impl Into<String>) -> TxnResult<()> {
        self.ensure_open()?;
        self.caller_label = Some(label.into());
        Ok(())
    }

    pub fn set_stage_listener(&mut self, listener: Box<dyn StageListener>) -> TxnResult<()> {
        self.ensure_open()?;
        self.listener = Some(listener);
        Ok(())
    }

    /// Stage project edits against a repository the caller already holds,
    /// starting from transitions the caller accumulated. The caller keeps
    /// ownership of `repo` and closes it.
    pub fn set_primary_context(
        &mut self,
        repo: Arc<Repository>,
        transitions: RefTransitions,
    ) -> TxnResult<()> {
        self.ensure_open()?;
        if self.primary.is_some() {
            return Err(TxnError::InvalidState(
                "primary staging context is already open".into(),
            ));
        }
        self.ensure_project(repo.name())?;
        self.primary = Some(StagingContext::donated(repo, transitions));
        Ok(())
    }

    pub fn primary_context(&self) -> Option<&StagingContext> {
        self.primary.as_ref()
    }

    pub fn shared_context(&self) -> Option<&StagingContext> {
        self.shared.as_ref()
    }

    fn open_primary(&mut self) -> TxnResult<()> {
        if self.primary.is_none() {
            let repo = self.repo_manager.open(&self.project)?;
            self.primary = Some(StagingContext::open(repo));
        }
        Ok(())
    }

    fn open_shared(&mut self) -> TxnResult<()> {
        if self.shared.is_none() {
            let repo = self.repo_manager.open(&self.config.shared_repo)?;
            self.shared = Some(StagingContext::open(repo));
        }
        Ok(())
    }

    /// Write objects staged so far into their repositories without moving
    /// any ref.
    pub fn flush(&mut self) -> TxnResult<()> {
        self.ensure_open()?;
        for ctx in [self.primary.as_mut(), self.shared.as_mut()].into_iter().flatten() {
            ctx.flush()?;
        }
        Ok(())
    }

    fn has_donated_transitions(&self) -> bool {
        [&self.primary, &self.shared]
            .into_iter()
            .flatten()
            .any(|ctx| !ctx.transitions().is_empty())
    }

    fn is_empty(&self) -> bool {
        self.metadata.is_empty()
            && self.annex.is_empty()
            && self.annotations.is_empty()
            && self.rewrites.is_empty()
            && self.deletions.is_empty()
            && !self.has_donated_transitions()
    }

    pub fn execute(&mut self) -> TxnResult<Option<BatchRefUpdate>> {
        self.execute_with(false)
    }

    /// Stage, check and submit every queued edit.
    ///
    /// Returns the project repository's batch with per-command results, or
    /// `None` when no project ref moves. With `dry_run`, objects are still
    /// written but no batch is submitted and every command stays
    /// [`NotAttempted`](revlog_refs::CommandStatus::NotAttempted).
    ///
    /// The manager is spent after this call whatever the outcome.
    pub fn execute_with(&mut self, dry_run: bool) -> TxnResult<Option<BatchRefUpdate>> {
        self.ensure_open()?;
        self.executed = true;
        let start = Instant::now();
        let mut stage = None;
        let result = self.run(dry_run, &mut stage);
        self.close();
        let timings = ExecuteTimings {
            stage,
            total: start.elapsed(),
        };
        debug!(
            project = %self.project,
            ok = result.is_ok(),
            stage = ?stage,
            total = ?timings.total,
            "update manager executed"
        );
        self.timings = Some(timings);
        result
    }

    fn run(
        &mut self,
        dry_run: bool,
        stage_elapsed: &mut Option<Duration>,
    ) -> TxnResult<Option<BatchRefUpdate>> {
        if self.is_empty() {
            debug!(project = %self.project, "nothing to execute");
            return Ok(None);
        }
        let stage_start = Instant::now();
        self.stage_all()?;
        *stage_elapsed = Some(stage_start.elapsed());
        debug!(
            project = %self.project,
            metadata_refs = self.metadata.ref_count(),
            annex_refs = self.annex.ref_count(),
            annotation_refs = self.annotations.ref_count(),
            rewrite_refs = self.rewrites.ref_count(),
            deletions = self.deletions.len(),
            "staged edits"
        );

        let message = self
            .log_message
            .clone()
            .or_else(|| self.caller_label.clone())
            .unwrap_or_else(|| self.config.default_message.clone());
        let identity = self
            .log_identity
            .clone()
            .unwrap_or_else(|| self.config.server_identity());

        let primary = match self.primary.as_mut() {
            Some(ctx) => submit(ctx, &message, &identity, self.attestation.clone(), dry_run)?,
            None => None,
        };
        if let Some(ctx) = self.shared.as_mut() {
            submit(ctx, &message, &identity, None, dry_run)?;
        }
        Ok(primary)
    }

    fn stage_all(&mut self) -> TxnResult<()> {
        let needs_primary = !self.metadata.is_empty()
            || !self.annotations.is_empty()
            || !self.rewrites.is_empty()
            || !self.deletions.is_empty();
        if needs_primary {
            self.open_primary()?;
        }
        if !self.annex.is_empty() || !self.deletions.is_empty() {
            self.open_shared()?;
        }

        self.check()?;

        if let Some(ctx) = self.primary.as_mut() {
            stage_appends(ctx, &self.metadata)?;
        }
        self.notify(StagePhase::Metadata);

        if let Some(ctx) = self.shared.as_mut() {
            stage_appends(ctx, &self.annex)?;
        }
        self.notify(StagePhase::Annex);

        if let Some(ctx) = self.primary.as_mut() {
            stage_appends(ctx, &self.annotations)?;
        }
        self.notify(StagePhase::Annotations);

        if let Some(ctx) = self.primary.as_mut() {
            stage_rewrites(ctx, &self.rewrites)?;
        }
        self.notify(StagePhase::Rewrites);

        if !self.deletions.is_empty() {
            let primary = self
                .primary
                .as_mut()
                .ok_or_else(|| TxnError::InvalidState("primary context not open".into()))?;
            stage_deletions(primary, self.shared.as_mut(), &self.deletions)?;
        }
        self.notify(StagePhase::Deletions);

        self.check()
    }

    fn check(&mut self) -> TxnResult<()> {
        check_metadata(self.primary.as_mut(), &self.metadata)?;
        check_annex(self.shared.as_mut(), &self.annex)
    }

    fn notify(&mut self, phase: StagePhase) {
        fn transitions(ctx: &Option<StagingContext>) -> &[RefTransition] {
            ctx.as_ref().map(|c| c.transitions().transitions()).unwrap_or(&[])
        }
        if let Some(listener) = self.listener.as_mut() {
            listener.after_phase(phase, transitions(&self.primary), transitions(&self.shared));
        }
    }

    /// Release staging contexts, shared first. Safe to call more than once.
    pub fn close(&mut self) {
        if let Some(mut ctx) = self.shared.take() {
            ctx.close();
        }
        if let Some(mut ctx) = self.primary.take() {
            ctx.close();
        }
    }
}

impl Drop for UpdateManager {
    fn drop(&mut self) {
        self.close();
    }
}

fn submit(
    ctx: &mut StagingContext,
    message: &str,
    identity: &Identity,
    attestation: Option<Attestation>,
    dry_run: bool,
) -> TxnResult<Option<BatchRefUpdate>> {
    ctx.flush()?;
    if ctx.transitions().is_empty() {
        return Ok(None);
    }
    let mut batch = BatchRefUpdate::new();
    batch
        .set_message(message)
        .set_identity(identity.clone())
        .set_attestation(attestation);
    ctx.transitions().add_to(&mut batch);

    let repo = ctx.repo()?;
    if dry_run {
        info!(repo = %repo.name(), refs = batch.len(), "dry run: ref batch not submitted");
        return Ok(Some(batch));
    }
    repo.refs().apply_batch(&mut batch)?;
    info!(repo = %repo.name(), refs = batch.len(), "committed ref batch");
    Ok(Some(batch))
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use revlog_crypto::SigningKey;
    use revlog_refs::{
        annex_prefix, annex_ref, annotation_ref, entity_meta_ref, CommandStatus, InMemoryRefStore,
        RefStore,
    };
    use revlog_store::ObjectStore;
    use revlog_types::{AccountId, ObjectId};

    use super::*;
    use crate::edits::{CommitSpec, DraftEdit, PurgeKeyRewrite, TreeEdit};
    use crate::error::ErrorKind;
    use crate::expected::ExpectedState;
    use crate::repo::InMemoryRepositoryManager;

    struct Fixture {
        repos: Arc<InMemoryRepositoryManager>,
        project: RepoName,
    }

    fn fixture() -> Fixture {
        let repos = Arc::new(InMemoryRepositoryManager::new());
        let project = RepoName::new("project").unwrap();
        repos.create(&project);
        repos.create(&RepoName::all_users());
        Fixture { repos, project }
    }

    fn entity(n: u32) -> EntityId {
        EntityId::new(n).unwrap()
    }

    fn account(n: u32) -> AccountId {
        AccountId::new(n).unwrap()
    }

    fn author() -> Identity {
        Identity::at("Alice", "alice@example.com", 1_000)
    }

    fn spec(message: &str) -> CommitSpec {
        CommitSpec::new(author(), message)
    }

    impl Fixture {
        fn manager(&self) -> UpdateManager {
            UpdateManager::new(
                self.project.clone(),
                Arc::clone(&self.repos) as Arc<dyn RepositoryManager>,
                TxnConfig::default(),
            )
        }

        fn primary_refs(&self) -> Arc<InMemoryRefStore> {
            self.repos.ref_store(&self.project).unwrap()
        }

        fn shared_refs(&self) -> Arc<InMemoryRefStore> {
            self.repos.ref_store(&RepoName::all_users()).unwrap()
        }

        fn meta(&self, e: EntityId) -> ObjectId {
            self.primary_refs().resolve(&entity_meta_ref(e)).unwrap()
        }

        fn annex(&self, e: EntityId, a: AccountId) -> ObjectId {
            self.shared_refs().resolve(&annex_ref(e, a)).unwrap()
        }

        fn meta_edit(&self, e: EntityId, spec: CommitSpec) -> TreeEdit {
            TreeEdit::metadata(self.project.clone(), e, spec)
        }

        fn seed(&self, e: EntityId, spec: CommitSpec) -> ObjectId {
            let mut txn = self.manager();
            txn.add_metadata_edit(Box::new(self.meta_edit(e, spec).allow_new_ref()))
                .unwrap();
            txn.execute().unwrap();
            self.meta(e)
        }

        fn seed_draft(&self, e: EntityId, a: AccountId, spec: CommitSpec) -> ObjectId {
            let mut txn = self.manager();
            txn.add_annex_edit(Box::new(DraftEdit::new(self.project.clone(), e, a, spec)))
                .unwrap();
            txn.execute().unwrap();
            self.annex(e, a)
        }

        fn assert_released(&self) {
            let stats = self.repos.stats();
            assert_eq!(stats.open_repos(), 0, "repositories left open");
            assert_eq!(stats.open_readers(), 0, "readers left open");
        }
    }

    type Observed = Vec<(StagePhase, Vec<RefTransition>, Vec<RefTransition>)>;

    #[derive(Clone, Default)]
    struct Recorder(Rc<RefCell<Observed>>);

    impl StageListener for Recorder {
        fn after_phase(
            &mut self,
            phase: StagePhase,
            primary: &[RefTransition],
            shared: &[RefTransition],
        ) {
            self.0
                .borrow_mut()
                .push((phase, primary.to_vec(), shared.to_vec()));
        }
    }

    #[test]
    fn creates_then_appends_metadata() {
        let fx = fixture();
        let first = fx.seed(entity(1), spec("Create").put("subject", "v1"));
        assert!(!first.is_null());

        let mut txn = fx.manager();
        txn.add_metadata_edit(Box::new(fx.meta_edit(entity(1), spec("Edit").put("subject", "v2"))))
            .unwrap();
        let batch = txn.execute().unwrap().unwrap();
        assert_eq!(batch.commands().len(), 1);
        assert_eq!(batch.commands()[0].old, first);
        assert!(batch.statuses()[0].is_ok());
        assert_eq!(fx.meta(entity(1)), batch.commands()[0].new);

        let log = fx.primary_refs().reflog(&entity_meta_ref(entity(1))).unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[1].message.as_deref(), Some("Update entity refs"));
        assert_eq!(log[1].identity.as_ref().unwrap().name, "revlog");
        fx.assert_released();
    }

    #[test]
    fn new_ref_needs_an_edit_that_may_create_it() {
        let fx = fixture();
        let mut txn = fx.manager();
        txn.add_metadata_edit(Box::new(fx.meta_edit(entity(1), spec("a").put("k", "v"))))
            .unwrap();
        assert!(txn.execute().unwrap().is_none());
        assert!(fx.meta(entity(1)).is_null());

        // One permitting edit is enough for the whole ref.
        let mut txn = fx.manager();
        txn.add_metadata_edit(Box::new(fx.meta_edit(entity(1), spec("a").put("k", "v"))))
            .unwrap();
        txn.add_metadata_edit(Box::new(
            fx.meta_edit(entity(1), spec("b").put("j", "w")).allow_new_ref(),
        ))
        .unwrap();
        assert!(txn.execute().unwrap().is_some());
        assert!(!fx.meta(entity(1)).is_null());
        fx.assert_released();
    }

    #[test]
    fn chained_edits_fold_into_one_transition() {
        let fx = fixture();
        let base = fx.seed(entity(3), spec("Create").put("a", "1"));

        let mut txn = fx.manager();
        txn.add_metadata_edit(Box::new(fx.meta_edit(entity(3), spec("b").put("b", "2"))))
            .unwrap();
        txn.add_metadata_edit(Box::new(fx.meta_edit(entity(3), spec("c").put("c", "3"))))
            .unwrap();
        let batch = txn.execute().unwrap().unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.commands()[0].old, base);

        let objects = fx.repos.object_store(&fx.project).unwrap();
        let tip = objects.read_commit(&fx.meta(entity(3))).unwrap();
        assert_eq!(tip.message, "c");
        let middle = objects.read_commit(&tip.parents[0]).unwrap();
        assert_eq!(middle.message, "b");
        assert_eq!(middle.parents, vec![base]);
    }

    #[test]
    fn net_neutral_edit_leaves_ref_untouched() {
        let fx = fixture();
        let base = fx.seed(entity(2), spec("Create").put("flag", "off"));

        let mut txn = fx.manager();
        txn.add_metadata_edit(Box::new(
            fx.meta_edit(entity(2), spec("toggle").put("flag", "on").put("flag", "off")),
        ))
        .unwrap();
        assert!(txn.execute().unwrap().is_none());
        assert_eq!(fx.meta(entity(2)), base);
        assert_eq!(fx.primary_refs().reflog(&entity_meta_ref(entity(2))).unwrap().len(), 1);
    }

    #[test]
    fn locked_ref_fails_whole_batch() {
        let fx = fixture();
        fx.primary_refs().lock_ref(entity_meta_ref(entity(2))).unwrap();

        let mut txn = fx.manager();
        for n in [1, 2, 3] {
            txn.add_metadata_edit(Box::new(
                fx.meta_edit(entity(n), spec("Create").put("k", "v")).allow_new_ref(),
            ))
            .unwrap();
        }
        let err = txn.execute().unwrap_err();
        assert!(matches!(err, TxnError::Ref(_)));
        assert_eq!(err.kind(), ErrorKind::Storage);
        assert!(fx.primary_refs().is_empty());
        fx.assert_released();
    }

    #[test]
    fn metadata_is_staged_before_annex() {
        let fx = fixture();
        let recorder = Recorder::default();
        let mut txn = fx.manager();
        txn.set_stage_listener(Box::new(recorder.clone())).unwrap();
        txn.add_annex_edit(Box::new(DraftEdit::new(
            fx.project.clone(),
            entity(5),
            account(9),
            spec("draft").put("comment", "wip"),
        )))
        .unwrap();
        txn.add_metadata_edit(Box::new(
            fx.meta_edit(entity(5), spec("Create").put("k", "v")).allow_new_ref(),
        ))
        .unwrap();
        txn.execute().unwrap();

        let observed = recorder.0.borrow();
        let phases: Vec<StagePhase> = observed.iter().map(|(p, _, _)| *p).collect();
        assert_eq!(
            phases,
            vec![
                StagePhase::Metadata,
                StagePhase::Annex,
                StagePhase::Annotations,
                StagePhase::Rewrites,
                StagePhase::Deletions,
            ]
        );
        let (_, primary, shared) = &observed[0];
        assert_eq!(primary.len(), 1);
        assert_eq!(primary[0].name, entity_meta_ref(entity(5)));
        assert!(shared.is_empty());
        let (_, _, shared) = &observed[1];
        assert_eq!(shared[0].name, annex_ref(entity(5), account(9)));
        assert!(!fx.annex(entity(5), account(9)).is_null());
    }

    #[test]
    fn stale_metadata_aborts_before_any_ref_moves() {
        let fx = fixture();
        let actual = fx.seed(entity(7), spec("Create").put("k", "v"));
        let believed = ObjectId::from_bytes(b"an older tip");

        let mut txn = fx.manager();
        txn.add_metadata_edit(Box::new(
            fx.meta_edit(entity(7), spec("Edit").put("k", "w"))
                .with_expected_state(ExpectedState::snapshot(believed)),
        ))
        .unwrap();
        match txn.execute() {
            Err(TxnError::StaleMetadata {
                entity: e,
                expected,
                actual: found,
            }) => {
                assert_eq!(e, entity(7));
                assert_eq!(expected, believed);
                assert_eq!(found, actual);
            }
            other => panic!("expected stale metadata, got {other:?}"),
        }
        assert_eq!(fx.meta(entity(7)), actual);
        fx.assert_released();
    }

    #[test]
    fn matching_expected_state_passes() {
        let fx = fixture();
        let actual = fx.seed(entity(7), spec("Create").put("k", "v"));
        let mut txn = fx.manager();
        txn.add_metadata_edit(Box::new(
            fx.meta_edit(entity(7), spec("Edit").put("k", "w"))
                .with_expected_state(ExpectedState::snapshot(actual)),
        ))
        .unwrap();
        assert!(txn.execute().unwrap().is_some());
    }

    #[test]
    fn store_authority_skips_the_check() {
        let fx = fixture();
        fx.seed(entity(7), spec("Create").put("k", "v"));
        let mut txn = fx.manager();
        txn.add_metadata_edit(Box::new(
            fx.meta_edit(entity(7), spec("Edit").put("k", "w"))
                .with_expected_state(ExpectedState::store_authoritative()),
        ))
        .unwrap();
        assert!(txn.execute().unwrap().is_some());
    }

    #[test]
    fn only_first_edit_expectation_counts() {
        let fx = fixture();
        let actual = fx.seed(entity(8), spec("Create").put("k", "v"));
        let mut txn = fx.manager();
        txn.add_metadata_edit(Box::new(
            fx.meta_edit(entity(8), spec("1").put("a", "1"))
                .with_expected_state(ExpectedState::snapshot(actual)),
        ))
        .unwrap();
        // The chained edit's stale belief is not consulted, and the second
        // pass still compares against the pre-transaction value.
        txn.add_metadata_edit(Box::new(
            fx.meta_edit(entity(8), spec("2").put("b", "2"))
                .with_expected_state(ExpectedState::snapshot(ObjectId::from_bytes(b"x"))),
        ))
        .unwrap();
        assert!(txn.execute().unwrap().is_some());
    }

    #[test]
    fn stale_annex_is_a_concurrency_error() {
        let fx = fixture();
        let meta = fx.seed(entity(4), spec("Create").put("k", "v"));
        let draft = fx.seed_draft(entity(4), account(1), spec("draft").put("c", "1"));

        let mut txn = fx.manager();
        txn.add_annex_edit(Box::new(
            DraftEdit::new(fx.project.clone(), entity(4), account(1), spec("more").put("c", "2"))
                .with_expected_state(ExpectedState::snapshot(meta)),
        ))
        .unwrap();
        let err = txn.execute().unwrap_err();
        assert!(err.is_retryable());
        match err {
            TxnError::StaleAnnex {
                account: a,
                expected,
                actual,
                ..
            } => {
                assert_eq!(a, account(1));
                assert!(expected.is_null());
                assert_eq!(actual, draft);
            }
            other => panic!("expected stale annex, got {other:?}"),
        }
        assert_eq!(fx.annex(entity(4), account(1)), draft);
        fx.assert_released();
    }

    #[test]
    fn deletion_tombstones_meta_and_every_annex_ref() {
        let fx = fixture();
        let meta = fx.seed(entity(6), spec("Create").put("k", "v"));
        fx.seed_draft(entity(6), account(1), spec("d1").put("c", "1"));
        fx.seed_draft(entity(6), account(2), spec("d2").put("c", "2"));
        let other = fx.seed(entity(106), spec("Create").put("k", "v"));
        fx.seed_draft(entity(106), account(1), spec("d").put("c", "x"));

        let recorder = Recorder::default();
        let mut txn = fx.manager();
        txn.set_stage_listener(Box::new(recorder.clone())).unwrap();
        txn.mark_for_deletion(entity(6)).unwrap();
        let batch = txn.execute().unwrap().unwrap();

        assert_eq!(batch.commands(), &[RefTransition::delete(meta, entity_meta_ref(entity(6)))]);
        let observed = recorder.0.borrow();
        let (phase, primary, shared) = observed.last().unwrap();
        assert_eq!(*phase, StagePhase::Deletions);
        assert_eq!(primary.len() + shared.len(), 3);
        assert!(primary.iter().chain(shared.iter()).all(|t| t.new.is_null()));

        assert!(fx.meta(entity(6)).is_null());
        assert!(fx.shared_refs().list_refs(&annex_prefix(entity(6))).unwrap().is_empty());
        assert_eq!(fx.meta(entity(106)), other);
        assert!(!fx.annex(entity(106), account(1)).is_null());
        fx.assert_released();
    }

    #[test]
    fn execute_is_single_use() {
        let fx = fixture();
        let mut txn = fx.manager();
        txn.add_metadata_edit(Box::new(
            fx.meta_edit(entity(1), spec("Create").put("k", "v")).allow_new_ref(),
        ))
        .unwrap();
        let first = txn.execute().unwrap().unwrap();

        assert!(matches!(txn.execute(), Err(TxnError::AlreadyExecuted)));
        assert!(matches!(txn.mark_for_deletion(entity(1)), Err(TxnError::AlreadyExecuted)));
        assert!(matches!(txn.flush(), Err(TxnError::AlreadyExecuted)));
        let again = txn.add_metadata_edit(Box::new(fx.meta_edit(entity(1), spec("x"))));
        assert_eq!(again.unwrap_err().kind(), ErrorKind::InvalidState);
        assert_eq!(fx.meta(entity(1)), first.commands()[0].new);
    }

    #[test]
    fn failed_execute_still_spends_the_manager() {
        let fx = fixture();
        fx.seed(entity(1), spec("Create").put("k", "v"));
        let mut txn = fx.manager();
        txn.add_metadata_edit(Box::new(
            fx.meta_edit(entity(1), spec("Edit").put("k", "w"))
                .with_expected_state(ExpectedState::snapshot(ObjectId::null())),
        ))
        .unwrap();
        assert!(txn.execute().is_err());
        assert!(matches!(txn.execute(), Err(TxnError::AlreadyExecuted)));
    }

    #[test]
    fn dry_run_flushes_objects_but_moves_nothing() {
        let fx = fixture();
        let base = fx.seed(entity(1), spec("Create").put("k", "v"));
        let mut txn = fx.manager();
        txn.add_metadata_edit(Box::new(fx.meta_edit(entity(1), spec("Edit").put("k", "w"))))
            .unwrap();
        let batch = txn.execute_with(true).unwrap().unwrap();

        assert_eq!(batch.statuses(), &[CommandStatus::NotAttempted]);
        let would_be = batch.commands()[0].new;
        let objects = fx.repos.object_store(&fx.project).unwrap();
        assert!(objects.exists(&would_be).unwrap());
        assert_eq!(fx.meta(entity(1)), base);
        fx.assert_released();
    }

    #[test]
    fn empty_transaction_is_a_noop() {
        let fx = fixture();
        let mut txn = fx.manager();
        assert!(txn.execute().unwrap().is_none());
        assert!(txn.is_executed());
        fx.assert_released();
    }

    #[test]
    fn donated_repository_is_not_closed() {
        let fx = fixture();
        let repo = Arc::new(fx.repos.open(&fx.project).unwrap());
        let mut txn = fx.manager();
        txn.set_primary_context(Arc::clone(&repo), RefTransitions::new())
            .unwrap();
        txn.add_metadata_edit(Box::new(
            fx.meta_edit(entity(1), spec("Create").put("k", "v")).allow_new_ref(),
        ))
        .unwrap();
        txn.execute().unwrap();

        let stats = fx.repos.stats();
        assert_eq!(stats.open_repos(), 1);
        assert_eq!(stats.open_readers(), 0);
        Arc::try_unwrap(repo).unwrap().close();
        fx.assert_released();
    }

    #[test]
    fn donated_transitions_are_submitted() {
        let fx = fixture();
        let target = fx.seed(entity(1), spec("Create").put("k", "v"));
        let repo = Arc::new(fx.repos.open(&fx.project).unwrap());
        let mut transitions = RefTransitions::new();
        transitions
            .add(RefTransition::new(ObjectId::null(), target, "refs/heads/main"))
            .unwrap();

        let mut txn = fx.manager();
        txn.set_primary_context(Arc::clone(&repo), transitions).unwrap();
        let batch = txn.execute().unwrap().unwrap();
        assert_eq!(batch.commands()[0].name, "refs/heads/main");
        assert_eq!(fx.primary_refs().resolve("refs/heads/main").unwrap(), target);
        Arc::try_unwrap(repo).unwrap().close();
    }

    #[test]
    fn primary_context_can_be_donated_once() {
        let fx = fixture();
        let repo = Arc::new(fx.repos.open(&fx.project).unwrap());
        let mut txn = fx.manager();
        txn.set_primary_context(Arc::clone(&repo), RefTransitions::new())
            .unwrap();
        let err = txn
            .set_primary_context(Arc::clone(&repo), RefTransitions::new())
            .unwrap_err();
        assert!(matches!(err, TxnError::InvalidState(_)));
        drop(txn);
        Arc::try_unwrap(repo).unwrap().close();
        fx.assert_released();
    }

    #[test]
    fn append_and_rewrite_on_one_ref_conflict() {
        let fx = fixture();
        let mut txn = fx.manager();
        txn.add_metadata_edit(Box::new(fx.meta_edit(entity(1), spec("a"))))
            .unwrap();
        let err = txn
            .add_rewrite(Box::new(PurgeKeyRewrite::new(fx.project.clone(), entity(1), "k")))
            .unwrap_err();
        assert!(matches!(err, TxnError::ConflictingEdits { .. }));

        let mut txn = fx.manager();
        txn.add_rewrite(Box::new(PurgeKeyRewrite::new(fx.project.clone(), entity(2), "k")))
            .unwrap();
        txn.add_rewrite(Box::new(PurgeKeyRewrite::new(fx.project.clone(), entity(2), "j")))
            .unwrap();
        let err = txn
            .add_metadata_edit(Box::new(fx.meta_edit(entity(2), spec("a"))))
            .unwrap_err();
        assert!(matches!(err, TxnError::ConflictingEdits { .. }));
        // The annotation ref is a different ref.
        txn.add_annotation_edit(Box::new(TreeEdit::annotation(
            fx.project.clone(),
            entity(2),
            spec("a"),
        )))
        .unwrap();
    }

    #[test]
    fn edits_for_another_project_are_rejected() {
        let fx = fixture();
        let mut txn = fx.manager();
        let other = RepoName::new("other").unwrap();
        let err = txn
            .add_metadata_edit(Box::new(TreeEdit::metadata(other, entity(1), spec("a"))))
            .unwrap_err();
        assert!(matches!(err, TxnError::WrongRepository { .. }));
    }

    #[test]
    fn root_only_edit_on_existing_ref_is_structural() {
        let fx = fixture();
        fx.seed(entity(1), spec("Create").put("k", "v"));
        let mut txn = fx.manager();
        txn.add_metadata_edit(Box::new(
            fx.meta_edit(entity(1), spec("again").put("k", "w")).root_only(),
        ))
        .unwrap();
        let err = txn.execute().unwrap_err();
        assert!(matches!(err, TxnError::RootOnly { .. }));
        assert_eq!(err.kind(), ErrorKind::Structural);
        fx.assert_released();
    }

    #[test]
    fn rewrite_of_absent_ref_is_empty_ref() {
        let fx = fixture();
        let mut txn = fx.manager();
        txn.add_rewrite(Box::new(PurgeKeyRewrite::new(fx.project.clone(), entity(1), "k")))
            .unwrap();
        let err = txn.execute().unwrap_err();
        assert!(matches!(err, TxnError::EmptyRef { .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn purge_rewrite_moves_the_ref() {
        let fx = fixture();
        let base = fx.seed(entity(1), spec("Create").put("secret", "s").put("keep", "k"));
        let mut txn = fx.manager();
        txn.add_rewrite(Box::new(PurgeKeyRewrite::new(fx.project.clone(), entity(1), "secret")))
            .unwrap();
        let batch = txn.execute().unwrap().unwrap();
        assert_eq!(batch.commands()[0].old, base);

        let objects = fx.repos.object_store(&fx.project).unwrap();
        let tip = objects.read_commit(&fx.meta(entity(1))).unwrap();
        let tree = objects.read_tree(&tip.tree).unwrap();
        assert!(tree.get("secret").is_none());
        assert!(tree.get("keep").is_some());
    }

    #[test]
    fn annotations_share_the_project_batch() {
        let fx = fixture();
        let mut txn = fx.manager();
        txn.add_metadata_edit(Box::new(
            fx.meta_edit(entity(1), spec("Create").put("k", "v")).allow_new_ref(),
        ))
        .unwrap();
        txn.add_annotation_edit(Box::new(
            TreeEdit::annotation(fx.project.clone(), entity(1), spec("robot").put("lint", "ok"))
                .allow_new_ref(),
        ))
        .unwrap();
        let batch = txn.execute().unwrap().unwrap();
        let names: Vec<&str> = batch.commands().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec![entity_meta_ref(entity(1)), annotation_ref(entity(1))]);
    }

    #[test]
    fn log_message_falls_back_to_caller_label() {
        let fx = fixture();
        let mut txn = fx.manager();
        txn.set_caller_label("PostReview").unwrap();
        txn.add_metadata_edit(Box::new(
            fx.meta_edit(entity(1), spec("a").put("k", "v")).allow_new_ref(),
        ))
        .unwrap();
        assert_eq!(txn.execute().unwrap().unwrap().message(), Some("PostReview"));

        let mut txn = fx.manager();
        txn.set_caller_label("PostReview").unwrap();
        txn.set_log_message("Publish drafts").unwrap();
        txn.set_log_identity(author()).unwrap();
        txn.add_metadata_edit(Box::new(fx.meta_edit(entity(1), spec("b").put("k", "w"))))
            .unwrap();
        let batch = txn.execute().unwrap().unwrap();
        assert_eq!(batch.message(), Some("Publish drafts"));
        assert_eq!(batch.identity(), Some(&author()));
    }

    #[test]
    fn attestation_only_on_project_batch() {
        let fx = fixture();
        let key = SigningKey::generate();
        let mut txn = fx.manager();
        txn.set_attestation(Attestation::sign(&key, "push certificate"))
            .unwrap();
        txn.add_metadata_edit(Box::new(
            fx.meta_edit(entity(1), spec("a").put("k", "v")).allow_new_ref(),
        ))
        .unwrap();
        txn.add_annex_edit(Box::new(DraftEdit::new(
            fx.project.clone(),
            entity(1),
            account(3),
            spec("d").put("c", "1"),
        )))
        .unwrap();
        txn.execute().unwrap();

        let primary_log = fx.primary_refs().reflog(&entity_meta_ref(entity(1))).unwrap();
        let attestation = primary_log[0].attestation.as_ref().unwrap();
        assert!(attestation.verify().is_ok());
        let shared_log = fx.shared_refs().reflog(&annex_ref(entity(1), account(3))).unwrap();
        assert!(shared_log[0].attestation.is_none());
    }

    #[test]
    fn flush_writes_staged_objects_early() {
        let fx = fixture();
        let repo = Arc::new(fx.repos.open(&fx.project).unwrap());
        let mut txn = fx.manager();
        txn.set_primary_context(Arc::clone(&repo), RefTransitions::new())
            .unwrap();
        txn.flush().unwrap();
        assert_eq!(txn.primary_context().unwrap().buffered_objects(), 0);
        drop(txn);
        Arc::try_unwrap(repo).unwrap().close();
        fx.assert_released();
    }

    #[test]
    fn filesystem_repositories_end_to_end() {
        use crate::repo::FsRepositoryManager;

        let dir = tempfile::tempdir().unwrap();
        let repos = Arc::new(FsRepositoryManager::new(dir.path()));
        let project = RepoName::new("project").unwrap();
        repos.create(&project).unwrap();
        repos.create(&RepoName::all_users()).unwrap();
        let txn = || {
            UpdateManager::new(
                project.clone(),
                Arc::clone(&repos) as Arc<dyn RepositoryManager>,
                TxnConfig::default(),
            )
        };

        let mut create = txn();
        create
            .add_metadata_edit(Box::new(
                TreeEdit::metadata(project.clone(), entity(34), spec("Create").put("k", "v"))
                    .allow_new_ref(),
            ))
            .unwrap();
        create
            .add_annex_edit(Box::new(DraftEdit::new(
                project.clone(),
                entity(34),
                account(1),
                spec("draft").put("c", "1"),
            )))
            .unwrap();
        let tip = create.execute().unwrap().unwrap().commands()[0].new;

        let repo = repos.open(&project).unwrap();
        assert_eq!(repo.refs().resolve("refs/changes/34/34/meta").unwrap(), tip);
        assert!(repo.objects().exists(&tip).unwrap());
        repo.close();

        let mut delete = txn();
        delete.mark_for_deletion(entity(34)).unwrap();
        delete.execute().unwrap();

        let shared = repos.open(&RepoName::all_users()).unwrap();
        assert!(shared.refs().list_refs("refs/").unwrap().is_empty());
        shared.close();
        assert_eq!(repos.stats().open_repos(), 0);
        assert_eq!(repos.stats().open_readers(), 0);
    }

    #[test]
    fn each_phase_sees_only_its_own_transitions() {
        let fx = fixture();
        fx.seed(entity(2), spec("Create").put("secret", "s"));

        let recorder = Recorder::default();
        let mut txn = fx.manager();
        txn.set_stage_listener(Box::new(recorder.clone())).unwrap();
        txn.add_annotation_edit(Box::new(
            TreeEdit::annotation(fx.project.clone(), entity(1), spec("robot").put("lint", "ok"))
                .allow_new_ref(),
        ))
        .unwrap();
        txn.add_rewrite(Box::new(PurgeKeyRewrite::new(fx.project.clone(), entity(2), "secret")))
            .unwrap();
        txn.execute().unwrap();

        let observed = recorder.0.borrow();
        let names = |phase: StagePhase| -> Vec<String> {
            let (_, primary, _) = observed.iter().find(|(p, _, _)| *p == phase).unwrap();
            primary.iter().map(|t| t.name.clone()).collect()
        };
        assert_eq!(names(StagePhase::Annotations), vec![annotation_ref(entity(1))]);
        assert_eq!(
            names(StagePhase::Rewrites),
            vec![annotation_ref(entity(1)), entity_meta_ref(entity(2))]
        );
    }

    #[test]
    fn dangling_parent_fails_rewrite_as_structural() {
        use revlog_store::{Blob, Commit, Tree};

        let fx = fixture();
        let objects = fx.repos.object_store(&fx.project).unwrap();
        let blob = objects.write(&Blob::new(b"s".to_vec()).to_stored_object()).unwrap();
        let mut tree = Tree::empty();
        tree.upsert("secret", blob);
        let tree = objects.write(&tree.to_stored_object().unwrap()).unwrap();
        let orphan = Commit {
            tree,
            parents: vec![ObjectId::from_bytes(b"ghost")],
            author: author(),
            message: "orphan".into(),
        };
        let tip = objects.write(&orphan.to_stored_object().unwrap()).unwrap();
        let mut batch = BatchRefUpdate::new();
        batch.add_command(RefTransition::new(ObjectId::null(), tip, entity_meta_ref(entity(1))));
        fx.primary_refs().apply_batch(&mut batch).unwrap();

        let mut txn = fx.manager();
        txn.add_rewrite(Box::new(PurgeKeyRewrite::new(fx.project.clone(), entity(1), "secret")))
            .unwrap();
        let err = txn.execute().unwrap_err();
        assert!(matches!(err, TxnError::RewriteFailed { .. }), "got {err:?}");
        assert_eq!(err.kind(), ErrorKind::Structural);
        assert_eq!(fx.meta(entity(1)), tip);
        fx.assert_released();
    }

    #[test]
    fn misfiled_object_fails_rewrite_as_structural() {
        use crate::repo::FsRepositoryManager;
        use revlog_store::{FsObjectStore, StoredObject};

        let dir = tempfile::tempdir().unwrap();
        let repos = Arc::new(FsRepositoryManager::new(dir.path()));
        let project = RepoName::new("project").unwrap();
        repos.create(&project).unwrap();
        let txn = || {
            UpdateManager::new(
                project.clone(),
                Arc::clone(&repos) as Arc<dyn RepositoryManager>,
                TxnConfig::default(),
            )
        };

        let mut create = txn();
        create
            .add_metadata_edit(Box::new(
                TreeEdit::metadata(project.clone(), entity(1), spec("Create").put("secret", "s"))
                    .allow_new_ref(),
            ))
            .unwrap();
        create
            .add_metadata_edit(Box::new(TreeEdit::metadata(
                project.clone(),
                entity(1),
                spec("Edit").put("keep", "k"),
            )))
            .unwrap();
        create.execute().unwrap();

        // Overwrite the root commit's file with an unrelated object.
        let objects = FsObjectStore::open(dir.path().join("project").join("objects")).unwrap();
        let repo = repos.open(&project).unwrap();
        let tip = repo.refs().resolve(&entity_meta_ref(entity(1))).unwrap();
        let root = repo.objects().read_commit(&tip).unwrap().parents[0];
        repo.close();
        let hex = root.to_hex();
        let path = objects.root().join(&hex[..2]).join(&hex[2..]);
        let other = StoredObject::new(revlog_store::ObjectKind::Blob, b"other".to_vec());
        std::fs::write(&path, bincode::serialize(&other).unwrap()).unwrap();

        let mut purge = txn();
        purge
            .add_rewrite(Box::new(PurgeKeyRewrite::new(project.clone(), entity(1), "secret")))
            .unwrap();
        let err = purge.execute().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Structural, "got {err:?}");
        assert_eq!(repos.stats().open_repos(), 0);
    }

    #[test]
    fn execute_records_stage_and_total_timings() {
        let fx = fixture();
        let mut txn = fx.manager();
        assert!(txn.timings().is_none());
        txn.add_metadata_edit(Box::new(
            fx.meta_edit(entity(1), spec("Create").put("k", "v")).allow_new_ref(),
        ))
        .unwrap();
        txn.execute().unwrap();
        let timings = txn.timings().unwrap();
        let stage = timings.stage.unwrap();
        assert!(stage <= timings.total);

        let mut empty = fx.manager();
        empty.execute().unwrap();
        assert!(empty.timings().unwrap().stage.is_none());

        let mut stale = fx.manager();
        stale
            .add_metadata_edit(Box::new(
                fx.meta_edit(entity(1), spec("Edit").put("k", "w"))
                    .with_expected_state(ExpectedState::snapshot(ObjectId::null())),
            ))
            .unwrap();
        assert!(stale.execute().is_err());
        assert!(stale.timings().unwrap().stage.is_none());
    }

    #[test]
    fn dropped_manager_releases_contexts() {
        let fx = fixture();
        {
            let mut txn = fx.manager();
            txn.mark_for_deletion(entity(1)).unwrap();
            txn.open_primary().unwrap();
            txn.open_shared().unwrap();
            assert_eq!(fx.repos.stats().open_repos(), 2);
        }
        fx.assert_released();
    }
}

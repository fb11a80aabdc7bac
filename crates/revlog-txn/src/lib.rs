//! Batched ref transactions across a project repository and the shared
//! repository that holds per-account annex data.
//!
//! Callers queue edits on an [`UpdateManager`] and execute it once. Execution
//! checks each edit's [`ExpectedState`] against the refs' current values,
//! folds every ref's edits into a single old→new [`RefTransition`], checks
//! again, flushes staged objects and submits one atomic batch per repository.
//!
//! # Modules
//!
//! - [`config`]: [`TxnConfig`], loadable from TOML
//! - [`error`]: [`TxnError`] and its [`ErrorKind`] classification
//! - [`repo`]: Repository handles and managers
//! - [`context`]: Per-repository [`StagingContext`]
//! - [`commands`]: Chained [`RefTransitions`]
//! - [`expected`]: Caller beliefs about current ref values
//! - [`edit`]: The [`Edit`], [`AnnexEdit`] and [`HistoryRewrite`] traits
//! - [`edits`]: Stock tree edits and rewrites
//! - [`collector`]: Edits grouped by ref
//! - [`stage`]: Staging phases and the [`StageListener`] hook
//! - [`manager`]: The [`UpdateManager`] façade
//!
//! [`RefTransition`]: revlog_refs::RefTransition

mod check;
pub mod collector;
pub mod commands;
pub mod config;
pub mod context;
pub mod edit;
pub mod edits;
pub mod error;
pub mod expected;
pub mod manager;
pub mod repo;
pub mod stage;

pub use collector::UpdateCollector;
pub use commands::RefTransitions;
pub use config::TxnConfig;
pub use context::{Stage, StagingContext};
pub use edit::{AnnexEdit, Edit, HistoryRewrite};
pub use edits::{CommitSpec, DraftEdit, PurgeKeyRewrite, RewordRewrite, TreeEdit, TreeOp};
pub use error::{ErrorKind, RewriteError, TxnError, TxnResult};
pub use expected::{Authority, ExpectedState};
pub use manager::{ExecuteTimings, UpdateManager};
pub use repo::{
    FsRepositoryManager, HandleStats, InMemoryRepositoryManager, RepoReader, Repository,
    RepositoryManager,
};
pub use stage::{StageListener, StagePhase};

//! Ref management for revlog.
//!
//! Refs are mutable named pointers to commits. This crate provides:
//!
//! - the bit-exact ref naming scheme for entity metadata, annotation and
//!   per-account annex refs, sharded by entity number
//! - [`RefTransition`], the `(old, new, name)` unit of change, and
//!   [`BatchRefUpdate`], a set of transitions submitted together with a log
//!   message, identity and optional attestation
//! - the [`RefStore`] trait whose `apply_batch` is all-or-nothing for atomic
//!   batches
//!
//! # Modules
//!
//! - [`error`]: Error types for ref operations
//! - [`names`]: Ref name layout and validation
//! - [`types`]: Transitions, batches, command results, reflog entries
//! - [`traits`]: The [`RefStore`] trait
//! - [`memory`]: In-memory [`InMemoryRefStore`] for tests
//! - [`fs`]: File-backed [`FsRefStore`]

mod apply;
pub mod error;
pub mod fs;
pub mod memory;
pub mod names;
pub mod traits;
pub mod types;

pub use error::{RefError, Result};
pub use fs::FsRefStore;
pub use memory::InMemoryRefStore;
pub use names::{
    annex_prefix, annex_ref, annotation_ref, entity_meta_ref, parse_annex_ref, parse_entity_ref,
    validate_ref_name, EntityRefKind,
};
pub use traits::RefStore;
pub use types::{BatchRefUpdate, CommandStatus, RefTransition, ReflogEntry, TransitionKind};

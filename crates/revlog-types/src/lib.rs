//! Foundation types for revlog.
//!
//! Every other revlog crate depends on `revlog-types`.
//!
//! # Key Types
//!
//! - [`ObjectId`]: Content-addressed identifier (BLAKE3 hash); the null id is
//!   the "empty" sentinel meaning "no object / ref absent"
//! - [`EntityId`]: Stable identifier of an edited entity (a review number)
//! - [`AccountId`]: Identifier of the account owning annex data
//! - [`RepoName`]: Name of a repository known to a repository manager
//! - [`Identity`]: Name, email and timestamp recorded in commits and reflogs

pub mod entity;
pub mod error;
pub mod identity;
pub mod object;

pub use entity::{AccountId, EntityId, RepoName};
pub use error::TypeError;
pub use identity::Identity;
pub use object::ObjectId;

//! Content-addressed object storage for revlog.
//!
//! A hash-keyed object store analogous to git's `.git/objects/` directory.
//! Every blob, tree and commit is an immutable object identified by its
//! BLAKE3 hash (domain-separated by object kind).
//!
//! # Object Types
//!
//! - [`Blob`] -- raw content
//! - [`Tree`] -- sorted listing mapping names to object ids
//! - [`Commit`] -- tree, parents, author and message
//!
//! # Storage Backends
//!
//! All backends implement the [`ObjectStore`] trait:
//!
//! - [`InMemoryObjectStore`] -- `HashMap`-based store for tests and embedding
//! - [`FsObjectStore`] -- loose objects on disk, one file per object
//!
//! # Staging
//!
//! [`ObjectBuffer`] holds objects inserted during a transaction without
//! touching the durable store; [`LayeredReader`] reads through the buffer
//! first and then the store. Buffered objects reach the store only through
//! [`ObjectBuffer::flush_into`].

pub mod buffer;
pub mod error;
pub mod fs;
pub mod memory;
pub mod object;
pub mod traits;

pub use buffer::{LayeredReader, ObjectBuffer};
pub use error::{StoreError, StoreResult};
pub use fs::FsObjectStore;
pub use memory::InMemoryObjectStore;
pub use object::{Blob, Commit, ObjectKind, StoredObject, Tree, TreeEntry};
pub use traits::ObjectStore;

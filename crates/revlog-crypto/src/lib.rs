//! Cryptographic primitives for revlog.
//!
//! Provides domain-separated BLAKE3 hashing for object ids and Ed25519 push
//! attestations attached to ref batches.
//!
//! All crypto operations wrap established libraries; there is no custom cryptography.

pub mod attestation;
pub mod hasher;

pub use attestation::{Attestation, AttestationError, Signature, SigningKey, VerifyingKey};
pub use hasher::ContentHasher;

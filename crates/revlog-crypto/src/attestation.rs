//! Signed push attestations.
//!
//! An [`Attestation`] is a signed statement, produced by whoever originated a
//! push, that travels with a ref batch into the reflog. The ref store records
//! it verbatim; verification is left to readers of the log.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::hasher::ContentHasher;

/// Ed25519 signing key (private).
pub struct SigningKey(ed25519_dalek::SigningKey);

/// Ed25519 verifying key (public). Serialized as lowercase hex.
#[derive(Clone, PartialEq, Eq)]
pub struct VerifyingKey(ed25519_dalek::VerifyingKey);

/// Ed25519 signature. Serialized as lowercase hex.
#[derive(Clone, PartialEq, Eq)]
pub struct Signature(ed25519_dalek::Signature);

impl SigningKey {
    pub fn generate() -> Self {
        let mut csprng = rand::thread_rng();
        Self(ed25519_dalek::SigningKey::generate(&mut csprng))
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(ed25519_dalek::SigningKey::from_bytes(&bytes))
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        VerifyingKey(self.0.verifying_key())
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        use ed25519_dalek::Signer;
        Signature(self.0.sign(message))
    }
}

impl VerifyingKey {
    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<(), AttestationError> {
        use ed25519_dalek::Verifier;
        self.0
            .verify(message, &signature.0)
            .map_err(|_| AttestationError::InvalidSignature)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0.to_bytes())
    }

    pub fn from_hex(s: &str) -> Result<Self, AttestationError> {
        let bytes: [u8; 32] = decode_fixed(s)?;
        ed25519_dalek::VerifyingKey::from_bytes(&bytes)
            .map(Self)
            .map_err(|_| AttestationError::InvalidKey)
    }
}

impl Signature {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0.to_bytes())
    }

    pub fn from_hex(s: &str) -> Result<Self, AttestationError> {
        let bytes: [u8; 64] = decode_fixed(s)?;
        Ok(Self(ed25519_dalek::Signature::from_bytes(&bytes)))
    }
}

fn decode_fixed<const N: usize>(s: &str) -> Result<[u8; N], AttestationError> {
    let bytes = hex::decode(s).map_err(|e| AttestationError::Encoding(e.to_string()))?;
    let len = bytes.len();
    bytes
        .try_into()
        .map_err(|_| AttestationError::Encoding(format!("expected {N} bytes, got {len}")))
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SigningKey(<redacted>)")
    }
}

impl std::fmt::Debug for VerifyingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "VerifyingKey({})", self.to_hex())
    }
}

impl std::fmt::Debug for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Signature({}...)", &self.to_hex()[..16])
    }
}

macro_rules! hex_serde {
    ($ty:ty) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                <$ty>::from_hex(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}

hex_serde!(VerifyingKey);
hex_serde!(Signature);

/// A signed statement about a push, attached to the primary repository's
/// ref batch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attestation {
    pub signer: VerifyingKey,
    /// The attested text, typically naming the pushed refs and their targets.
    pub payload: String,
    pub signature: Signature,
}

impl Attestation {
    /// Sign `payload` with `key`. The signature covers the domain-separated
    /// hash of the payload.
    pub fn sign(key: &SigningKey, payload: impl Into<String>) -> Self {
        let payload = payload.into();
        let digest = ContentHasher::ATTESTATION.hash(payload.as_bytes());
        Self {
            signer: key.verifying_key(),
            signature: key.sign(digest.as_bytes()),
            payload,
        }
    }

    pub fn verify(&self) -> Result<(), AttestationError> {
        let digest = ContentHasher::ATTESTATION.hash(self.payload.as_bytes());
        self.signer.verify(digest.as_bytes(), &self.signature)
    }
}

/// Errors from signing and attestation handling.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AttestationError {
    #[error("invalid signature")]
    InvalidSignature,
    #[error("invalid key")]
    InvalidKey,
    #[error("encoding error: {0}")]
    Encoding(String),
}

//! Wrapper around the `SHA256` hash function.

use sha2::{Digest, Sha256 as Sha256Hasher};

/// A digest of the `SHA256` hash function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sha256([u8; 32]);

impl Sha256 {
    /// Computes the digest of the message `m`.
    pub fn hash(m: &[u8]) -> Self {
        Self(Sha256Hasher::digest(m).into())
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

//! The dual-hash capability set.
//!
//! Every hashing decision in the protocol is keyed off a name's hex
//! length, never off out-of-band negotiation. `hash_one_shot` produces a
//! name, `verify_against_name` checks content against one, and
//! `constant_time_hex_eq` compares two hex digests without an early exit.

use sha1::{Digest, Sha1};
use sha3::Sha3_256;
use subtle::ConstantTimeEq;

use crate::name::ArtifactName;

/// The hash algorithms an artifact name may be derived with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    Sha1,
    Sha3_256,
}

impl HashAlgorithm {
    /// Hex digest length for this algorithm.
    pub fn hex_len(self) -> usize {
        match self {
            HashAlgorithm::Sha1 => 40,
            HashAlgorithm::Sha3_256 => 64,
        }
    }

    /// Select the algorithm a hex digest of length `n` belongs to.
    pub fn for_hex_len(n: usize) -> Option<Self> {
        match n {
            40 => Some(HashAlgorithm::Sha1),
            64 => Some(HashAlgorithm::Sha3_256),
            _ => None,
        }
    }
}

/// Hash `data` with the given algorithm and return the resulting name.
pub fn hash_one_shot(data: &[u8], algo: HashAlgorithm) -> ArtifactName {
    let hex = match algo {
        HashAlgorithm::Sha1 => hex::encode(Sha1::digest(data)),
        HashAlgorithm::Sha3_256 => hex::encode(Sha3_256::digest(data)),
    };
    ArtifactName::from_lowercase_hex(hex)
}

/// Verify that `data` hashes to `name`, with the algorithm chosen by the
/// name's length.
pub fn verify_against_name(data: &[u8], name: &ArtifactName) -> bool {
    let computed = hash_one_shot(data, name.algorithm());
    computed == *name
}

/// Compare two hex digests in constant time.
///
/// Length is public information, so a length mismatch returns false
/// immediately; equal-length inputs are compared without short-circuiting.
pub fn constant_time_hex_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

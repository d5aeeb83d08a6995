//! Content-addressed artifact names.
//!
//! A name is the lowercase hex encoding of the artifact's hash. The hex
//! length is load-bearing: 40 characters selects SHA-1, 64 selects
//! SHA-3-256. Names compare case-insensitively on the wire, so parsing
//! normalizes to lowercase.

use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;
use crate::hash::HashAlgorithm;

/// A validated artifact name: 40 or 64 lowercase hex characters.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArtifactName(String);

impl ArtifactName {
    /// Parse and normalize a name. Accepts mixed case, stores lowercase.
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        if !is_name_shaped(s) {
            return Err(CoreError::InvalidName(s.to_owned()));
        }
        Ok(Self(s.to_ascii_lowercase()))
    }

    /// The hex string form, as it appears on the wire.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Hex length: 40 or 64.
    pub fn hex_len(&self) -> usize {
        self.0.len()
    }

    /// The hash algorithm this name was produced by.
    pub fn algorithm(&self) -> HashAlgorithm {
        // Length is validated at construction, so this cannot fail.
        HashAlgorithm::for_hex_len(self.0.len()).unwrap()
    }

    /// True for SHA-3-256 names, which pre-2.0 peers cannot store.
    pub fn is_sha3(&self) -> bool {
        self.algorithm() == HashAlgorithm::Sha3_256
    }

    pub(crate) fn from_lowercase_hex(s: String) -> Self {
        debug_assert!(is_name_shaped(&s));
        Self(s)
    }
}

/// Check whether a token has the shape of an artifact name without
/// allocating. Used by the card parser to classify tokens.
pub fn is_name_shaped(s: &str) -> bool {
    matches!(s.len(), 40 | 64) && s.bytes().all(|b| b.is_ascii_hexdigit())
}

impl fmt::Display for ArtifactName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ArtifactName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ArtifactName({})", &self.0[..16])
    }
}

impl AsRef<str> for ArtifactName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for ArtifactName {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

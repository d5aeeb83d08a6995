//! Login-card validation and composition.
//!
//! Two independent checks, both required:
//!
//! 1. **Tail hash**: the nonce equals `hash(request bytes after the login
//!    line)`. The nonce's hex length selects the algorithm.
//! 2. **Signature**: `SIG = hash(NONCE ∥ stored_secret)`, compared in
//!    constant time. When the server stores a cleartext credential (its
//!    length is not 40) a failed compare is retried against the derived
//!    legacy secret.

use artisync_core::{
    constant_time_hex_eq, hash_one_shot, Card, HashAlgorithm,
};

use crate::caps::CapabilitySet;
use crate::error::{AuthError, Result};
use crate::users::{Credentials, RESERVED_LOGINS};

/// Verify the nonce against the request tail. The algorithm is selected
/// by the nonce's length; an unrecognized length fails.
pub fn check_tail(nonce: &str, tail: &[u8]) -> bool {
    let Some(algo) = HashAlgorithm::for_hex_len(nonce.len()) else {
        return false;
    };
    hash_one_shot(tail, algo).as_str().eq_ignore_ascii_case(nonce)
}

/// Derive the legacy secret from a cleartext credential. Installs that
/// still store cleartext receive signatures chained over this derivation
/// instead of the raw password.
pub fn legacy_derive(secret: &str, login: &str) -> String {
    let material = format!("{login}:{secret}");
    hash_one_shot(material.as_bytes(), HashAlgorithm::Sha1)
        .as_str()
        .to_owned()
}

fn signature_matches(nonce: &str, secret: &str, sig: &str) -> bool {
    let Some(algo) = HashAlgorithm::for_hex_len(nonce.len()) else {
        return false;
    };
    let mut chained = Vec::with_capacity(nonce.len() + secret.len());
    chained.extend_from_slice(nonce.as_bytes());
    chained.extend_from_slice(secret.as_bytes());
    let expected = hash_one_shot(&chained, algo);
    constant_time_hex_eq(expected.as_str(), &sig.to_ascii_lowercase())
}

/// Validate a `login` card's signature and resolve the capabilities it
/// grants. The tail check is separate ([`check_tail`]) because it needs
/// the reader's position.
///
/// `anonymous` and `nobody` authenticate unconditionally and receive the
/// anonymous capability set. The other reserved logins never authenticate.
pub fn check_login<C: Credentials>(
    creds: &C,
    user: &str,
    nonce: &str,
    sig: &str,
) -> Result<CapabilitySet> {
    if user == "anonymous" || user == "nobody" {
        return Ok(CapabilitySet::anonymous());
    }
    if RESERVED_LOGINS.contains(&user) {
        return Err(AuthError::LoginFailed);
    }
    let stored = creds.lookup(user).ok_or(AuthError::LoginFailed)?;
    if stored.secret.is_empty() {
        return Err(AuthError::LoginFailed);
    }
    if signature_matches(nonce, &stored.secret, sig) {
        return Ok(CapabilitySet::from_cap_string(&stored.caps));
    }
    // Cleartext credential on the server, derived secret on the client.
    if stored.secret.len() != 40 {
        let derived = legacy_derive(&stored.secret, user);
        if signature_matches(nonce, &derived, sig) {
            return Ok(CapabilitySet::from_cap_string(&stored.caps));
        }
    }
    Err(AuthError::LoginFailed)
}

/// Compose the login card for an outbound request body. The card must be
/// prepended to `body`: its nonce hashes exactly the bytes that follow it.
pub fn compose_login(user: &str, secret: &str, body: &[u8], algo: HashAlgorithm) -> Card {
    let nonce = hash_one_shot(body, algo);
    let mut chained = Vec::with_capacity(nonce.hex_len() + secret.len());
    chained.extend_from_slice(nonce.as_str().as_bytes());
    chained.extend_from_slice(secret.as_bytes());
    let signature = hash_one_shot(&chained, algo);
    Card::Login {
        user: user.to_owned(),
        nonce: nonce.as_str().to_owned(),
        signature: signature.as_str().to_owned(),
    }
}

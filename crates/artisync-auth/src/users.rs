//! Credential lookup.
//!
//! The user table lives with the caller (usually next to the store); the
//! protocol only needs to resolve a login name to a stored secret and a
//! capability string.

use std::collections::HashMap;

/// Logins that may never authenticate with a password, even if a row for
/// them exists.
pub const RESERVED_LOGINS: &[&str] = &["anonymous", "nobody", "developer", "reader"];

/// One user record.
#[derive(Debug, Clone)]
pub struct StoredUser {
    pub login: String,
    /// Stored credential: either a 40-hex derived secret or cleartext
    /// (legacy installs).
    pub secret: String,
    /// Capability letter string, see [`crate::CapabilitySet`].
    pub caps: String,
}

/// Credential registry.
pub trait Credentials {
    /// Look up a user by login name. Implementations need not filter
    /// reserved logins; the login check does.
    fn lookup(&self, login: &str) -> Option<StoredUser>;
}

/// In-memory credential registry.
#[derive(Debug, Default)]
pub struct MemoryCredentials {
    users: HashMap<String, StoredUser>,
}

impl MemoryCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a user.
    pub fn add(&mut self, login: &str, secret: &str, caps: &str) {
        self.users.insert(
            login.to_owned(),
            StoredUser {
                login: login.to_owned(),
                secret: secret.to_owned(),
                caps: caps.to_owned(),
            },
        );
    }
}

impl Credentials for MemoryCredentials {
    fn lookup(&self, login: &str) -> Option<StoredUser> {
        self.users.get(login).cloned()
    }
}

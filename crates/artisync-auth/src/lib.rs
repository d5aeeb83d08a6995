//! # artisync-auth
//!
//! Authentication for sync sessions: the nonce-chained `login` card.
//!
//! A request may carry `login USER NONCE SIG` anywhere in its card stream.
//! The nonce must hash the remainder of the request after that line (so a
//! login cannot be replayed against a different body), and the signature
//! chains the nonce with the user's stored secret. Both checks must pass;
//! any failure is reported uniformly as a login failure.

pub mod caps;
pub mod error;
pub mod login;
pub mod users;

pub use caps::CapabilitySet;
pub use error::{AuthError, Result};
pub use login::{check_login, check_tail, compose_login, legacy_derive};
pub use users::{Credentials, MemoryCredentials, StoredUser};

//! Error types for authentication.

use thiserror::Error;

/// Authentication failures.
///
/// Deliberately coarse: the wire-visible outcome is always `login failed`,
/// never which of the checks rejected the attempt.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("login failed")]
    LoginFailed,
}

/// Result type for auth operations.
pub type Result<T> = std::result::Result<T, AuthError>;

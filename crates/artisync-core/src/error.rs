//! Error types for the core wire primitives.

use thiserror::Error;

/// Errors raised while parsing or applying core protocol data.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid artifact name: {0}")]
    InvalidName(String),

    #[error("malformed {0} card")]
    MalformedCard(&'static str),

    #[error("card line exceeds the token limit")]
    TooManyTokens,

    #[error("message truncated inside a {0}-byte payload")]
    TruncatedPayload(usize),

    #[error("card line is not terminated")]
    UnterminatedLine,

    #[error("corrupt delta: {0}")]
    CorruptDelta(&'static str),

    #[error("delta output size mismatch: header says {expected}, produced {actual}")]
    DeltaSizeMismatch { expected: usize, actual: usize },
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

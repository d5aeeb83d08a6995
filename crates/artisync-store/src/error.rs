//! Error types for store operations.

use thiserror::Error;

use crate::traits::ArtifactId;

/// Errors raised by store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("blob compression error: {0}")]
    Compression(#[from] std::io::Error),

    #[error("unknown artifact id {0}")]
    UnknownId(ArtifactId),

    #[error("stored data failed to decode: {0}")]
    Corrupt(#[from] artisync_core::CoreError),

    #[error("write transaction already open")]
    NestedTransaction,

    #[error("no write transaction open")]
    NoTransaction,
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

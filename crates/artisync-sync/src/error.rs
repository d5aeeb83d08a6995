//! Error types for sync sessions.

use thiserror::Error;

use artisync_core::ArtifactName;

/// Errors that end a sync session.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("protocol error: {0}")]
    Core(#[from] artisync_core::CoreError),

    #[error("store error: {0}")]
    Store(#[from] artisync_store::StoreError),

    #[error("{0}")]
    Auth(#[from] artisync_auth::AuthError),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("wrong hash on received artifact: {0}")]
    WrongHash(ArtifactName),

    #[error("server says: {0}")]
    Remote(String),

    #[error("server replied with HTML instead of sync protocol")]
    HtmlResponse,

    #[error("{0}")]
    Protocol(String),
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

//! # artisync-store
//!
//! The artifact store: a mapping from content-addressed names to immutable
//! blobs, with the three-state lifecycle the sync protocol depends on:
//!
//! ```text
//! absent ──new_phantom──▶ phantom ──put──▶ present
//! ```
//!
//! A *phantom* is a name we know exists remotely but whose content has not
//! arrived. A *dangling delta* is content stored as a patch whose basis is
//! still a phantom; [`Store::content`] resolves delta chains lazily, so a
//! dangling artifact materializes by itself once its basis arrives.
//!
//! Two backends are provided: [`MemoryStore`] mirrors SQLite semantics for
//! tests, [`SqliteStore`] is the persistent backend.

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{ArtifactId, Store};

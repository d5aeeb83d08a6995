//! The Store trait: the abstract interface the sync engines talk to.
//!
//! All methods are synchronous; the sync core has no suspension points and
//! a session owns its store for the duration of one write transaction.

use bytes::Bytes;

use artisync_core::ArtifactName;

use crate::error::Result;

/// Local numeric artifact id. Opaque to the wire; 0 is never a valid id.
pub type ArtifactId = u64;

/// Artifact persistence.
///
/// # Semantics
///
/// - **Idempotent puts**: inserting content for a name that is already
///   present returns the existing id and changes nothing.
/// - **Phantoms**: `resolve_or_phantom` and `new_phantom` create entries
///   in the phantom state; a later `put` for the same name clears the
///   phantom bit ("dephantomize").
/// - **Dangling deltas**: `put_delta` may reference a basis that is still
///   a phantom. `content` returns `None` for such artifacts until the
///   basis materializes.
/// - **Transactions**: every mutation happens between `begin_write` and
///   `commit`/`rollback`; serialization across sessions is the caller's
///   concern.
pub trait Store {
    /// Look up a name. Returns `None` when the name is entirely absent.
    fn resolve(&self, name: &ArtifactName) -> Result<Option<ArtifactId>>;

    /// Look up a name, creating a phantom entry when absent.
    fn resolve_or_phantom(&mut self, name: &ArtifactName, private: bool) -> Result<ArtifactId>;

    /// Create a phantom entry for a name known to exist remotely.
    /// Returns the existing id if the name is already known.
    fn new_phantom(&mut self, name: &ArtifactName, private: bool) -> Result<ArtifactId>;

    /// Insert literal content. `parent` records delta lineage for the
    /// send engine's parent heuristic; it does not affect storage.
    fn put(
        &mut self,
        content: &[u8],
        name: &ArtifactName,
        parent: Option<ArtifactId>,
        private: bool,
    ) -> Result<ArtifactId>;

    /// Insert content stored as a delta against `src`. The basis may
    /// still be a phantom (a dangling delta).
    fn put_delta(
        &mut self,
        patch: &[u8],
        name: &ArtifactName,
        src: ArtifactId,
        private: bool,
    ) -> Result<ArtifactId>;

    /// Materialized content, resolving delta chains. `None` for phantoms
    /// and for dangling deltas whose basis has not arrived.
    fn content(&self, id: ArtifactId) -> Result<Option<Bytes>>;

    /// The name of an artifact id.
    fn name_of(&self, id: ArtifactId) -> Result<Option<ArtifactName>>;

    /// The stored delta form, if this artifact is natively a delta:
    /// `(basis id, patch bytes)`.
    fn native_delta(&self, id: ArtifactId) -> Result<Option<(ArtifactId, Bytes)>>;

    /// Put-time lineage parent, kept even after materialization.
    fn parent_of(&self, id: ArtifactId) -> Result<Option<ArtifactId>>;

    fn is_phantom(&self, id: ArtifactId) -> Result<bool>;
    fn is_private(&self, id: ArtifactId) -> Result<bool>;
    fn is_shunned(&self, name: &ArtifactName) -> Result<bool>;

    fn make_private(&mut self, id: ArtifactId) -> Result<()>;
    fn make_public(&mut self, id: ArtifactId) -> Result<()>;

    /// Add a name to the shun list. Shunned content is never stored or
    /// transmitted.
    fn shun(&mut self, name: &ArtifactName) -> Result<()>;

    /// Highest artifact id in use, 0 when empty.
    fn max_id(&self) -> Result<ArtifactId>;

    /// All non-phantom artifacts, ascending by id.
    fn names(&self) -> Result<Vec<(ArtifactId, ArtifactName)>>;

    /// The announcement root set: present, public artifacts.
    fn roots(&self) -> Result<Vec<ArtifactId>>;

    /// All phantom entries, ascending by id.
    fn phantoms(&self) -> Result<Vec<(ArtifactId, ArtifactName)>>;

    /// Names of all private, present artifacts.
    fn private_names(&self) -> Result<Vec<ArtifactName>>;

    fn has_phantoms(&self) -> Result<bool> {
        Ok(!self.phantoms()?.is_empty())
    }

    fn begin_write(&mut self) -> Result<()>;
    fn commit(&mut self) -> Result<()>;
    fn rollback(&mut self) -> Result<()>;
}

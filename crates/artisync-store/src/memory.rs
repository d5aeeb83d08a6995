//! In-memory implementation of the Store trait.
//!
//! Primarily for tests. Same semantics as SQLite but nothing persists;
//! transactions are implemented by snapshotting the whole state, which is
//! cheap at test scale.

use std::collections::{BTreeMap, HashMap, HashSet};

use bytes::Bytes;

use artisync_core::{delta_apply, ArtifactName};

use crate::error::{Result, StoreError};
use crate::traits::{ArtifactId, Store};

#[derive(Clone)]
enum Body {
    Phantom,
    Literal(Bytes),
    Delta { src: ArtifactId, patch: Bytes },
}

#[derive(Clone)]
struct Entry {
    name: ArtifactName,
    body: Body,
    private: bool,
    parent: Option<ArtifactId>,
}

#[derive(Clone, Default)]
struct Inner {
    entries: BTreeMap<ArtifactId, Entry>,
    by_name: HashMap<ArtifactName, ArtifactId>,
    shunned: HashSet<ArtifactName>,
    next_id: ArtifactId,
}

/// In-memory store.
#[derive(Default)]
pub struct MemoryStore {
    inner: Inner,
    snapshot: Option<Box<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, id: ArtifactId) -> Result<&Entry> {
        self.inner.entries.get(&id).ok_or(StoreError::UnknownId(id))
    }

    fn alloc(&mut self, name: &ArtifactName, body: Body, private: bool, parent: Option<ArtifactId>) -> ArtifactId {
        self.inner.next_id += 1;
        let id = self.inner.next_id;
        self.inner.entries.insert(
            id,
            Entry { name: name.clone(), body, private, parent },
        );
        self.inner.by_name.insert(name.clone(), id);
        id
    }
}

impl Store for MemoryStore {
    fn resolve(&self, name: &ArtifactName) -> Result<Option<ArtifactId>> {
        Ok(self.inner.by_name.get(name).copied())
    }

    fn resolve_or_phantom(&mut self, name: &ArtifactName, private: bool) -> Result<ArtifactId> {
        if let Some(id) = self.inner.by_name.get(name) {
            return Ok(*id);
        }
        Ok(self.alloc(name, Body::Phantom, private, None))
    }

    fn new_phantom(&mut self, name: &ArtifactName, private: bool) -> Result<ArtifactId> {
        self.resolve_or_phantom(name, private)
    }

    fn put(
        &mut self,
        content: &[u8],
        name: &ArtifactName,
        parent: Option<ArtifactId>,
        private: bool,
    ) -> Result<ArtifactId> {
        if let Some(&id) = self.inner.by_name.get(name) {
            let entry = self.inner.entries.get_mut(&id).expect("indexed entry");
            if matches!(entry.body, Body::Phantom) {
                entry.body = Body::Literal(Bytes::copy_from_slice(content));
                if parent.is_some() {
                    entry.parent = parent;
                }
            }
            return Ok(id);
        }
        Ok(self.alloc(name, Body::Literal(Bytes::copy_from_slice(content)), private, parent))
    }

    fn put_delta(
        &mut self,
        patch: &[u8],
        name: &ArtifactName,
        src: ArtifactId,
        private: bool,
    ) -> Result<ArtifactId> {
        let body = Body::Delta { src, patch: Bytes::copy_from_slice(patch) };
        if let Some(&id) = self.inner.by_name.get(name) {
            let entry = self.inner.entries.get_mut(&id).expect("indexed entry");
            if matches!(entry.body, Body::Phantom) {
                entry.body = body;
                entry.parent = Some(src);
            }
            return Ok(id);
        }
        Ok(self.alloc(name, body, private, Some(src)))
    }

    fn content(&self, id: ArtifactId) -> Result<Option<Bytes>> {
        match &self.entry(id)?.body {
            Body::Phantom => Ok(None),
            Body::Literal(content) => Ok(Some(content.clone())),
            Body::Delta { src, patch } => match self.content(*src)? {
                Some(basis) => Ok(Some(Bytes::from(delta_apply(&basis, patch)?))),
                None => Ok(None),
            },
        }
    }

    fn name_of(&self, id: ArtifactId) -> Result<Option<ArtifactName>> {
        Ok(self.inner.entries.get(&id).map(|e| e.name.clone()))
    }

    fn native_delta(&self, id: ArtifactId) -> Result<Option<(ArtifactId, Bytes)>> {
        match &self.entry(id)?.body {
            Body::Delta { src, patch } => Ok(Some((*src, patch.clone()))),
            _ => Ok(None),
        }
    }

    fn parent_of(&self, id: ArtifactId) -> Result<Option<ArtifactId>> {
        Ok(self.entry(id)?.parent)
    }

    fn is_phantom(&self, id: ArtifactId) -> Result<bool> {
        Ok(matches!(self.entry(id)?.body, Body::Phantom))
    }

    fn is_private(&self, id: ArtifactId) -> Result<bool> {
        Ok(self.entry(id)?.private)
    }

    fn is_shunned(&self, name: &ArtifactName) -> Result<bool> {
        Ok(self.inner.shunned.contains(name))
    }

    fn make_private(&mut self, id: ArtifactId) -> Result<()> {
        self.inner
            .entries
            .get_mut(&id)
            .ok_or(StoreError::UnknownId(id))?
            .private = true;
        Ok(())
    }

    fn make_public(&mut self, id: ArtifactId) -> Result<()> {
        self.inner
            .entries
            .get_mut(&id)
            .ok_or(StoreError::UnknownId(id))?
            .private = false;
        Ok(())
    }

    fn shun(&mut self, name: &ArtifactName) -> Result<()> {
        self.inner.shunned.insert(name.clone());
        Ok(())
    }

    fn max_id(&self) -> Result<ArtifactId> {
        Ok(self.inner.next_id)
    }

    fn names(&self) -> Result<Vec<(ArtifactId, ArtifactName)>> {
        Ok(self
            .inner
            .entries
            .iter()
            .filter(|(_, e)| !matches!(e.body, Body::Phantom))
            .map(|(id, e)| (*id, e.name.clone()))
            .collect())
    }

    fn roots(&self) -> Result<Vec<ArtifactId>> {
        Ok(self
            .inner
            .entries
            .iter()
            .filter(|(_, e)| !matches!(e.body, Body::Phantom) && !e.private)
            .map(|(id, _)| *id)
            .collect())
    }

    fn phantoms(&self) -> Result<Vec<(ArtifactId, ArtifactName)>> {
        Ok(self
            .inner
            .entries
            .iter()
            .filter(|(_, e)| matches!(e.body, Body::Phantom))
            .map(|(id, e)| (*id, e.name.clone()))
            .collect())
    }

    fn private_names(&self) -> Result<Vec<ArtifactName>> {
        Ok(self
            .inner
            .entries
            .values()
            .filter(|e| e.private && !matches!(e.body, Body::Phantom))
            .map(|e| e.name.clone())
            .collect())
    }

    fn begin_write(&mut self) -> Result<()> {
        if self.snapshot.is_some() {
            return Err(StoreError::NestedTransaction);
        }
        self.snapshot = Some(Box::new(self.inner.clone()));
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.snapshot.take().ok_or(StoreError::NoTransaction)?;
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        let snapshot = self.snapshot.take().ok_or(StoreError::NoTransaction)?;
        self.inner = *snapshot;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use artisync_core::{hash_one_shot, HashAlgorithm};

    fn name_of(data: &[u8]) -> ArtifactName {
        hash_one_shot(data, HashAlgorithm::Sha1)
    }

    #[test]
    fn phantom_lifecycle() {
        let mut store = MemoryStore::new();
        let name = name_of(b"hello");

        let id = store.new_phantom(&name, false).unwrap();
        assert!(store.is_phantom(id).unwrap());
        assert_eq!(store.content(id).unwrap(), None);

        let same = store.put(b"hello", &name, None, false).unwrap();
        assert_eq!(id, same);
        assert!(!store.is_phantom(id).unwrap());
        assert_eq!(store.content(id).unwrap().unwrap(), Bytes::from_static(b"hello"));
    }

    #[test]
    fn put_is_idempotent() {
        let mut store = MemoryStore::new();
        let name = name_of(b"once");
        let a = store.put(b"once", &name, None, false).unwrap();
        let b = store.put(b"once", &name, None, false).unwrap();
        assert_eq!(a, b);
        assert_eq!(store.names().unwrap().len(), 1);
    }

    #[test]
    fn dangling_delta_materializes_when_basis_arrives() {
        let mut store = MemoryStore::new();
        let basis = b"the basis content for a delta".to_vec();
        let target = b"the basis content for a delta, extended".to_vec();
        let basis_name = name_of(&basis);
        let target_name = name_of(&target);
        let patch = artisync_core::delta_encode(&basis, &target);

        let basis_id = store.new_phantom(&basis_name, false).unwrap();
        let target_id = store.put_delta(&patch, &target_name, basis_id, false).unwrap();

        // Basis is still a phantom: the delta dangles.
        assert_eq!(store.content(target_id).unwrap(), None);

        store.put(&basis, &basis_name, None, false).unwrap();
        assert_eq!(store.content(target_id).unwrap().unwrap(), Bytes::from(target));
    }

    #[test]
    fn rollback_restores_prior_state() {
        let mut store = MemoryStore::new();
        let kept = name_of(b"kept");
        store.put(b"kept", &kept, None, false).unwrap();

        store.begin_write().unwrap();
        store.put(b"discarded", &name_of(b"discarded"), None, false).unwrap();
        store.rollback().unwrap();

        assert_eq!(store.names().unwrap().len(), 1);
        assert!(store.resolve(&kept).unwrap().is_some());
    }

    #[test]
    fn roots_exclude_private_and_phantoms() {
        let mut store = MemoryStore::new();
        let public = store.put(b"public", &name_of(b"public"), None, false).unwrap();
        let private = store.put(b"private", &name_of(b"private"), None, true).unwrap();
        store.new_phantom(&name_of(b"missing"), false).unwrap();

        let roots = store.roots().unwrap();
        assert!(roots.contains(&public));
        assert!(!roots.contains(&private));
        assert_eq!(roots.len(), 1);
    }
}

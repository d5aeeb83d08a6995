//! SQLite implementation of the Store trait.
//!
//! Blob content is kept zlib-compressed in the `artifact` table; delta
//! rows keep the patch verbatim and resolve through their basis on read.

use std::path::Path;

use bytes::Bytes;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use rusqlite::{params, Connection, OptionalExtension};

use artisync_core::{delta_apply, ArtifactName};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::{ArtifactId, Store};

/// SQLite-backed store.
pub struct SqliteStore {
    conn: Connection,
    in_txn: bool,
}

impl SqliteStore {
    /// Open (creating if necessary) a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self { conn, in_txn: false })
    }

    /// Open an in-memory store, useful for tests.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self { conn, in_txn: false })
    }

    fn row(&self, id: ArtifactId) -> Result<Option<RawRow>> {
        self.conn
            .query_row(
                "SELECT content, patch, delta_src, parent, phantom, private
                   FROM artifact WHERE id=?1",
                params![id],
                |row| {
                    Ok(RawRow {
                        content: row.get(0)?,
                        patch: row.get(1)?,
                        delta_src: row.get(2)?,
                        parent: row.get(3)?,
                        phantom: row.get::<_, i64>(4)? != 0,
                        private: row.get::<_, i64>(5)? != 0,
                    })
                },
            )
            .optional()
            .map_err(StoreError::from)
    }

    fn require_row(&self, id: ArtifactId) -> Result<RawRow> {
        self.row(id)?.ok_or(StoreError::UnknownId(id))
    }
}

struct RawRow {
    content: Option<Vec<u8>>,
    patch: Option<Vec<u8>>,
    delta_src: Option<ArtifactId>,
    parent: Option<ArtifactId>,
    phantom: bool,
    private: bool,
}

fn compress(content: &[u8]) -> Result<Vec<u8>> {
    use std::io::Write;
    let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
    enc.write_all(content)?;
    Ok(enc.finish()?)
}

fn decompress(blob: &[u8]) -> Result<Vec<u8>> {
    use std::io::Read;
    let mut out = Vec::new();
    ZlibDecoder::new(blob).read_to_end(&mut out)?;
    Ok(out)
}

impl Store for SqliteStore {
    fn resolve(&self, name: &ArtifactName) -> Result<Option<ArtifactId>> {
        self.conn
            .query_row(
                "SELECT id FROM artifact WHERE name=?1",
                params![name.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(StoreError::from)
    }

    fn resolve_or_phantom(&mut self, name: &ArtifactName, private: bool) -> Result<ArtifactId> {
        if let Some(id) = self.resolve(name)? {
            return Ok(id);
        }
        self.conn.execute(
            "INSERT INTO artifact(name, phantom, private) VALUES(?1, 1, ?2)",
            params![name.as_str(), private as i64],
        )?;
        Ok(self.conn.last_insert_rowid() as ArtifactId)
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
        let blob = compress(content)?;
        if let Some(id) = self.resolve(name)? {
            if self.is_phantom(id)? {
                self.conn.execute(
                    "UPDATE artifact
                        SET content=?2, raw_size=?3, patch=NULL, delta_src=NULL,
                            phantom=0, parent=COALESCE(?4, parent)
                      WHERE id=?1",
                    params![id, blob, content.len() as i64, parent],
                )?;
            }
            return Ok(id);
        }
        self.conn.execute(
            "INSERT INTO artifact(name, content, raw_size, parent, phantom, private)
             VALUES(?1, ?2, ?3, ?4, 0, ?5)",
            params![name.as_str(), blob, content.len() as i64, parent, private as i64],
        )?;
        Ok(self.conn.last_insert_rowid() as ArtifactId)
    }

    fn put_delta(
        &mut self,
        patch: &[u8],
        name: &ArtifactName,
        src: ArtifactId,
        private: bool,
    ) -> Result<ArtifactId> {
        if let Some(id) = self.resolve(name)? {
            if self.is_phantom(id)? {
                self.conn.execute(
                    "UPDATE artifact
                        SET patch=?2, delta_src=?3, content=NULL, raw_size=NULL,
                            phantom=0, parent=?3
                      WHERE id=?1",
                    params![id, patch, src],
                )?;
            }
            return Ok(id);
        }
        self.conn.execute(
            "INSERT INTO artifact(name, patch, delta_src, parent, phantom, private)
             VALUES(?1, ?2, ?3, ?3, 0, ?4)",
            params![name.as_str(), patch, src, private as i64],
        )?;
        Ok(self.conn.last_insert_rowid() as ArtifactId)
    }

    fn content(&self, id: ArtifactId) -> Result<Option<Bytes>> {
        let row = self.require_row(id)?;
        if row.phantom {
            return Ok(None);
        }
        if let Some(blob) = row.content {
            return Ok(Some(Bytes::from(decompress(&blob)?)));
        }
        if let (Some(patch), Some(src)) = (row.patch, row.delta_src) {
            return match self.content(src)? {
                Some(basis) => Ok(Some(Bytes::from(delta_apply(&basis, &patch)?))),
                None => Ok(None),
            };
        }
        Ok(None)
    }

    fn name_of(&self, id: ArtifactId) -> Result<Option<ArtifactName>> {
        let hex: Option<String> = self
            .conn
            .query_row(
                "SELECT name FROM artifact WHERE id=?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        match hex {
            Some(hex) => Ok(Some(
                ArtifactName::parse(&hex).map_err(StoreError::Corrupt)?,
            )),
            None => Ok(None),
        }
    }

    fn native_delta(&self, id: ArtifactId) -> Result<Option<(ArtifactId, Bytes)>> {
        let row = self.require_row(id)?;
        match (row.delta_src, row.patch) {
            (Some(src), Some(patch)) => Ok(Some((src, Bytes::from(patch)))),
            _ => Ok(None),
        }
    }

    fn parent_of(&self, id: ArtifactId) -> Result<Option<ArtifactId>> {
        Ok(self.require_row(id)?.parent)
    }

    fn is_phantom(&self, id: ArtifactId) -> Result<bool> {
        Ok(self.require_row(id)?.phantom)
    }

    fn is_private(&self, id: ArtifactId) -> Result<bool> {
        Ok(self.require_row(id)?.private)
    }

    fn is_shunned(&self, name: &ArtifactName) -> Result<bool> {
        let hit: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM shun WHERE name=?1",
                params![name.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(hit.is_some())
    }

    fn make_private(&mut self, id: ArtifactId) -> Result<()> {
        self.conn
            .execute("UPDATE artifact SET private=1 WHERE id=?1", params![id])?;
        Ok(())
    }

    fn make_public(&mut self, id: ArtifactId) -> Result<()> {
        self.conn
            .execute("UPDATE artifact SET private=0 WHERE id=?1", params![id])?;
        Ok(())
    }

    fn shun(&mut self, name: &ArtifactName) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO shun(name) VALUES(?1)",
            params![name.as_str()],
        )?;
        Ok(())
    }

    fn max_id(&self) -> Result<ArtifactId> {
        let id: i64 = self
            .conn
            .query_row("SELECT IFNULL(MAX(id), 0) FROM artifact", [], |row| row.get(0))?;
        Ok(id as ArtifactId)
    }

    fn names(&self) -> Result<Vec<(ArtifactId, ArtifactName)>> {
        collect_names(
            &self.conn,
            "SELECT id, name FROM artifact WHERE phantom=0 ORDER BY id",
        )
    }

    fn roots(&self) -> Result<Vec<ArtifactId>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM artifact WHERE phantom=0 AND private=0 ORDER BY id")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, i64>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids.into_iter().map(|id| id as ArtifactId).collect())
    }

    fn phantoms(&self) -> Result<Vec<(ArtifactId, ArtifactName)>> {
        collect_names(
            &self.conn,
            "SELECT id, name FROM artifact WHERE phantom=1 ORDER BY id",
        )
    }

    fn private_names(&self) -> Result<Vec<ArtifactName>> {
        let pairs = collect_names(
            &self.conn,
            "SELECT id, name FROM artifact WHERE phantom=0 AND private=1 ORDER BY id",
        )?;
        Ok(pairs.into_iter().map(|(_, name)| name).collect())
    }

    fn begin_write(&mut self) -> Result<()> {
        if self.in_txn {
            return Err(StoreError::NestedTransaction);
        }
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        self.in_txn = true;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        if !self.in_txn {
            return Err(StoreError::NoTransaction);
        }
        self.conn.execute_batch("COMMIT")?;
        self.in_txn = false;
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        if !self.in_txn {
            return Err(StoreError::NoTransaction);
        }
        self.conn.execute_batch("ROLLBACK")?;
        self.in_txn = false;
        Ok(())
    }
}

fn collect_names(conn: &Connection, sql: &str) -> Result<Vec<(ArtifactId, ArtifactName)>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map([], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    let mut out = Vec::with_capacity(rows.len());
    for (id, hex) in rows {
        out.push((id as ArtifactId, ArtifactName::parse(&hex).map_err(StoreError::Corrupt)?));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use artisync_core::{delta_encode, hash_one_shot, HashAlgorithm};

    fn name_of(data: &[u8]) -> ArtifactName {
        hash_one_shot(data, HashAlgorithm::Sha3_256)
    }

    #[test]
    fn round_trips_content_through_compression() {
        let mut store = SqliteStore::open_memory().unwrap();
        let content = b"some artifact body".repeat(10);
        let name = name_of(&content);
        let id = store.put(&content, &name, None, false).unwrap();
        assert_eq!(store.content(id).unwrap().unwrap(), Bytes::from(content));
        assert_eq!(store.name_of(id).unwrap().unwrap(), name);
    }

    #[test]
    fn phantom_then_put_clears_phantom_bit() {
        let mut store = SqliteStore::open_memory().unwrap();
        let name = name_of(b"pending");
        let id = store.new_phantom(&name, true).unwrap();
        assert!(store.is_phantom(id).unwrap());
        assert!(store.is_private(id).unwrap());
        assert!(store.has_phantoms().unwrap());

        store.put(b"pending", &name, None, false).unwrap();
        assert!(!store.is_phantom(id).unwrap());
        assert!(!store.has_phantoms().unwrap());
        // The private bit survives dephantomization until harmonized.
        assert!(store.is_private(id).unwrap());
    }

    #[test]
    fn delta_rows_resolve_through_their_basis() {
        let mut store = SqliteStore::open_memory().unwrap();
        let basis = b"shared prefix of respectable length".to_vec();
        let target = b"shared prefix of respectable length plus a tail".to_vec();
        let basis_id = store.put(&basis, &name_of(&basis), None, false).unwrap();
        let patch = delta_encode(&basis, &target);
        let target_id = store
            .put_delta(&patch, &name_of(&target), basis_id, false)
            .unwrap();
        assert_eq!(store.content(target_id).unwrap().unwrap(), Bytes::from(target));
        let (src, stored) = store.native_delta(target_id).unwrap().unwrap();
        assert_eq!(src, basis_id);
        assert_eq!(stored, Bytes::from(patch));
    }

    #[test]
    fn rollback_discards_inserts() {
        let mut store = SqliteStore::open_memory().unwrap();
        store.begin_write().unwrap();
        store.put(b"ephemeral", &name_of(b"ephemeral"), None, false).unwrap();
        store.rollback().unwrap();
        assert_eq!(store.max_id().unwrap(), 0);
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("artifacts.db");
        let content = b"durable";
        let name = name_of(content);
        {
            let mut store = SqliteStore::open(&path).unwrap();
            store.put(content, &name, None, false).unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        let id = store.resolve(&name).unwrap().unwrap();
        assert_eq!(store.content(id).unwrap().unwrap(), Bytes::from_static(content));
    }

    #[test]
    fn shun_list_is_a_name_set() {
        let mut store = SqliteStore::open_memory().unwrap();
        let name = name_of(b"unwanted");
        assert!(!store.is_shunned(&name).unwrap());
        store.shun(&name).unwrap();
        store.shun(&name).unwrap();
        assert!(store.is_shunned(&name).unwrap());
    }
}

//! Schema setup and versioned migrations for the SQLite backend.

use rusqlite::Connection;

use crate::error::Result;

/// Current schema version, recorded in `PRAGMA user_version`.
const SCHEMA_VERSION: i64 = 1;

const SCHEMA_V1: &str = "
CREATE TABLE artifact(
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    name      TEXT NOT NULL UNIQUE,
    content   BLOB,              -- zlib, NULL for phantoms and delta rows
    raw_size  INTEGER,           -- uncompressed size of content
    delta_src INTEGER REFERENCES artifact(id),
    patch     BLOB,              -- set when stored as a delta
    parent    INTEGER REFERENCES artifact(id),
    phantom   INTEGER NOT NULL DEFAULT 0,
    private   INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX artifact_phantom ON artifact(phantom) WHERE phantom=1;
CREATE TABLE shun(
    name TEXT PRIMARY KEY
) WITHOUT ROWID;
";

/// Bring a connection's schema up to date.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if version >= SCHEMA_VERSION {
        return Ok(());
    }
    let tx = conn.transaction()?;
    if version < 1 {
        tx.execute_batch(SCHEMA_V1)?;
    }
    tx.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    tx.commit()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrate_is_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        migrate(&mut conn).unwrap();
        let version: i64 = conn.query_row("PRAGMA user_version", [], |r| r.get(0)).unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }
}

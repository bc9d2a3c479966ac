use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use super::{DerivativeSet, MetadataIndex};
use crate::error::{Error, Result};
use crate::identity::Identifier;
use crate::pipeline::RungName;

/// SQLite-backed metadata index
///
/// One row per derivative set plus one row per rung. Sets are written in a
/// single transaction so a reader never sees half a family.
pub struct SqliteIndex {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
}

impl SqliteIndex {
    /// Open or create the index database at `path`
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::Config(format!("cannot create {}: {}", parent.display(), e))
            })?;
        }

        let conn = Connection::open(path)?;
        info!(path = %path.display(), "metadata index opened");
        Self::init(conn, Some(path.to_path_buf()))
    }

    /// Private in-memory database, gone when dropped
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?, None)
    }

    fn init(conn: Connection, db_path: Option<PathBuf>) -> Result<Self> {
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            db_path,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Number of recorded derivative sets
    pub fn set_count(&self) -> Result<i64> {
        let conn = self.conn()?;
        let count = conn.query_row("SELECT COUNT(*) FROM derivative_sets", [], |row| row.get(0))?;
        Ok(count)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::IndexCorrupt("connection lock poisoned".into()))
    }
}

/// Create tables and indexes if they don't exist
fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS derivative_sets (
            original_id     TEXT PRIMARY KEY,
            color_tag       TEXT NOT NULL,
            recorded_at     INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS derivatives (
            original_id     TEXT NOT NULL,
            rung            TEXT NOT NULL,
            derivative_id   TEXT NOT NULL,
            PRIMARY KEY (original_id, rung),
            FOREIGN KEY(original_id) REFERENCES derivative_sets(original_id)
        )",
        [],
    )?;

    // Reverse lookups from a derivative back to its family
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_derivatives_derivative_id
         ON derivatives(derivative_id)",
        [],
    )?;

    Ok(())
}

fn parse_id(text: String) -> Result<Identifier> {
    text.parse()
        .map_err(|e: Error| Error::IndexCorrupt(format!("stored identifier: {}", e)))
}

fn load_set(conn: &Connection, original: &Identifier) -> Result<Option<DerivativeSet>> {
    let original_key = original.to_string();
    let color: Option<String> = conn
        .query_row(
            "SELECT color_tag FROM derivative_sets WHERE original_id = ?1",
            params![original_key],
            |row| row.get(0),
        )
        .optional()?;

    let Some(color) = color else {
        return Ok(None);
    };
    let color_tag = color
        .parse()
        .map_err(|e: String| Error::IndexCorrupt(format!("stored colour tag: {}", e)))?;

    let mut stmt =
        conn.prepare("SELECT rung, derivative_id FROM derivatives WHERE original_id = ?1")?;
    let rows = stmt.query_map(params![original_key], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;

    let mut rungs = BTreeMap::new();
    for row in rows {
        let (rung, id) = row?;
        let rung = rung
            .parse::<RungName>()
            .map_err(|e| Error::IndexCorrupt(format!("stored rung: {}", e)))?;
        rungs.insert(rung, parse_id(id)?);
    }

    Ok(Some(DerivativeSet {
        original: *original,
        color_tag,
        rungs,
    }))
}

impl MetadataIndex for SqliteIndex {
    fn record_derivative_set(&self, set: &DerivativeSet) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let original_key = set.original.to_string();

        let inserted = tx.execute(
            "INSERT OR IGNORE INTO derivative_sets (original_id, color_tag, recorded_at)
             VALUES (?1, ?2, ?3)",
            params![original_key, set.color_tag.to_string(), chrono::Utc::now().timestamp()],
        )?;

        if inserted == 0 {
            // Same original means same bytes, so the family is identical
            debug!(original = %set.original, "derivative set already recorded");
            return Ok(());
        }

        for (rung, id) in &set.rungs {
            tx.execute(
                "INSERT INTO derivatives (original_id, rung, derivative_id) VALUES (?1, ?2, ?3)",
                params![original_key, rung.as_str(), id.to_string()],
            )?;
        }
        tx.commit()?;

        debug!(original = %set.original, rungs = set.rungs.len(), "derivative set recorded");
        Ok(())
    }

    fn lookup_derivative(&self, original: &Identifier, rung: RungName) -> Result<Option<Identifier>> {
        let conn = self.conn()?;
        Ok(load_set(&conn, original)?.and_then(|set| set.get(rung)))
    }

    fn find_set(&self, id: &Identifier) -> Result<Option<DerivativeSet>> {
        let conn = self.conn()?;
        if let Some(set) = load_set(&conn, id)? {
            return Ok(Some(set));
        }

        let original: Option<String> = conn
            .query_row(
                "SELECT original_id FROM derivatives WHERE derivative_id = ?1 LIMIT 1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()?;

        match original {
            Some(original) => load_set(&conn, &parse_id(original)?),
            None => Ok(None),
        }
    }
}

impl std::fmt::Debug for SqliteIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteIndex")
            .field("db_path", &self.db_path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{derive, ColorTag, SCHEMA_V1};

    const TAG: ColorTag = ColorTag {
        red: 0x9B,
        green: 0xA4,
        blue: 0xA9,
    };

    fn id(payload: &[u8], width: u32, height: u32) -> Identifier {
        derive(SCHEMA_V1, payload, width, height, TAG).unwrap()
    }

    fn family() -> DerivativeSet {
        let mut rungs = BTreeMap::new();
        rungs.insert(RungName::Large, id(b"large", 400, 252));
        rungs.insert(RungName::Medium, id(b"medium", 200, 126));
        rungs.insert(RungName::Small, id(b"small", 100, 63));
        DerivativeSet {
            original: id(b"original", 638, 401),
            color_tag: TAG,
            rungs,
        }
    }

    #[test]
    fn test_record_and_lookup() {
        let index = SqliteIndex::open_in_memory().unwrap();
        let set = family();
        index.record_derivative_set(&set).unwrap();

        let small = index.lookup_derivative(&set.original, RungName::Small).unwrap();
        assert_eq!(small, set.rungs.get(&RungName::Small).copied());

        let original = index.lookup_derivative(&set.original, RungName::Original).unwrap();
        assert_eq!(original, Some(set.original));
    }

    #[test]
    fn test_unknown_original_is_none() {
        let index = SqliteIndex::open_in_memory().unwrap();
        let set = family();
        assert_eq!(index.lookup_derivative(&set.original, RungName::Large).unwrap(), None);
        assert_eq!(index.find_set(&set.original).unwrap(), None);
    }

    #[test]
    fn test_recording_twice_is_a_no_op() {
        let index = SqliteIndex::open_in_memory().unwrap();
        let set = family();
        index.record_derivative_set(&set).unwrap();
        index.record_derivative_set(&set).unwrap();
        assert_eq!(index.set_count().unwrap(), 1);
    }

    #[test]
    fn test_find_set_from_any_member() {
        let index = SqliteIndex::open_in_memory().unwrap();
        let set = family();
        index.record_derivative_set(&set).unwrap();

        for id in set.identifiers() {
            assert_eq!(index.find_set(id).unwrap().as_ref(), Some(&set));
        }
    }

    #[test]
    fn test_corrupt_rows_are_index_errors() {
        let index = SqliteIndex::open_in_memory().unwrap();
        let set = family();
        index.record_derivative_set(&set).unwrap();

        index
            .conn()
            .unwrap()
            .execute("UPDATE derivatives SET rung = 'thumb' WHERE rung = 'small'", [])
            .unwrap();
        assert!(matches!(
            index.lookup_derivative(&set.original, RungName::Large),
            Err(Error::IndexCorrupt(_))
        ));

        index
            .conn()
            .unwrap()
            .execute("UPDATE derivative_sets SET color_tag = 'nothex'", [])
            .unwrap();
        assert!(matches!(index.find_set(&set.original), Err(Error::IndexCorrupt(_))));
    }

    #[test]
    fn test_index_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("index.db");
        let set = family();

        {
            let index = SqliteIndex::open(&path).unwrap();
            index.record_derivative_set(&set).unwrap();
        }

        let index = SqliteIndex::open(&path).unwrap();
        assert_eq!(index.path(), Some(path.as_path()));
        assert_eq!(index.find_set(&set.original).unwrap(), Some(set));
    }
}

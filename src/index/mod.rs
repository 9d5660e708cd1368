//! # Blob Index
//!
//! Durable SQLite table mapping every packed file to its blob, byte offset,
//! size, hash and permission bits:
//!
//! ```text
//! files(blob_id TEXT, file_path TEXT PRIMARY KEY, byte_offset INTEGER,
//!       size INTEGER, hash BLOB, perms INTEGER)
//! ```
//!
//! For a fixed `blob_id`, rows ordered by `byte_offset` tile the blob: each
//! record starts where the previous one ends.

use std::path::{Path, PathBuf};

use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::common::{ContentHash, FileEntry};
use crate::error::{BitumError, Result};

/// File name of the index inside a workspace and under the remote prefix.
pub const INDEX_FILENAME: &str = "bitumen.sqlite3";

/// SQLite refuses statements with more host parameters than this.
pub const MAX_SQL_PARAMS: usize = 999;

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS files(
    blob_id TEXT NOT NULL,
    file_path TEXT PRIMARY KEY,
    byte_offset INTEGER NOT NULL,
    size INTEGER NOT NULL,
    hash BLOB,
    perms INTEGER
);
CREATE INDEX IF NOT EXISTS files_by_blob ON files(blob_id, byte_offset);";

const SELECT_COLUMNS: &str = "SELECT blob_id, file_path, byte_offset, size, hash, perms FROM files";

/// Location of one file inside one blob.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct IndexRecord {
    pub blob_id: String,
    pub path: String,
    pub byte_offset: u64,
    pub size: u64,
    pub hash: Option<ContentHash>,
    pub perms: Option<u32>,
}

impl IndexRecord {
    /// Offset one past the record's last byte.
    pub fn end(&self) -> u64 {
        self.byte_offset + self.size
    }

    /// The record as a tree entry for a packed file.
    pub fn to_entry(&self) -> FileEntry {
        FileEntry::file(self.path.clone(), Some(self.size), self.hash, self.perms)
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let hash = match row.get::<_, Option<Vec<u8>>>(4)? {
            Some(bytes) => Some(ContentHash::from_slice(&bytes).ok_or_else(|| {
                rusqlite::Error::FromSqlConversionFailure(
                    4,
                    Type::Blob,
                    format!("hash has {} bytes, expected 32", bytes.len()).into(),
                )
            })?),
            None => None,
        };
        let perms = match row.get::<_, Option<i64>>(5)? {
            Some(p) => Some(u32::try_from(p).map_err(|_| rusqlite::Error::IntegralValueOutOfRange(5, p))?),
            None => None,
        };
        Ok(Self {
            blob_id: row.get(0)?,
            path: row.get(1)?,
            byte_offset: column_u64(row, 2)?,
            size: column_u64(row, 3)?,
            hash,
            perms,
        })
    }
}

fn column_u64(row: &Row<'_>, idx: usize) -> rusqlite::Result<u64> {
    let v: i64 = row.get(idx)?;
    u64::try_from(v).map_err(|_| rusqlite::Error::IntegralValueOutOfRange(idx, v))
}

fn to_sql_int(v: u64) -> Result<i64> {
    i64::try_from(v).map_err(|_| BitumError::OutOfRange(v))
}

/// Handle on an index file.
pub struct IndexStore {
    conn: Connection,
    path: Option<PathBuf>,
}

impl IndexStore {
    /// Opens (creating if needed) the index at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(CREATE_TABLE)?;
        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(CREATE_TABLE)?;
        Ok(Self { conn, path: None })
    }

    /// Backing file, `None` for an in-memory index.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Atomically replaces the whole table with `records`.
    pub fn replace_all(&mut self, records: &[IndexRecord]) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute_batch("DROP TABLE IF EXISTS files;")?;
        tx.execute_batch(CREATE_TABLE)?;
        insert_records(&tx, "INSERT INTO files VALUES(?1, ?2, ?3, ?4, ?5, ?6)", records)?;
        tx.commit()?;
        debug!(records = records.len(), "index rebuilt");
        Ok(())
    }

    /// Inserts `records`, replacing existing rows with the same path.
    pub fn upsert(&mut self, records: &[IndexRecord]) -> Result<()> {
        let tx = self.conn.transaction()?;
        insert_records(&tx, "INSERT OR REPLACE INTO files VALUES(?1, ?2, ?3, ?4, ?5, ?6)", records)?;
        tx.commit()?;
        debug!(records = records.len(), "index upserted");
        Ok(())
    }

    /// Looks up one path; `Ok(None)` when it is not indexed.
    pub fn get(&self, path: &str) -> Result<Option<IndexRecord>> {
        let sql = format!("{SELECT_COLUMNS} WHERE file_path = ?1");
        let rec = self
            .conn
            .query_row(&sql, params![path], IndexRecord::from_row)
            .optional()?;
        Ok(rec)
    }

    /// Looks up many paths at once. Paths that are not indexed are absent
    /// from the result; the order of the result is unspecified.
    pub fn get_many<S: AsRef<str>>(&self, paths: &[S]) -> Result<Vec<IndexRecord>> {
        let mut out = Vec::new();
        for chunk in paths.chunks(MAX_SQL_PARAMS) {
            let placeholders = vec!["?"; chunk.len()].join(",");
            let sql = format!("{SELECT_COLUMNS} WHERE file_path IN ({placeholders})");
            let mut stmt = self.conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(chunk.iter().map(|p| p.as_ref())), IndexRecord::from_row)?;
            for row in rows {
                out.push(row?);
            }
        }
        Ok(out)
    }

    /// All records of one blob, in ascending offset order.
    pub fn records_for_blob(&self, blob_id: &str) -> Result<Vec<IndexRecord>> {
        let sql = format!("{SELECT_COLUMNS} WHERE blob_id = ?1 ORDER BY byte_offset ASC");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![blob_id], IndexRecord::from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Every record, grouped by blob and ordered by offset within each blob.
    pub fn all_records(&self) -> Result<Vec<IndexRecord>> {
        let sql = format!("{SELECT_COLUMNS} ORDER BY blob_id ASC, byte_offset ASC");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], IndexRecord::from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Distinct blob ids, sorted.
    pub fn blob_ids(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT DISTINCT blob_id FROM files ORDER BY blob_id ASC")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn len(&self) -> Result<u64> {
        let n: i64 = self.conn.query_row("SELECT COUNT(*) FROM files", [], |row| row.get(0))?;
        Ok(n.max(0) as u64)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

fn insert_records(tx: &rusqlite::Transaction<'_>, sql: &str, records: &[IndexRecord]) -> Result<()> {
    let mut stmt = tx.prepare(sql)?;
    for r in records {
        stmt.execute(params![
            r.blob_id,
            r.path,
            to_sql_int(r.byte_offset)?,
            to_sql_int(r.size)?,
            r.hash.as_ref().map(|h| h.as_bytes().to_vec()),
            r.perms.map(i64::from),
        ])?;
    }
    Ok(())
}

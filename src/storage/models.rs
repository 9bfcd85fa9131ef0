//! Data models for storage operations.
//!
//! `IndexEntry` is the strongly-typed row of the index table. Conversion
//! to and from `SQLite` rows happens only here, at the store boundary.

use rusqlite::Row;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Get current Unix timestamp.
pub(crate) fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(0))
        .unwrap_or(0)
}

/// Stat-level metadata captured for one existing path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMeta {
    /// Normalized absolute path.
    pub path: String,

    /// Base name, case preserved.
    pub name: String,

    /// Lowercase base name for case-insensitive lookup.
    pub case_key: String,

    /// Lowercase extension with leading dot; empty for directories.
    pub ext: String,

    /// Size in bytes; 0 for directories.
    pub size: i64,

    /// Modification time, epoch seconds.
    pub mtime: i64,

    /// Creation (or status-change) time, epoch seconds.
    pub ctime: i64,

    /// Whether the path is a directory.
    pub is_directory: bool,
}

/// One row of the index: an indexed file or directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Database primary key.
    pub id: i64,

    /// Normalized absolute path, unique.
    pub path: String,

    /// Base name, case preserved.
    pub name: String,

    /// Lowercase base name.
    pub case_key: String,

    /// Extension; empty for directories.
    pub ext: String,

    /// Size in bytes; 0 for directories.
    pub size: i64,

    /// Modification time, epoch seconds.
    pub mtime: i64,

    /// Creation time, epoch seconds.
    pub ctime: i64,

    /// Set at creation. A path changes type only by delete + recreate.
    pub is_directory: bool,

    /// Epoch seconds of the last mutation, maintained by the store.
    pub updated_at: i64,

    /// Free-text annotation, the only externally mutable field.
    pub note: Option<String>,
}

impl IndexEntry {
    /// Column list matching [`IndexEntry::from_row`].
    pub(crate) const COLUMNS: &'static str =
        "id, path, name, case_key, ext, size, mtime, ctime, is_directory, updated_at, note";

    /// Map a row selected with [`IndexEntry::COLUMNS`].
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            path: row.get(1)?,
            name: row.get(2)?,
            case_key: row.get(3)?,
            ext: row.get(4)?,
            size: row.get(5)?,
            mtime: row.get(6)?,
            ctime: row.get(7)?,
            is_directory: row.get(8)?,
            updated_at: row.get(9)?,
            note: row.get(10)?,
        })
    }
}

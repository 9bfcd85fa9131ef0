//! Index entry storage operations.
//!
//! Free functions over a borrowed connection. They do not open transactions
//! themselves; `IndexStore` wraps each mutating call in one.

use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

use super::metadata::name_parts;
use super::models::{now_unix, FileMeta, IndexEntry};
use crate::error::StorageError;
use crate::Result;

/// Prefix that every strict descendant of `path` starts with.
fn subtree_prefix(path: &str) -> String {
    if path.ends_with(std::path::MAIN_SEPARATOR) {
        path.to_string()
    } else {
        format!("{path}{}", std::path::MAIN_SEPARATOR)
    }
}

/// SQLite `substr` counts characters, not bytes.
fn char_len(s: &str) -> i64 {
    i64::try_from(s.chars().count()).unwrap_or(i64::MAX)
}

/// Insert an entry, or refresh every metadata column of an existing one.
///
/// `note` is preserved. If the existing row has a different type (file vs
/// directory), the row is replaced instead, since a path only changes type
/// by delete + recreate.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn upsert_meta(conn: &Connection, meta: &FileMeta) -> Result<()> {
    let now = now_unix();
    let changed = conn
        .execute(
            "INSERT INTO files (path, name, case_key, ext, size, mtime, ctime, is_directory, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(path) DO UPDATE SET
                name = excluded.name,
                case_key = excluded.case_key,
                ext = excluded.ext,
                size = excluded.size,
                mtime = excluded.mtime,
                ctime = excluded.ctime,
                updated_at = excluded.updated_at
             WHERE files.is_directory = excluded.is_directory",
            params![
                meta.path,
                meta.name,
                meta.case_key,
                meta.ext,
                meta.size,
                meta.mtime,
                meta.ctime,
                meta.is_directory,
                now
            ],
        )
        .map_err(|e| StorageError::Database(format!("failed to upsert entry: {e}")))?;

    if changed == 0 {
        tracing::debug!(path = %meta.path, "Entry changed type, replacing row");
        remove_entry(conn, &meta.path)?;
        conn.execute(
            "INSERT INTO files (path, name, case_key, ext, size, mtime, ctime, is_directory, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                meta.path,
                meta.name,
                meta.case_key,
                meta.ext,
                meta.size,
                meta.mtime,
                meta.ctime,
                meta.is_directory,
                now
            ],
        )
        .map_err(|e| StorageError::Database(format!("failed to insert entry: {e}")))?;
    }

    tracing::trace!(path = %meta.path, "Upserted entry");
    Ok(())
}

/// Get an entry by its normalized path.
///
/// # Errors
///
/// Returns an error if the database query fails.
pub fn get_entry(conn: &Connection, path: &str) -> Result<Option<IndexEntry>> {
    conn.query_row(
        &format!("SELECT {} FROM files WHERE path = ?", IndexEntry::COLUMNS),
        [path],
        IndexEntry::from_row,
    )
    .optional()
    .map_err(|e| StorageError::Database(format!("failed to get entry: {e}")).into())
}

/// Delete the entry with exactly this path. Absent paths are a no-op.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn remove_entry(conn: &Connection, path: &str) -> Result<usize> {
    conn.execute("DELETE FROM files WHERE path = ?", [path])
        .map_err(|e| StorageError::Database(format!("failed to remove entry: {e}")).into())
}

/// Delete the entry at `path` and every entry nested under it.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn remove_subtree(conn: &Connection, path: &str) -> Result<usize> {
    let prefix = subtree_prefix(path);
    conn.execute(
        "DELETE FROM files WHERE path = ?1 OR substr(path, 1, ?2) = ?3",
        params![path, char_len(&prefix), prefix],
    )
    .map_err(|e| StorageError::Database(format!("failed to remove subtree: {e}")).into())
}

/// Re-key the entry at `old_path` to `meta.path` and refresh its metadata.
///
/// A stale row already occupying the destination is dropped first. If
/// nothing was indexed at `old_path`, the destination is inserted instead.
/// Returns the number of re-keyed rows (0 or 1).
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn rename_entry(conn: &Connection, old_path: &str, meta: &FileMeta) -> Result<usize> {
    if old_path != meta.path {
        remove_entry(conn, &meta.path)?;
    }

    let updated = conn
        .execute(
            "UPDATE files SET
                path = ?1, name = ?2, case_key = ?3, ext = ?4, size = ?5,
                mtime = ?6, ctime = ?7, is_directory = ?8, updated_at = ?9
             WHERE path = ?10",
            params![
                meta.path,
                meta.name,
                meta.case_key,
                meta.ext,
                meta.size,
                meta.mtime,
                meta.ctime,
                meta.is_directory,
                now_unix(),
                old_path
            ],
        )
        .map_err(|e| StorageError::Database(format!("failed to rename entry: {e}")))?;

    if updated == 0 {
        tracing::debug!(from = %old_path, to = %meta.path, "Rename source not indexed, inserting");
        upsert_meta(conn, meta)?;
    }

    Ok(updated)
}

/// All entry paths equal to or nested under `prefix`.
///
/// # Errors
///
/// Returns an error if the database query fails.
pub fn list_subtree_paths(conn: &Connection, prefix: &str) -> Result<Vec<String>> {
    let nested = subtree_prefix(prefix);
    let mut stmt = conn
        .prepare("SELECT path FROM files WHERE path = ?1 OR substr(path, 1, ?2) = ?3 ORDER BY path")
        .map_err(|e| StorageError::Database(e.to_string()))?;

    let paths = stmt
        .query_map(params![prefix, char_len(&nested), nested], |row| row.get(0))
        .map_err(|e| StorageError::Database(e.to_string()))?
        .collect::<std::result::Result<Vec<String>, _>>()
        .map_err(|e| StorageError::Database(e.to_string()))?;

    Ok(paths)
}

/// Rewrite every entry at or under `old_prefix` to live under `new_prefix`.
///
/// Paths are rewritten by literal prefix substitution through a temporary
/// mapping table joined against the live table; metadata is not
/// re-extracted. Only the moved root's `name`/`case_key`/`ext` are derived
/// again, from its new path string. Returns the number of rewritten rows.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn rename_subtree(conn: &Connection, old_prefix: &str, new_prefix: &str) -> Result<usize> {
    let old_paths = list_subtree_paths(conn, old_prefix)?;
    if old_paths.is_empty() {
        return Ok(0);
    }

    conn.execute_batch(
        "CREATE TEMP TABLE IF NOT EXISTS rename_map (
            old_path TEXT PRIMARY KEY,
            new_path TEXT NOT NULL UNIQUE
        );
        DELETE FROM rename_map;",
    )
    .map_err(|e| StorageError::Database(format!("failed to stage rename map: {e}")))?;

    {
        let mut insert = conn
            .prepare("INSERT INTO rename_map (old_path, new_path) VALUES (?1, ?2)")
            .map_err(|e| StorageError::Database(e.to_string()))?;
        for old in &old_paths {
            let new = format!("{new_prefix}{}", &old[old_prefix.len()..]);
            insert
                .execute(params![old, new])
                .map_err(|e| StorageError::Database(format!("failed to stage rename: {e}")))?;
        }
    }

    // Rows already sitting at destination paths would collide on `path`.
    conn.execute(
        "DELETE FROM files
         WHERE path IN (SELECT new_path FROM rename_map)
           AND path NOT IN (SELECT old_path FROM rename_map)",
        [],
    )
    .map_err(|e| StorageError::Database(format!("failed to clear rename targets: {e}")))?;

    let rewritten = conn
        .execute(
            "UPDATE files
             SET path = (SELECT new_path FROM rename_map WHERE old_path = files.path),
                 updated_at = ?1
             WHERE path IN (SELECT old_path FROM rename_map)",
            [now_unix()],
        )
        .map_err(|e| StorageError::Database(format!("failed to rewrite subtree: {e}")))?;

    let root_is_dir: Option<bool> = conn
        .query_row(
            "SELECT is_directory FROM files WHERE path = ?",
            [new_prefix],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| StorageError::Database(e.to_string()))?;
    if let Some(is_dir) = root_is_dir {
        let (name, case_key, ext) = name_parts(Path::new(new_prefix), is_dir);
        conn.execute(
            "UPDATE files SET name = ?1, case_key = ?2, ext = ?3 WHERE path = ?4",
            params![name, case_key, ext, new_prefix],
        )
        .map_err(|e| StorageError::Database(format!("failed to rename subtree root: {e}")))?;
    }

    conn.execute("DELETE FROM rename_map", [])
        .map_err(|e| StorageError::Database(e.to_string()))?;

    tracing::debug!(from = %old_prefix, to = %new_prefix, rewritten, "Rewrote subtree");
    Ok(rewritten)
}

/// Delete every entry.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn reset_all(conn: &Connection) -> Result<usize> {
    conn.execute("DELETE FROM files", [])
        .map_err(|e| StorageError::Database(format!("failed to reset index: {e}")).into())
}

/// Count indexed entries.
///
/// # Errors
///
/// Returns an error if the database query fails.
pub fn count_entries(conn: &Connection) -> Result<i64> {
    conn.query_row("SELECT COUNT(*) FROM files", [], |row| row.get(0))
        .map_err(|e| StorageError::Database(e.to_string()).into())
}

/// List every entry ordered by path.
///
/// # Errors
///
/// Returns an error if the database query fails.
pub fn list_entries(conn: &Connection) -> Result<Vec<IndexEntry>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM files ORDER BY path",
            IndexEntry::COLUMNS
        ))
        .map_err(|e| StorageError::Database(e.to_string()))?;

    let entries = stmt
        .query_map([], IndexEntry::from_row)
        .map_err(|e| StorageError::Database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| StorageError::Database(e.to_string()))?;

    Ok(entries)
}

/// Set the note of one entry. Returns the number of updated rows.
///
/// # Errors
///
/// Returns an error if the database operation fails.
pub fn set_note(conn: &Connection, path: &str, note: Option<&str>) -> Result<usize> {
    conn.execute(
        "UPDATE files SET note = ?1, updated_at = ?2 WHERE path = ?3",
        params![note, now_unix(), path],
    )
    .map_err(|e| StorageError::Database(format!("failed to set note: {e}")).into())
}

//! Atomic wholesale replacement of the index table.
//!
//! A rebuild loads scanned rows into a staging table, carries notes over
//! from the live table by exact path, then swaps the staging table in by
//! rename. Run inside one transaction, a failure at any step leaves the
//! live table exactly as it was.

use rusqlite::{params, Connection};

use super::models::{now_unix, FileMeta};
use super::schema::{files_table_ddl, FILES_INDEXES};
use crate::error::StorageError;
use crate::Result;

const STAGING_TABLE: &str = "files_new";
const RETIRED_TABLE: &str = "files_old";

fn rebuild_err(step: &str, e: impl std::fmt::Display) -> crate::Error {
    StorageError::Rebuild(format!("{step}: {e}")).into()
}

/// Replace the contents of the live table with `rows`.
///
/// Must run inside a transaction. Returns the number of inserted rows.
///
/// # Errors
///
/// Returns `StorageError::Rebuild` if staging or swapping fails.
pub fn replace_all(conn: &Connection, rows: &[FileMeta]) -> Result<usize> {
    conn.execute_batch(&format!(
        "DROP TABLE IF EXISTS {STAGING_TABLE};
         DROP TABLE IF EXISTS {RETIRED_TABLE};
         {};",
        files_table_ddl(STAGING_TABLE)
    ))
    .map_err(|e| rebuild_err("create staging table", e))?;

    let now = now_unix();
    let mut inserted = 0;
    {
        let mut stmt = conn
            .prepare(&format!(
                "INSERT OR REPLACE INTO {STAGING_TABLE}
                 (path, name, case_key, ext, size, mtime, ctime, is_directory, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
            ))
            .map_err(|e| rebuild_err("prepare staging insert", e))?;

        for row in rows {
            inserted += stmt
                .execute(params![
                    row.path,
                    row.name,
                    row.case_key,
                    row.ext,
                    row.size,
                    row.mtime,
                    row.ctime,
                    row.is_directory,
                    now
                ])
                .map_err(|e| rebuild_err("load staging rows", e))?;
        }
    }

    conn.execute(
        &format!(
            "UPDATE {STAGING_TABLE}
             SET note = (SELECT old.note FROM files old WHERE old.path = {STAGING_TABLE}.path)
             WHERE EXISTS (SELECT 1 FROM files old WHERE old.path = {STAGING_TABLE}.path)"
        ),
        [],
    )
    .map_err(|e| rebuild_err("migrate notes", e))?;

    conn.execute_batch(&format!(
        "ALTER TABLE files RENAME TO {RETIRED_TABLE};
         ALTER TABLE {STAGING_TABLE} RENAME TO files;
         DROP TABLE {RETIRED_TABLE};
         {FILES_INDEXES}"
    ))
    .map_err(|e| rebuild_err("swap tables", e))?;

    Ok(inserted)
}

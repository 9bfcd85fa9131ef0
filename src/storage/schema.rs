//! Database schema definitions and migrations.
//!
//! Provides versioned schema migrations for safe database upgrades.

use rusqlite::Connection;

use crate::error::StorageError;
use crate::Result;

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 1;

/// Name of the live index table.
pub const FILES_TABLE: &str = "files";

/// Run all pending migrations.
///
/// # Errors
///
/// Returns an error if migrations fail.
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )
    .map_err(|e| StorageError::Migration(format!("failed to create migrations table: {e}")))?;

    let current_version = get_current_version(conn)?;
    tracing::info!(
        current = current_version,
        target = SCHEMA_VERSION,
        "Checking database migrations"
    );

    if current_version < 1 {
        migrate_v1(conn)?;
    }

    Ok(())
}

/// Get the current schema version.
fn get_current_version(conn: &Connection) -> Result<i32> {
    let result = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    );

    match result {
        Ok(version) => Ok(version),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(0),
        Err(e) => Err(StorageError::Migration(format!("failed to get version: {e}")).into()),
    }
}

/// Record a migration as applied.
fn record_migration(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "INSERT INTO schema_migrations (version, applied_at) VALUES (?, ?)",
        rusqlite::params![version, super::models::now_unix()],
    )
    .map_err(|e| StorageError::Migration(format!("failed to record migration: {e}")))?;

    Ok(())
}

/// DDL for an index table under the given name.
///
/// Shared by the migration and by rebuild staging so both tables always
/// have identical columns.
#[must_use]
pub fn files_table_ddl(table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {table} (
            id           INTEGER PRIMARY KEY,
            path         TEXT NOT NULL UNIQUE,
            name         TEXT NOT NULL,
            case_key     TEXT NOT NULL,
            ext          TEXT NOT NULL DEFAULT '',
            size         INTEGER NOT NULL DEFAULT 0,
            mtime        INTEGER NOT NULL,
            ctime        INTEGER NOT NULL,
            is_directory INTEGER NOT NULL DEFAULT 0,
            updated_at   INTEGER NOT NULL,
            note         TEXT
        )"
    )
}

/// Secondary indexes of the live table.
pub(crate) const FILES_INDEXES: &str = "
    CREATE INDEX IF NOT EXISTS idx_files_case_key ON files(case_key);
    CREATE INDEX IF NOT EXISTS idx_files_ext ON files(ext);
    CREATE INDEX IF NOT EXISTS idx_files_mtime ON files(mtime);
    CREATE INDEX IF NOT EXISTS idx_files_note ON files(note);
";

/// Migration v1: index table.
fn migrate_v1(conn: &Connection) -> Result<()> {
    tracing::info!("Applying migration v1: files table");

    conn.execute_batch(&files_table_ddl(FILES_TABLE))
        .and_then(|()| conn.execute_batch(FILES_INDEXES))
        .map_err(|e| StorageError::Migration(format!("v1 migration failed: {e}")))?;

    record_migration(conn, 1)?;
    tracing::info!("Migration v1 complete");

    Ok(())
}

/// Verify all expected tables exist.
///
/// # Errors
///
/// Returns an error if any expected table is missing from the schema.
pub fn verify_schema(conn: &Connection) -> Result<()> {
    for table in [FILES_TABLE, "schema_migrations"] {
        let exists: bool = conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type='table' AND name=?",
                [table],
                |_| Ok(true),
            )
            .unwrap_or(false);

        if !exists {
            return Err(StorageError::Migration(format!("table '{table}' not found")).into());
        }
    }

    tracing::debug!("Schema verification passed");
    Ok(())
}

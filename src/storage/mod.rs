//! `SQLite` storage for the filesystem index.
//!
//! This module provides:
//! - Connection management (WAL, single writer, separate reader)
//! - The `files` table schema and migrations
//! - Metadata extraction for indexed paths
//! - The transactional `IndexStore`

mod connection;
mod files;
mod metadata;
mod models;
mod query;
mod rebuild;
mod schema;
mod store;

pub use connection::Database;
pub use files::{
    count_entries, get_entry, list_entries, list_subtree_paths, remove_entry, remove_subtree,
    rename_entry, rename_subtree, reset_all, set_note, upsert_meta,
};
pub use metadata::{extract_metadata, name_parts, normalize_path, path_key};
pub use models::{FileMeta, IndexEntry};
pub use query::QueryOutput;
pub use schema::{migrate, verify_schema, FILES_TABLE, SCHEMA_VERSION};
pub use store::IndexStore;

/// Initialize storage with migrations.
///
/// # Errors
///
/// Returns an error if database initialization fails.
pub fn init_storage(db: &Database) -> crate::Result<()> {
    db.with_conn(|conn| {
        migrate(conn)?;
        verify_schema(conn)?;

        tracing::info!("Storage initialized, schema version {SCHEMA_VERSION}");
        Ok(())
    })
}

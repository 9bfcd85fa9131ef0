//! Transactional index store.
//!
//! `IndexStore` is the single logical writer over the `files` table. Every
//! mutating call runs inside its own immediate transaction; on any error the
//! transaction is rolled back and the prior state is left intact.

use std::path::Path;

use super::connection::Database;
use super::files;
use super::metadata::{extract_metadata, path_key};
use super::models::{FileMeta, IndexEntry};
use super::query::{run_select, run_update, QueryOutput};
use super::rebuild::replace_all;
use crate::gateway::{CertifiedStatement, StatementKind};
use crate::Result;

/// Index store over a shared database handle.
///
/// Clone is cheap - it clones the underlying `Database`.
#[derive(Debug, Clone)]
pub struct IndexStore {
    db: Database,
}

impl IndexStore {
    /// Wrap an initialized database.
    #[must_use]
    pub const fn new(db: Database) -> Self {
        Self { db }
    }

    /// Underlying database handle.
    #[must_use]
    pub const fn database(&self) -> &Database {
        &self.db
    }

    /// Insert or refresh the entry for a file.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the path vanished before it could be read;
    /// callers skip it.
    pub fn upsert_file(&self, path: &Path) -> Result<FileMeta> {
        self.upsert(path, false)
    }

    /// Insert or refresh the entry for a directory.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the path vanished before it could be read.
    pub fn upsert_directory(&self, path: &Path) -> Result<FileMeta> {
        self.upsert(path, true)
    }

    fn upsert(&self, path: &Path, expect_dir: bool) -> Result<FileMeta> {
        let meta = extract_metadata(path)?;
        if meta.is_directory != expect_dir {
            // The filesystem is authoritative over the caller's hint.
            tracing::debug!(path = %meta.path, is_directory = meta.is_directory, "Entry type differs from event");
        }
        self.db
            .with_transaction(|conn| files::upsert_meta(conn, &meta))?;
        Ok(meta)
    }

    /// Insert or refresh already-extracted rows in one transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails; no row is then written.
    pub fn upsert_many(&self, rows: &[FileMeta]) -> Result<usize> {
        self.db.with_transaction(|conn| {
            for meta in rows {
                files::upsert_meta(conn, meta)?;
            }
            Ok(rows.len())
        })
    }

    /// Delete the entry with exactly this path. Absent paths are not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails.
    pub fn remove(&self, path: &Path) -> Result<usize> {
        let key = path_key(path);
        self.db
            .with_transaction(|conn| files::remove_entry(conn, &key))
    }

    /// Delete the entry at `path` and everything nested under it.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails.
    pub fn remove_subtree(&self, path: &Path) -> Result<usize> {
        let key = path_key(path);
        self.db
            .with_transaction(|conn| files::remove_subtree(conn, &key))
    }

    /// Re-key one entry from `old` to `new`, recomputing metadata from `new`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if `new` does not exist.
    pub fn rename(&self, old: &Path, new: &Path) -> Result<usize> {
        let meta = extract_metadata(new)?;
        let old_key = path_key(old);
        self.db
            .with_transaction(|conn| files::rename_entry(conn, &old_key, &meta))
    }

    /// Rewrite every entry at or under `old_prefix` to sit under
    /// `new_prefix`, without re-extracting metadata.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails.
    pub fn rename_subtree(&self, old_prefix: &Path, new_prefix: &Path) -> Result<usize> {
        let old_key = path_key(old_prefix);
        let new_key = path_key(new_prefix);
        self.db
            .with_transaction(|conn| files::rename_subtree(conn, &old_key, &new_key))
    }

    /// Every entry path at or under `prefix`.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list_subtree_paths(&self, prefix: &Path) -> Result<Vec<String>> {
        let key = path_key(prefix);
        self.db
            .with_conn(|conn| files::list_subtree_paths(conn, &key))
    }

    /// Clear every entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails.
    pub fn reset_all(&self) -> Result<usize> {
        self.db.with_transaction(files::reset_all)
    }

    /// Atomically replace the whole table with `rows`, carrying notes over
    /// by exact path.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Rebuild`; the live table is then untouched.
    pub fn replace_all(&self, rows: &[FileMeta]) -> Result<usize> {
        self.db.with_transaction(|conn| replace_all(conn, rows))
    }

    /// Execute a statement certified by the query gateway.
    ///
    /// # Errors
    ///
    /// Returns an error if the statement fails; writes are rolled back.
    pub fn query(&self, statement: &CertifiedStatement) -> Result<QueryOutput> {
        match statement.kind() {
            StatementKind::Select => self.db.with_reader(|conn| run_select(conn, statement)),
            StatementKind::Update => self
                .db
                .with_transaction(|conn| run_update(conn, statement)),
        }
    }

    /// Look up one entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get(&self, path: &Path) -> Result<Option<IndexEntry>> {
        let key = path_key(path);
        self.db.with_reader(|conn| files::get_entry(conn, &key))
    }

    /// Number of indexed entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn count(&self) -> Result<i64> {
        self.db.with_reader(files::count_entries)
    }

    /// All entries ordered by path.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn entries(&self) -> Result<Vec<IndexEntry>> {
        self.db.with_reader(files::list_entries)
    }

    /// Set or clear the note of one entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails.
    pub fn set_note(&self, path: &Path, note: Option<&str>) -> Result<usize> {
        let key = path_key(path);
        self.db
            .with_transaction(|conn| files::set_note(conn, &key, note))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{QueryGateway, Verdict};
    use crate::storage::init_storage;
    use std::fs;
    use tempfile::TempDir;

    fn setup() -> (TempDir, IndexStore) {
        let tmp = TempDir::new().unwrap();
        let db = Database::open_in_memory().unwrap();
        init_storage(&db).unwrap();
        (tmp, IndexStore::new(db))
    }

    fn certify(sql: &str) -> CertifiedStatement {
        match QueryGateway::default().validate(sql) {
            Verdict::Allowed(statement) => statement,
            Verdict::Denied { reason, .. } => panic!("rejected: {reason}"),
        }
    }

    #[test]
    fn test_upsert_file_and_get() {
        let (tmp, store) = setup();
        let file = tmp.path().join("a.txt");
        fs::write(&file, vec![0u8; 100]).unwrap();

        store.upsert_file(&file).unwrap();

        let entry = store.get(&file).unwrap().unwrap();
        assert_eq!(entry.size, 100);
        assert_eq!(entry.path, path_key(&file));
    }

    #[test]
    fn test_upsert_vanished_path_is_not_found() {
        let (tmp, store) = setup();
        let err = store.upsert_file(&tmp.path().join("gone")).unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_rename_requires_destination() {
        let (tmp, store) = setup();
        let file = tmp.path().join("a.txt");
        fs::write(&file, "x").unwrap();
        store.upsert_file(&file).unwrap();

        let err = store.rename(&file, &tmp.path().join("missing.txt")).unwrap_err();
        assert!(err.is_not_found());
        assert!(store.get(&file).unwrap().is_some());
    }

    #[test]
    fn test_rename_subtree_through_store() {
        let (tmp, store) = setup();
        let dir = tmp.path().join("d");
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join("x.txt"), "x").unwrap();
        store.upsert_directory(&dir).unwrap();
        store.upsert_file(&dir.join("x.txt")).unwrap();

        let moved = tmp.path().join("e");
        fs::rename(&dir, &moved).unwrap();
        assert_eq!(store.rename_subtree(&dir, &moved).unwrap(), 2);

        assert!(store.get(&moved.join("x.txt")).unwrap().is_some());
        assert!(store.list_subtree_paths(&dir).unwrap().is_empty());
    }

    #[test]
    fn test_query_select_rows() {
        let (tmp, store) = setup();
        let file = tmp.path().join("report.pdf");
        fs::write(&file, "pdf").unwrap();
        store.upsert_file(&file).unwrap();

        let output = store
            .query(&certify("SELECT name, size FROM files WHERE ext = '.pdf'"))
            .unwrap();
        match output {
            QueryOutput::Rows { columns, rows } => {
                assert_eq!(columns, vec!["name", "size"]);
                assert_eq!(rows.len(), 1);
                assert_eq!(rows[0][0], "report.pdf");
                assert_eq!(rows[0][1], 3);
            }
            QueryOutput::Affected { .. } => panic!("expected rows"),
        }
    }

    #[test]
    fn test_query_update_note() {
        let (tmp, store) = setup();
        let file = tmp.path().join("a.log.txt");
        fs::write(&file, "x").unwrap();
        store.upsert_file(&file).unwrap();

        let output = store
            .query(&certify("UPDATE files SET note = 'logs' WHERE ext = '.txt'"))
            .unwrap();
        assert_eq!(output, QueryOutput::Affected { count: 1 });
        assert_eq!(
            store.get(&file).unwrap().unwrap().note.as_deref(),
            Some("logs")
        );
    }
}

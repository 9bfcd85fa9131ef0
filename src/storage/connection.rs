//! `SQLite` database connection management.
//!
//! Provides a connection wrapper with proper configuration for:
//! - WAL mode so readers are never blocked behind writer commits
//! - A single writer connection (via `parking_lot::Mutex`)
//! - A separate read-only connection for file-backed databases

use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags};
use std::path::Path;
use std::sync::Arc;

use crate::error::StorageError;
use crate::Result;

/// Database connection wrapper.
///
/// Clone is cheap - it just clones the Arcs.
#[derive(Clone)]
pub struct Database {
    writer: Arc<Mutex<Connection>>,
    reader: Arc<Mutex<Connection>>,
    path: String,
}

impl Database {
    /// Open a database at the given path.
    ///
    /// Creates the database file and parent directories if they don't exist.
    /// Configures WAL mode and performance settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or configured.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let path_str = path.to_string_lossy().to_string();

        let writer = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| StorageError::Database(format!("failed to open database: {e}")))?;
        configure(&writer, &path_str)?;

        let reader = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| StorageError::Database(format!("failed to open reader: {e}")))?;
        reader
            .execute_batch("PRAGMA query_only = ON;")
            .map_err(|e| StorageError::Database(format!("failed to configure reader: {e}")))?;

        Ok(Self {
            writer: Arc::new(Mutex::new(writer)),
            reader: Arc::new(Mutex::new(reader)),
            path: path_str,
        })
    }

    /// Open an in-memory database for testing.
    ///
    /// Reads and writes share the single in-memory connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| {
            StorageError::Database(format!("failed to open in-memory database: {e}"))
        })?;
        configure(&conn, ":memory:")?;

        let conn = Arc::new(Mutex::new(conn));
        Ok(Self {
            writer: Arc::clone(&conn),
            reader: conn,
            path: ":memory:".to_string(),
        })
    }

    /// Execute a function with exclusive access to the writer connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the function fails.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.writer.lock();
        f(&conn)
    }

    /// Execute a read-only function on the reader connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the function fails.
    pub fn with_reader<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.reader.lock();
        f(&conn)
    }

    /// Execute a function that may modify the database.
    ///
    /// Wraps the operation in an immediate transaction. Any error rolls the
    /// transaction back and leaves the prior state intact.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails or if the function fails.
    pub fn with_transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.writer.lock();

        conn.execute_batch("BEGIN IMMEDIATE")
            .map_err(|e| StorageError::Transaction(format!("failed to begin transaction: {e}")))?;

        match f(&conn) {
            Ok(result) => {
                if let Err(e) = conn.execute_batch("COMMIT") {
                    let _ = conn.execute_batch("ROLLBACK");
                    return Err(StorageError::Transaction(format!("failed to commit: {e}")).into());
                }
                Ok(result)
            }
            Err(e) => {
                if let Err(rollback) = conn.execute_batch("ROLLBACK") {
                    tracing::error!(error = %rollback, "Rollback failed");
                }
                Err(e)
            }
        }
    }

    /// Get the database path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// True when this database is backed by a file on disk.
    #[must_use]
    pub fn is_file_backed(&self) -> bool {
        self.path != ":memory:"
    }

    /// Check if the database is healthy.
    ///
    /// # Errors
    ///
    /// Returns an error if the health check fails.
    pub fn health_check(&self) -> Result<()> {
        self.with_reader(|conn| {
            conn.query_row("SELECT 1", [], |_| Ok(()))
                .map_err(|e| StorageError::Database(format!("health check failed: {e}")).into())
        })
    }
}

/// Configure connection settings: WAL with relaxed sync.
fn configure(conn: &Connection, path: &str) -> Result<()> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA cache_size = -64000;  -- 64MB cache
        PRAGMA temp_store = MEMORY;
        PRAGMA foreign_keys = ON;
        ",
    )
    .map_err(|e| StorageError::Database(format!("failed to configure database: {e}")))?;

    tracing::debug!(path = %path, "Database configured with WAL mode");
    Ok(())
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn count(db: &Database) -> i64 {
        db.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM test", [], |row| row.get(0))
                .map_err(|e| StorageError::Database(e.to_string()).into())
        })
        .unwrap()
    }

    fn create_test_table(db: &Database) {
        db.with_conn(|conn| {
            conn.execute("CREATE TABLE test (id INTEGER PRIMARY KEY)", [])
                .map_err(|e| StorageError::Database(e.to_string()))?;
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_open_in_memory() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.path(), ":memory:");
        assert!(!db.is_file_backed());
        db.health_check().unwrap();
    }

    #[test]
    fn test_open_creates_parent_dirs() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("dirs").join("test.db");

        let db = Database::open(&path).unwrap();
        assert!(path.exists());
        assert!(db.is_file_backed());
        db.health_check().unwrap();
    }

    #[test]
    fn test_with_transaction_commit() {
        let db = Database::open_in_memory().unwrap();
        create_test_table(&db);

        db.with_transaction(|conn| {
            conn.execute("INSERT INTO test (id) VALUES (1)", [])
                .map_err(|e| StorageError::Database(e.to_string()))?;
            Ok(())
        })
        .unwrap();

        assert_eq!(count(&db), 1);
    }

    #[test]
    fn test_with_transaction_rollback() {
        let db = Database::open_in_memory().unwrap();
        create_test_table(&db);

        let result: Result<()> = db.with_transaction(|conn| {
            conn.execute("INSERT INTO test (id) VALUES (1)", [])
                .map_err(|e| StorageError::Database(e.to_string()))?;
            Err(crate::Error::internal("simulated failure"))
        });

        assert!(result.is_err());
        assert_eq!(count(&db), 0);
    }

    #[test]
    fn test_reader_sees_committed_writes() {
        let tmp = TempDir::new().unwrap();
        let db = Database::open(tmp.path().join("rw.db")).unwrap();
        create_test_table(&db);

        db.with_transaction(|conn| {
            conn.execute("INSERT INTO test (id) VALUES (7)", [])
                .map_err(|e| StorageError::Database(e.to_string()))?;
            Ok(())
        })
        .unwrap();

        let value: i64 = db
            .with_reader(|conn| {
                conn.query_row("SELECT id FROM test", [], |row| row.get(0))
                    .map_err(|e| StorageError::Database(e.to_string()).into())
            })
            .unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn test_reader_rejects_writes() {
        let tmp = TempDir::new().unwrap();
        let db = Database::open(tmp.path().join("ro.db")).unwrap();
        create_test_table(&db);

        let result = db.with_reader(|conn| {
            conn.execute("INSERT INTO test (id) VALUES (1)", [])
                .map_err(|e| StorageError::Database(e.to_string()))?;
            Ok(())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_wal_mode_enabled() {
        let tmp = TempDir::new().unwrap();
        let db = Database::open(tmp.path().join("wal.db")).unwrap();

        let mode: String = db
            .with_conn(|conn| {
                conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))
                    .map_err(|e| StorageError::Database(e.to_string()).into())
            })
            .unwrap();

        assert_eq!(mode, "wal");
    }
}

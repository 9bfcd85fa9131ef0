//! Execution of gateway-certified statements.

use rusqlite::types::ValueRef;
use rusqlite::Connection;
use serde::Serialize;

use crate::error::StorageError;
use crate::gateway::{CertifiedStatement, StatementKind};
use crate::Result;

/// Result of executing a certified statement.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueryOutput {
    /// Rows of a read statement.
    Rows {
        columns: Vec<String>,
        rows: Vec<Vec<serde_json::Value>>,
    },
    /// Affected-row count of a write statement.
    Affected { count: usize },
}

fn to_json(value: ValueRef<'_>) -> serde_json::Value {
    match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => serde_json::Value::from(i),
        ValueRef::Real(f) => serde_json::Value::from(f),
        ValueRef::Text(t) => serde_json::Value::from(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => serde_json::Value::from(format!("<{} bytes>", b.len())),
    }
}

/// Run a read statement and collect its rows.
///
/// # Errors
///
/// Returns an error if the statement fails.
pub fn run_select(conn: &Connection, statement: &CertifiedStatement) -> Result<QueryOutput> {
    debug_assert_eq!(statement.kind(), StatementKind::Select);

    let mut stmt = conn
        .prepare(statement.sql())
        .map_err(|e| StorageError::Database(format!("failed to prepare query: {e}")))?;
    let columns: Vec<String> = stmt.column_names().iter().map(|c| (*c).to_string()).collect();
    let width = columns.len();

    let mut rows = Vec::new();
    let mut cursor = stmt
        .query([])
        .map_err(|e| StorageError::Database(format!("failed to run query: {e}")))?;
    while let Some(row) = cursor
        .next()
        .map_err(|e| StorageError::Database(format!("failed to read row: {e}")))?
    {
        let mut values = Vec::with_capacity(width);
        for i in 0..width {
            let value = row
                .get_ref(i)
                .map_err(|e| StorageError::Database(e.to_string()))?;
            values.push(to_json(value));
        }
        rows.push(values);
    }

    Ok(QueryOutput::Rows { columns, rows })
}

/// Run a write statement. Must run inside a transaction.
///
/// # Errors
///
/// Returns an error if the statement fails.
pub fn run_update(conn: &Connection, statement: &CertifiedStatement) -> Result<QueryOutput> {
    debug_assert_eq!(statement.kind(), StatementKind::Update);

    let count = conn
        .execute(statement.sql(), [])
        .map_err(|e| StorageError::Database(format!("failed to run update: {e}")))?;
    Ok(QueryOutput::Affected { count })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{QueryGateway, Verdict};
    use crate::storage::{migrate, name_parts, upsert_meta, Database, FileMeta};
    use std::path::Path;

    fn certify(sql: &str) -> CertifiedStatement {
        match QueryGateway::default().validate(sql) {
            Verdict::Allowed(statement) => statement,
            Verdict::Denied { reason, .. } => panic!("unexpected denial: {reason}"),
        }
    }

    fn seeded_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            migrate(conn)?;
            for (path, size) in [("/r/a.txt", 10), ("/r/b.md", 20)] {
                let (name, case_key, ext) = name_parts(Path::new(path), false);
                upsert_meta(
                    conn,
                    &FileMeta {
                        path: path.to_string(),
                        name,
                        case_key,
                        ext,
                        size,
                        mtime: 1,
                        ctime: 1,
                        is_directory: false,
                    },
                )?;
            }
            Ok(())
        })
        .unwrap();
        db
    }

    #[test]
    fn test_select_returns_columns_and_json_values() {
        let db = seeded_db();
        let output = db
            .with_conn(|conn| {
                run_select(conn, &certify("SELECT name, size, note FROM files ORDER BY size"))
            })
            .unwrap();

        let QueryOutput::Rows { columns, rows } = output else {
            panic!("expected rows");
        };
        assert_eq!(columns, vec!["name", "size", "note"]);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][0], "a.txt");
        assert_eq!(rows[0][1], 10);
        assert!(rows[0][2].is_null());
    }

    #[test]
    fn test_update_reports_affected_rows() {
        let db = seeded_db();
        let output = db
            .with_conn(|conn| {
                run_update(conn, &certify("UPDATE files SET note = 'seen' WHERE ext = '.md'"))
            })
            .unwrap();
        assert_eq!(output, QueryOutput::Affected { count: 1 });

        let output = db
            .with_conn(|conn| {
                run_select(conn, &certify("SELECT note FROM files WHERE name = 'b.md'"))
            })
            .unwrap();
        let QueryOutput::Rows { rows, .. } = output else {
            panic!("expected rows");
        };
        assert_eq!(rows[0][0], "seen");
    }
}

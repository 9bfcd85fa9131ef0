//! Error types and Result aliases for fstrack.
//!
//! This module defines the error hierarchy used throughout the crate.
//! All public functions return `Result<T, Error>` or `Result<T>`.

use thiserror::Error;

/// Result type alias using fstrack's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for fstrack operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Database/storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// File watching error.
    #[error("watcher error: {0}")]
    Watcher(#[from] WatcherError),

    /// Server/API error.
    #[error("server error: {0}")]
    Server(#[from] ServerError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Storage-specific errors.
#[derive(Error, Debug)]
pub enum StorageError {
    /// `SQLite` database error.
    #[error("database error: {0}")]
    Database(String),

    /// Record or filesystem path not found.
    #[error("not found: {entity} with id '{id}'")]
    NotFound { entity: &'static str, id: String },

    /// Schema migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// A mutation failed and its transaction was rolled back.
    #[error("transaction failed: {0}")]
    Transaction(String),

    /// Staging or swap step of a rebuild failed; the live table is untouched.
    #[error("rebuild failed: {0}")]
    Rebuild(String),
}

/// File watcher errors.
#[derive(Error, Debug)]
pub enum WatcherError {
    /// Failed to watch path.
    #[error("failed to watch path '{path}': {reason}")]
    WatchFailed { path: String, reason: String },

    /// `start` called on a watcher that is already running.
    #[error("already watching '{0}'")]
    AlreadyWatching(String),
}

/// Server/API errors.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Failed to bind to address.
    #[error("failed to bind to {address}: {reason}")]
    BindFailed { address: String, reason: String },

    /// Request handling error.
    #[error("request error: {0}")]
    Request(String),
}

impl Error {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// True when the error reports a path that vanished before it could be
    /// read. Callers treat this as a skip, never as fatal.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Storage(StorageError::NotFound { .. }) => true,
            Self::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

impl StorageError {
    /// Create a not-found error.
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Database(e.to_string())
    }
}

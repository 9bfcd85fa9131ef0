//! Configuration settings and validation.

use crate::{Error, Result};
use std::path::PathBuf;

/// Name of the root-level ignore file read from the watch root.
pub const DEFAULT_IGNORE_FILE: &str = ".fstrackignore";

/// Main configuration for the fstrack service.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory for the `SQLite` database.
    pub data_dir: PathBuf,

    /// Root of the filesystem subtree to index and watch.
    pub watch_root: PathBuf,

    /// Host address to bind to.
    pub host: String,

    /// Port to listen on.
    pub port: u16,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Name of the ignore file looked up at the watch root.
    pub ignore_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            watch_root: PathBuf::from("."),
            host: "127.0.0.1".to_string(),
            port: 8080,
            log_level: "info".to_string(),
            ignore_file: DEFAULT_IGNORE_FILE.to_string(),
        }
    }
}

impl Config {
    /// Create a new configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration value is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(Error::config("port cannot be 0"));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(Error::config(format!(
                "invalid log level '{}', must be one of: {}",
                self.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.host.is_empty() {
            return Err(Error::config("host cannot be empty"));
        }

        if self.ignore_file.is_empty() || self.ignore_file.contains(['/', '\\']) {
            return Err(Error::config(format!(
                "ignore_file must be a plain file name, got '{}'",
                self.ignore_file
            )));
        }

        if !self.watch_root.is_dir() {
            return Err(Error::config(format!(
                "watch root '{}' is not an existing directory",
                self.watch_root.display()
            )));
        }

        Ok(())
    }

    /// Get the path to the `SQLite` database file.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("fstrack.db")
    }

    /// Get the server address as a string.
    #[must_use]
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

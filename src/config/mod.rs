//! Configuration management for fstrack.
//!
//! Supports configuration from:
//! - Command-line arguments (highest priority)
//! - Environment variables

mod settings;

pub use settings::{Config, DEFAULT_IGNORE_FILE};

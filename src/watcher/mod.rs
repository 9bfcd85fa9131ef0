//! Filesystem scanning, watching and index maintenance.
//!
//! This module provides:
//! - Ignore rules with ignore-file glob patterns and negations
//! - Full-tree rebuilds swapped in atomically
//! - Live watching using notify-rs, applied one event at a time
//! - The `Indexer` that serializes rebuilds and watching

mod events;
mod filter;
mod handler;
mod indexer;
mod scanner;
#[allow(clippy::module_inception)]
mod watcher;

pub use events::{EventTranslator, FsEvent};
pub use filter::{IgnoreRules, DEFAULT_IGNORED_DIRS, DEFAULT_IGNORED_NAMES, DEFAULT_IGNORED_SUFFIXES};
pub use handler::{EventHandler, Outcome, WatcherStats, WatcherStatsSnapshot};
pub use indexer::{Indexer, IndexerStatus};
pub use scanner::{scan_tree, RebuildCoordinator, RebuildStats, ScanOutcome};
pub use watcher::{EventWatcher, WatchState};

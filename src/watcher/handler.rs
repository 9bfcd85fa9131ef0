//! Applies filesystem events to the index.

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

use super::events::FsEvent;
use super::filter::IgnoreRules;
use super::scanner::scan_tree;
use crate::server::metrics::WATCH_EVENTS;
use crate::storage::{path_key, IndexStore};
use crate::Result;

/// Statistics for file watching.
#[derive(Debug, Default)]
pub struct WatcherStats {
    pub events_received: AtomicU64,
    pub events_applied: AtomicU64,
    pub events_filtered: AtomicU64,
    pub events_skipped: AtomicU64,
    pub errors: AtomicU64,
}

impl WatcherStats {
    /// Create new stats tracker.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Get snapshot of current stats.
    #[must_use]
    pub fn snapshot(&self) -> WatcherStatsSnapshot {
        WatcherStatsSnapshot {
            events_received: self.events_received.load(Ordering::Relaxed),
            events_applied: self.events_applied.load(Ordering::Relaxed),
            events_filtered: self.events_filtered.load(Ordering::Relaxed),
            events_skipped: self.events_skipped.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of watcher stats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WatcherStatsSnapshot {
    pub events_received: u64,
    pub events_applied: u64,
    pub events_filtered: u64,
    pub events_skipped: u64,
    pub errors: u64,
}

/// What happened to one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The index was mutated.
    Applied,
    /// Every path involved is ignored.
    Filtered,
    /// Nothing to do: the path vanished, or the event repeats a subtree rename.
    Skipped,
}

impl Outcome {
    const fn label(self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Filtered => "filtered",
            Self::Skipped => "skipped",
        }
    }
}

/// Turns [`FsEvent`]s into index mutations, one at a time.
pub struct EventHandler {
    store: IndexStore,
    rules: Arc<IgnoreRules>,
    stats: Arc<WatcherStats>,
    /// Old paths of the most recent subtree rename.
    renamed: HashSet<String>,
}

impl EventHandler {
    #[must_use]
    pub fn new(store: IndexStore, rules: Arc<IgnoreRules>, stats: Arc<WatcherStats>) -> Self {
        Self {
            store,
            rules,
            stats,
            renamed: HashSet::new(),
        }
    }

    /// Apply one event, logging instead of propagating any failure.
    pub fn process(&mut self, event: FsEvent) {
        self.stats.events_received.fetch_add(1, Ordering::Relaxed);
        let kind = event.kind();
        let path = event.path().clone();

        match self.apply(event) {
            Ok(outcome) => {
                let counter = match outcome {
                    Outcome::Applied => &self.stats.events_applied,
                    Outcome::Filtered => &self.stats.events_filtered,
                    Outcome::Skipped => &self.stats.events_skipped,
                };
                counter.fetch_add(1, Ordering::Relaxed);
                WATCH_EVENTS.with_label_values(&[kind, outcome.label()]).inc();
                tracing::trace!(kind, path = %path.display(), outcome = outcome.label(), "Handled event");
            }
            Err(e) if e.is_not_found() => {
                self.stats.events_skipped.fetch_add(1, Ordering::Relaxed);
                WATCH_EVENTS.with_label_values(&[kind, "skipped"]).inc();
                tracing::debug!(kind, path = %path.display(), "Path vanished before it could be indexed");
            }
            Err(e) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                WATCH_EVENTS.with_label_values(&[kind, "failed"]).inc();
                tracing::error!(
                    component = "watcher",
                    operation = kind,
                    path = %path.display(),
                    error = %e,
                    "Failed to apply event"
                );
            }
        }
    }

    /// Apply one event to the index.
    ///
    /// # Errors
    ///
    /// Returns the store error for the mutation that failed; it has been
    /// rolled back.
    pub fn apply(&mut self, event: FsEvent) -> Result<Outcome> {
        match event {
            FsEvent::Created { path, is_dir } => self.created(&path, is_dir),
            FsEvent::Deleted { path, is_dir } => self.deleted(&path, is_dir),
            FsEvent::Modified { path } => self.modified(&path),
            FsEvent::Moved { from, to, is_dir } => self.moved(&from, &to, is_dir),
        }
    }

    fn created(&mut self, path: &Path, is_dir: bool) -> Result<Outcome> {
        if self.rules.is_ignored(path) {
            return Ok(Outcome::Filtered);
        }

        if is_dir || path.is_dir() {
            // A directory can arrive already populated, e.g. moved in from
            // outside the root; its children produce no events of their own.
            let outcome = scan_tree(path, &self.rules);
            if outcome.rows.is_empty() {
                self.store.upsert_directory(path)?;
            } else {
                self.store.upsert_many(&outcome.rows)?;
            }
        } else {
            self.store.upsert_file(path)?;
        }

        self.renamed.clear();
        Ok(Outcome::Applied)
    }

    fn deleted(&mut self, path: &Path, is_dir: bool) -> Result<Outcome> {
        if self.rules.is_ignored(path) {
            return Ok(Outcome::Filtered);
        }

        let was_dir = is_dir || self.store.get(path)?.is_some_and(|e| e.is_directory);
        if was_dir {
            self.store.remove_subtree(path)?;
        } else {
            self.store.remove(path)?;
        }

        self.renamed.clear();
        Ok(Outcome::Applied)
    }

    fn modified(&mut self, path: &Path) -> Result<Outcome> {
        if self.rules.is_ignored(path) {
            return Ok(Outcome::Filtered);
        }
        if !path.exists() {
            return Ok(Outcome::Skipped);
        }

        if path.is_dir() {
            self.store.upsert_directory(path)?;
        } else {
            self.store.upsert_file(path)?;
        }

        self.renamed.clear();
        Ok(Outcome::Applied)
    }

    fn moved(&mut self, from: &Path, to: &Path, is_dir: bool) -> Result<Outcome> {
        if self.renamed.contains(&path_key(from)) {
            return Ok(Outcome::Skipped);
        }

        match (self.rules.is_ignored(from), self.rules.is_ignored(to)) {
            (true, true) => Ok(Outcome::Filtered),
            (true, false) => self.created(to, is_dir),
            (false, true) => self.deleted(from, is_dir),
            (false, false) if is_dir => {
                let old_paths = self.store.list_subtree_paths(from)?;
                if old_paths.is_empty() {
                    return self.created(to, true);
                }

                let count = self.store.rename_subtree(from, to)?;
                tracing::debug!(
                    from = %from.display(),
                    to = %to.display(),
                    entries = count,
                    "Renamed subtree"
                );
                self.renamed = old_paths.into_iter().collect();
                Ok(Outcome::Applied)
            }
            (false, false) => {
                self.store.rename(from, to)?;
                self.renamed.clear();
                Ok(Outcome::Applied)
            }
        }
    }

    /// Current stats handle.
    #[must_use]
    pub fn stats(&self) -> Arc<WatcherStats> {
        Arc::clone(&self.stats)
    }
}

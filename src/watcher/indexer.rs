//! Index lifecycle coordination.
//!
//! The watcher is the only writer while it runs; a rebuild must never
//! overlap with it. `Indexer` owns the current root and the watcher handle
//! behind one mutex so every start/rebuild/root-change flow is serialized.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use super::filter::IgnoreRules;
use super::handler::WatcherStatsSnapshot;
use super::scanner::{RebuildCoordinator, RebuildStats};
use super::watcher::{EventWatcher, WatchState};
use crate::error::WatcherError;
use crate::storage::IndexStore;
use crate::{Error, Result};

struct State {
    root: PathBuf,
    watcher: Option<EventWatcher>,
    last_rebuild: Option<RebuildStats>,
}

/// Point-in-time view of the indexer.
#[derive(Debug, Clone, Serialize)]
pub struct IndexerStatus {
    pub root: PathBuf,
    pub watching: bool,
    pub entries: i64,
    pub last_rebuild: Option<RebuildStats>,
    pub watcher: Option<WatcherStatsSnapshot>,
}

/// Coordinates rebuilds and the live watcher for one watch root.
pub struct Indexer {
    store: IndexStore,
    ignore_file: String,
    db_path: Option<PathBuf>,
    state: Mutex<State>,
}

impl std::fmt::Debug for Indexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Indexer")
            .field("root", &self.root())
            .field("watching", &self.is_watching())
            .finish_non_exhaustive()
    }
}

impl Indexer {
    /// Create a stopped indexer for `root`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `root` is not an existing directory.
    pub fn new(store: IndexStore, root: impl AsRef<Path>, ignore_file: impl Into<String>) -> Result<Self> {
        let root = resolve_root(root.as_ref())?;
        let db = store.database();
        let db_path = db
            .is_file_backed()
            .then(|| resolve_store_path(Path::new(db.path())));

        Ok(Self {
            store,
            ignore_file: ignore_file.into(),
            db_path,
            state: Mutex::new(State {
                root,
                watcher: None,
                last_rebuild: None,
            }),
        })
    }

    /// Shared handle for the store.
    #[must_use]
    pub const fn store(&self) -> &IndexStore {
        &self.store
    }

    /// Current watch root.
    #[must_use]
    pub fn root(&self) -> PathBuf {
        self.state.lock().root.clone()
    }

    #[must_use]
    pub fn is_watching(&self) -> bool {
        self.state
            .lock()
            .watcher
            .as_ref()
            .is_some_and(|w| w.state() == WatchState::Watching)
    }

    /// Rebuild the index, then start watching.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyWatching` if running, or the rebuild/watch failure.
    pub fn start(&self) -> Result<RebuildStats> {
        let mut state = self.state.lock();
        if state.watcher.is_some() {
            return Err(WatcherError::AlreadyWatching(state.root.display().to_string()).into());
        }

        let (stats, rules) = self.rebuild(&mut state)?;
        self.watch(&mut state, rules)?;
        Ok(stats)
    }

    /// Stop watching, rebuild, and resume watching if it was running.
    ///
    /// # Errors
    ///
    /// Returns the rebuild failure; the previous index is kept and watching
    /// resumes on the unchanged root.
    pub fn rebuild_now(&self) -> Result<RebuildStats> {
        let mut state = self.state.lock();
        let was_watching = Self::halt(&mut state);

        match self.rebuild(&mut state) {
            Ok((stats, rules)) => {
                if was_watching {
                    self.watch(&mut state, rules)?;
                }
                Ok(stats)
            }
            Err(e) => {
                if was_watching {
                    self.resume(&mut state);
                }
                Err(e)
            }
        }
    }

    /// Switch to a new root: stop, rebuild for `path`, start watching it.
    ///
    /// On failure the old root is restored and watched again if it was.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an invalid root, or the rebuild
    /// or watch failure.
    pub fn change_root(&self, path: impl AsRef<Path>) -> Result<RebuildStats> {
        let new_root = resolve_root(path.as_ref())?;
        let mut state = self.state.lock();
        let was_watching = Self::halt(&mut state);
        let old_root = std::mem::replace(&mut state.root, new_root);

        tracing::info!(from = %old_root.display(), to = %state.root.display(), "Changing watch root");

        let result = self
            .rebuild(&mut state)
            .and_then(|(stats, rules)| self.watch(&mut state, rules).map(|()| stats));

        match result {
            Ok(stats) => Ok(stats),
            Err(e) => {
                tracing::error!(
                    component = "indexer",
                    operation = "change_root",
                    root = %state.root.display(),
                    error = %e,
                    "Root change failed, reverting"
                );
                Self::halt(&mut state);
                state.root = old_root;
                if was_watching {
                    self.resume(&mut state);
                }
                Err(e)
            }
        }
    }

    /// Stop watching. Idempotent.
    pub fn stop(&self) {
        Self::halt(&mut self.state.lock());
    }

    /// Current status.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry count cannot be read.
    pub fn status(&self) -> Result<IndexerStatus> {
        let entries = self.store.count()?;
        let state = self.state.lock();
        Ok(IndexerStatus {
            root: state.root.clone(),
            watching: state.watcher.is_some(),
            entries,
            last_rebuild: state.last_rebuild,
            watcher: state.watcher.as_ref().map(|w| w.stats().snapshot()),
        })
    }

    fn rules_for(&self, root: &Path) -> Result<Arc<IgnoreRules>> {
        IgnoreRules::load(root, &self.ignore_file, self.db_path.as_deref()).map(Arc::new)
    }

    fn rebuild(&self, state: &mut State) -> Result<(RebuildStats, Arc<IgnoreRules>)> {
        let rules = self.rules_for(&state.root)?;
        let stats = RebuildCoordinator::new(self.store.clone(), Arc::clone(&rules)).run()?;
        state.last_rebuild = Some(stats);
        Ok((stats, rules))
    }

    fn watch(&self, state: &mut State, rules: Arc<IgnoreRules>) -> Result<()> {
        let mut watcher = EventWatcher::new(self.store.clone(), rules);
        watcher.start()?;
        state.watcher = Some(watcher);
        Ok(())
    }

    /// Restart watching the current root without rebuilding.
    fn resume(&self, state: &mut State) {
        let restarted = self
            .rules_for(&state.root)
            .and_then(|rules| self.watch(state, rules));
        if let Err(e) = restarted {
            tracing::error!(
                component = "indexer",
                operation = "resume",
                root = %state.root.display(),
                error = %e,
                "Failed to resume watching"
            );
        }
    }

    /// Stop the watcher if running; returns whether it was.
    fn halt(state: &mut State) -> bool {
        state.watcher.take().is_some_and(|mut watcher| {
            watcher.stop();
            true
        })
    }
}

impl Drop for Indexer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Resolve the database path the way the watch root is resolved, so the
/// store files match the paths the watcher and scanner report.
///
/// Only the parent is canonicalized: `SQLite` places its sidecars next to
/// the name it was opened with.
fn resolve_store_path(path: &Path) -> PathBuf {
    let (Some(parent), Some(name)) = (path.parent(), path.file_name()) else {
        return path.to_path_buf();
    };
    let parent = if parent.as_os_str().is_empty() {
        Path::new(".")
    } else {
        parent
    };
    parent
        .canonicalize()
        .map_or_else(|_| path.to_path_buf(), |dir| dir.join(name))
}

fn resolve_root(path: &Path) -> Result<PathBuf> {
    let root = path
        .canonicalize()
        .map_err(|e| Error::config(format!("watch root {} is not accessible: {e}", path.display())))?;
    if !root.is_dir() {
        return Err(Error::config(format!(
            "watch root {} is not a directory",
            root.display()
        )));
    }
    Ok(root)
}

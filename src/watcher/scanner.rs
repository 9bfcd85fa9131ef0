//! Full-tree rescan and atomic index replacement.
//!
//! Walks the watch root depth-first, pruning ignored directories before
//! descending into them, and hands the surviving rows to
//! [`IndexStore::replace_all`], which swaps them in as one transaction.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use ignore::WalkBuilder;
use serde::Serialize;

use super::filter::IgnoreRules;
use crate::server::metrics::{INDEX_ENTRIES, REBUILD_DURATION};
use crate::storage::{extract_metadata, FileMeta, IndexStore};
use crate::Result;

/// Rows collected by a scan.
#[derive(Debug, Default)]
pub struct ScanOutcome {
    pub rows: Vec<FileMeta>,
    /// Paths visited, including ones that vanished mid-scan.
    pub scanned: u64,
    /// Paths pruned by ignore rules or gone before they could be read.
    pub skipped: u64,
    pub errors: u64,
}

/// Result of one rebuild.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RebuildStats {
    pub scanned: u64,
    pub inserted: u64,
    pub skipped: u64,
    pub errors: u64,
    pub duration_ms: u64,
}

/// Walk `start` and extract metadata for every path the rules keep.
///
/// `start` itself is always included. Per-path failures are counted and
/// logged; they never abort the walk.
#[must_use]
pub fn scan_tree(start: &Path, rules: &Arc<IgnoreRules>) -> ScanOutcome {
    let pruned = Arc::new(AtomicU64::new(0));
    let filter_rules = Arc::clone(rules);
    let filter_pruned = Arc::clone(&pruned);

    let walker = WalkBuilder::new(start)
        .standard_filters(false)
        .follow_links(false)
        .filter_entry(move |entry| {
            let keep = !filter_rules.is_ignored(entry.path());
            if !keep {
                filter_pruned.fetch_add(1, Ordering::Relaxed);
            }
            keep
        })
        .build();

    let mut outcome = ScanOutcome::default();
    for entry in walker {
        match entry {
            Ok(entry) => {
                outcome.scanned += 1;
                match extract_metadata(entry.path()) {
                    Ok(meta) => outcome.rows.push(meta),
                    Err(e) if e.is_not_found() => outcome.skipped += 1,
                    Err(e) => {
                        tracing::warn!(
                            component = "rebuild",
                            operation = "extract_metadata",
                            path = %entry.path().display(),
                            error = %e,
                            "Failed to read metadata"
                        );
                        outcome.errors += 1;
                    }
                }
            }
            Err(e) => {
                tracing::warn!(component = "rebuild", operation = "walk", error = %e, "Error walking directory");
                outcome.errors += 1;
            }
        }
    }

    outcome.skipped += pruned.load(Ordering::Relaxed);
    outcome
}

/// Rebuilds the index from a full scan of the rules' root.
#[derive(Debug, Clone)]
pub struct RebuildCoordinator {
    store: IndexStore,
    rules: Arc<IgnoreRules>,
}

impl RebuildCoordinator {
    #[must_use]
    pub const fn new(store: IndexStore, rules: Arc<IgnoreRules>) -> Self {
        Self { store, rules }
    }

    /// Scan the root and atomically replace the index with the result.
    ///
    /// The watcher must not be running while this executes.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Rebuild` if staging or swapping fails; the
    /// previous index is then left untouched.
    pub fn run(&self) -> Result<RebuildStats> {
        let started = Instant::now();
        let root = self.rules.root();
        tracing::info!(root = %root.display(), "Starting rebuild");

        let outcome = scan_tree(root, &self.rules);
        let inserted = self.store.replace_all(&outcome.rows).map_err(|e| {
            tracing::error!(
                component = "rebuild",
                operation = "replace_all",
                root = %root.display(),
                scanned = outcome.scanned,
                error = %e,
                "Rebuild failed, index unchanged"
            );
            e
        })?;

        let elapsed = started.elapsed();
        REBUILD_DURATION.observe(elapsed.as_secs_f64());
        INDEX_ENTRIES.set(i64::try_from(inserted).unwrap_or(i64::MAX));

        let stats = RebuildStats {
            scanned: outcome.scanned,
            inserted: u64::try_from(inserted).unwrap_or(u64::MAX),
            skipped: outcome.skipped,
            errors: outcome.errors,
            duration_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        };
        tracing::info!(
            root = %root.display(),
            scanned = stats.scanned,
            inserted = stats.inserted,
            skipped = stats.skipped,
            errors = stats.errors,
            duration_ms = stats.duration_ms,
            "Rebuild complete"
        );

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{init_storage, path_key, Database};
    use std::fs;
    use tempfile::TempDir;

    fn setup() -> (TempDir, IndexStore) {
        let tmp = TempDir::new().unwrap();
        let db = Database::open_in_memory().unwrap();
        init_storage(&db).unwrap();
        (tmp, IndexStore::new(db))
    }

    fn layout(root: &Path) {
        fs::write(root.join("a.txt"), vec![0u8; 100]).unwrap();
        fs::create_dir_all(root.join("src/nested")).unwrap();
        fs::write(root.join("src/main.rs"), "fn main() {}").unwrap();
        fs::write(root.join("src/nested/deep.md"), "# deep").unwrap();
        fs::create_dir_all(root.join("node_modules/pkg")).unwrap();
        fs::write(root.join("node_modules/pkg/x.js"), "x").unwrap();
        fs::write(root.join("debug.log"), "noise").unwrap();
    }

    #[test]
    fn test_scan_prunes_ignored_subtrees() {
        let (tmp, _) = setup();
        layout(tmp.path());
        let rules = Arc::new(IgnoreRules::new(tmp.path(), None));

        let outcome = scan_tree(tmp.path(), &rules);
        let paths: Vec<&str> = outcome.rows.iter().map(|r| r.path.as_str()).collect();

        assert!(paths.contains(&path_key(tmp.path()).as_str()));
        assert!(paths.contains(&path_key(&tmp.path().join("a.txt")).as_str()));
        assert!(paths.contains(&path_key(&tmp.path().join("src/nested/deep.md")).as_str()));
        assert!(!paths.iter().any(|p| p.contains("node_modules")));
        assert!(!paths.iter().any(|p| p.ends_with("debug.log")));
        // node_modules and debug.log are pruned, nothing beneath is visited
        assert_eq!(outcome.skipped, 2);
        assert_eq!(outcome.errors, 0);
    }

    #[test]
    fn test_rebuild_replaces_index() {
        let (tmp, store) = setup();
        layout(tmp.path());
        let rules = Arc::new(IgnoreRules::new(tmp.path(), None));

        let stale = tmp.path().join("stale.txt");
        fs::write(&stale, "old").unwrap();
        store.upsert_file(&stale).unwrap();
        fs::remove_file(&stale).unwrap();

        let stats = RebuildCoordinator::new(store.clone(), rules).run().unwrap();

        // root, a.txt, src, src/main.rs, src/nested, src/nested/deep.md
        assert_eq!(stats.inserted, 6);
        assert_eq!(store.count().unwrap(), 6);
        assert!(store.get(&stale).unwrap().is_none());

        let a = store.get(&tmp.path().join("a.txt")).unwrap().unwrap();
        assert_eq!(a.size, 100);
        assert!(!a.is_directory);
        assert!(store.get(&tmp.path().join("src")).unwrap().unwrap().is_directory);
    }

    #[test]
    fn test_rebuild_is_idempotent_and_keeps_notes() {
        let (tmp, store) = setup();
        layout(tmp.path());
        let rules = Arc::new(IgnoreRules::new(tmp.path(), None));
        let coordinator = RebuildCoordinator::new(store.clone(), rules);

        coordinator.run().unwrap();
        store
            .set_note(&tmp.path().join("src/main.rs"), Some("entry point"))
            .unwrap();
        let first: Vec<_> = store
            .entries()
            .unwrap()
            .into_iter()
            .map(|e| (e.path, e.size, e.mtime, e.is_directory))
            .collect();

        coordinator.run().unwrap();
        let second: Vec<_> = store
            .entries()
            .unwrap()
            .into_iter()
            .map(|e| (e.path, e.size, e.mtime, e.is_directory))
            .collect();

        assert_eq!(first, second);
        assert_eq!(
            store
                .get(&tmp.path().join("src/main.rs"))
                .unwrap()
                .unwrap()
                .note
                .as_deref(),
            Some("entry point")
        );
    }

    #[test]
    fn test_rebuild_honors_ignore_file_negation() {
        let (tmp, store) = setup();
        layout(tmp.path());
        fs::write(tmp.path().join(".fstrackignore"), "src/nested\n!debug.log\n").unwrap();
        let rules = Arc::new(IgnoreRules::load(tmp.path(), ".fstrackignore", None).unwrap());

        RebuildCoordinator::new(store.clone(), rules).run().unwrap();

        assert!(store.get(&tmp.path().join("debug.log")).unwrap().is_some());
        assert!(store.get(&tmp.path().join("src/nested")).unwrap().is_none());
        assert!(store
            .get(&tmp.path().join("src/nested/deep.md"))
            .unwrap()
            .is_none());
    }
}

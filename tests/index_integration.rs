//! Integration tests for rebuilds, event handling and the query gateway.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use fstrack::gateway::{QueryGateway, Verdict};
use fstrack::storage::{init_storage, path_key, Database, IndexStore, QueryOutput};
use fstrack::watcher::{
    EventHandler, EventWatcher, FsEvent, IgnoreRules, Indexer, RebuildCoordinator, WatcherStats,
};
use tempfile::TempDir;

struct Fixture {
    root: PathBuf,
    store: IndexStore,
    _root_dir: TempDir,
    _data_dir: TempDir,
}

fn fixture() -> Fixture {
    let root_dir = TempDir::new().unwrap();
    let data_dir = TempDir::new().unwrap();
    let root = root_dir.path().canonicalize().unwrap();

    let db = Database::open(data_dir.path().join("fstrack.db")).unwrap();
    init_storage(&db).unwrap();

    Fixture {
        root,
        store: IndexStore::new(db),
        _root_dir: root_dir,
        _data_dir: data_dir,
    }
}

fn rebuild(store: &IndexStore, root: &Path) -> Arc<IgnoreRules> {
    let rules = Arc::new(IgnoreRules::load(root, ".fstrackignore", None).unwrap());
    RebuildCoordinator::new(store.clone(), Arc::clone(&rules))
        .run()
        .unwrap();
    rules
}

fn indexed_paths(store: &IndexStore) -> Vec<String> {
    store.entries().unwrap().into_iter().map(|e| e.path).collect()
}

fn wait_for(mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        thread::sleep(Duration::from_millis(50));
    }
    false
}

/// Rebuild indexes a.txt but not node_modules; events then add b.txt and
/// move a.txt while keeping its note.
#[test]
fn test_concrete_scenario() {
    let fx = fixture();
    let root = &fx.root;
    fs::write(root.join("a.txt"), vec![b'a'; 100]).unwrap();
    fs::create_dir(root.join("node_modules")).unwrap();
    fs::write(root.join("node_modules/x.js"), "x").unwrap();

    let rules = rebuild(&fx.store, root);
    assert_eq!(
        indexed_paths(&fx.store),
        vec![path_key(root), path_key(&root.join("a.txt"))]
    );
    let a = fx.store.get(&root.join("a.txt")).unwrap().unwrap();
    assert_eq!(a.size, 100);
    assert_eq!(a.ext, ".txt");

    let mut handler = EventHandler::new(fx.store.clone(), rules, WatcherStats::new());

    let b = root.join("b.txt");
    fs::write(&b, "twelve bytes").unwrap();
    handler.process(FsEvent::Created {
        path: b.clone(),
        is_dir: false,
    });
    let entry = fx.store.get(&b).unwrap().unwrap();
    let on_disk = fs::metadata(&b).unwrap();
    assert_eq!(entry.size, 12);
    assert_eq!(
        entry.mtime,
        i64::try_from(
            on_disk
                .modified()
                .unwrap()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_secs()
        )
        .unwrap()
    );

    fx.store
        .set_note(&root.join("a.txt"), Some("quarterly numbers"))
        .unwrap();
    fs::create_dir(root.join("sub")).unwrap();
    handler.process(FsEvent::Created {
        path: root.join("sub"),
        is_dir: true,
    });
    fs::rename(root.join("a.txt"), root.join("sub/a.txt")).unwrap();
    handler.process(FsEvent::Moved {
        from: root.join("a.txt"),
        to: root.join("sub/a.txt"),
        is_dir: false,
    });

    assert!(fx.store.get(&root.join("a.txt")).unwrap().is_none());
    let moved = fx.store.get(&root.join("sub/a.txt")).unwrap().unwrap();
    assert_eq!(moved.size, 100);
    assert_eq!(moved.name, "a.txt");
    assert_eq!(moved.note.as_deref(), Some("quarterly numbers"));
    assert!(!indexed_paths(&fx.store)
        .iter()
        .any(|p| p.contains("node_modules")));
}

/// Every non-ignored path on disk has exactly one entry after a rebuild.
#[test]
fn test_rebuild_matches_filesystem() {
    let fx = fixture();
    let root = &fx.root;
    for dir in ["docs/guides", "src/bin", "build/out", ".git/objects"] {
        fs::create_dir_all(root.join(dir)).unwrap();
    }
    for file in [
        "README.md",
        "docs/guides/intro.md",
        "src/bin/tool.rs",
        "src/cache.pyc",
        "build/out/app",
        ".git/objects/ab",
        "notes.bak",
    ] {
        fs::write(root.join(file), file).unwrap();
    }
    fs::write(root.join(".fstrackignore"), "# local\n*.bak\n").unwrap();

    let rules = rebuild(&fx.store, root);

    let walk_rules = Arc::clone(&rules);
    let mut expected: Vec<String> = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_entry(move |e| e.depth() == 0 || !walk_rules.is_ignored(e.path()))
        .map(|e| path_key(e.unwrap().path()))
        .collect();
    expected.sort();

    let indexed = indexed_paths(&fx.store);
    assert_eq!(indexed, expected);
    assert!(indexed.iter().any(|p| p.ends_with(".fstrackignore")));
    assert!(!indexed.iter().any(|p| p.ends_with("notes.bak")));
    assert!(!indexed.iter().any(|p| p.contains("build")));
}

#[test]
fn test_store_files_inside_root_are_never_indexed() {
    let root_dir = TempDir::new().unwrap();
    let root = root_dir.path().canonicalize().unwrap();
    let db_path = root.join("fstrack.db");
    let db = Database::open(&db_path).unwrap();
    init_storage(&db).unwrap();
    let store = IndexStore::new(db);
    fs::write(root.join("data.csv"), "1,2").unwrap();

    let indexer = Indexer::new(store.clone(), &root, ".fstrackignore").unwrap();
    indexer.rebuild_now().unwrap();

    let paths = indexed_paths(&store);
    assert!(paths.contains(&path_key(&root.join("data.csv"))));
    assert!(!paths.iter().any(|p| p.contains("fstrack.db")));
}

#[test]
fn test_rebuild_idempotent_with_notes() {
    let fx = fixture();
    let root = &fx.root;
    fs::create_dir_all(root.join("a/b")).unwrap();
    fs::write(root.join("a/b/c.txt"), "c").unwrap();
    fs::write(root.join("top.txt"), "t").unwrap();

    rebuild(&fx.store, root);
    fx.store
        .set_note(&root.join("a/b/c.txt"), Some("deep note"))
        .unwrap();
    fx.store.set_note(&root.join("a"), Some("dir note")).unwrap();
    let rows = |store: &IndexStore| -> Vec<(String, i64, i64, bool, Option<String>)> {
        store
            .entries()
            .unwrap()
            .into_iter()
            .map(|e| (e.path, e.size, e.mtime, e.is_directory, e.note))
            .collect()
    };
    let first = rows(&fx.store);

    rebuild(&fx.store, root);
    assert_eq!(rows(&fx.store), first);
}

#[test]
fn test_subtree_rename_rewrites_every_descendant() {
    let fx = fixture();
    let root = &fx.root;
    let project = root.join("project");
    for i in 0..20 {
        let dir = project.join(format!("pkg{i}"));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("mod.rs"), "").unwrap();
    }
    fs::write(root.join("project-notes.txt"), "sibling with shared prefix").unwrap();

    let rules = rebuild(&fx.store, root);
    let before = fx.store.count().unwrap();
    let under_project = fx.store.list_subtree_paths(&project).unwrap();
    assert_eq!(under_project.len(), 41);

    let renamed = root.join("archive");
    fs::rename(&project, &renamed).unwrap();
    let mut handler = EventHandler::new(fx.store.clone(), rules, WatcherStats::new());
    handler.process(FsEvent::Moved {
        from: project.clone(),
        to: renamed.clone(),
        is_dir: true,
    });

    assert_eq!(fx.store.count().unwrap(), before);
    assert!(fx.store.list_subtree_paths(&project).unwrap().is_empty());
    assert_eq!(fx.store.list_subtree_paths(&renamed).unwrap().len(), 41);
    assert!(fx
        .store
        .get(&renamed.join("pkg7/mod.rs"))
        .unwrap()
        .is_some());
    assert!(fx
        .store
        .get(&root.join("project-notes.txt"))
        .unwrap()
        .is_some());
    let archive = fx.store.get(&renamed).unwrap().unwrap();
    assert_eq!(archive.name, "archive");
}

#[test]
fn test_gateway_against_file_backed_store() {
    let fx = fixture();
    let root = &fx.root;
    fs::write(root.join("one.md"), "1").unwrap();
    fs::write(root.join("two.md"), "22").unwrap();
    rebuild(&fx.store, root);

    let gateway = QueryGateway::default();
    for denied in [
        "SELECT * FROM files, other",
        "UPDATE files SET note='x', size=0 WHERE id=1",
        "DROP TABLE files",
        "SELECT * FROM files NOT INDEXED, sqlite_master",
        "SELECT * FROM files INDEXED BY idx_files_ext, sqlite_master",
    ] {
        let response = gateway.execute(&fx.store, denied).unwrap();
        assert!(!response.verdict.allowed, "{denied}");
        assert!(response.output.is_none());
    }

    let response = gateway
        .execute(&fx.store, "UPDATE files SET note='x' WHERE 1=1")
        .unwrap();
    assert!(response.verdict.allowed);
    let total = fx.store.count().unwrap();
    assert_eq!(
        response.output,
        Some(QueryOutput::Affected {
            count: usize::try_from(total).unwrap()
        })
    );

    let Verdict::Allowed(select) =
        gateway.validate("SELECT name, size FROM files WHERE ext = '.md' ORDER BY name")
    else {
        panic!("select should be allowed");
    };
    match fx.store.query(&select).unwrap() {
        QueryOutput::Rows { columns, rows } => {
            assert_eq!(columns, vec!["name", "size"]);
            assert_eq!(rows.len(), 2);
            assert_eq!(rows[1][0], "two.md");
            assert_eq!(rows[1][1], 2);
        }
        QueryOutput::Affected { .. } => panic!("expected rows"),
    }
}

#[test]
fn test_live_watcher_tracks_changes() {
    let fx = fixture();
    let root = fx.root.clone();
    fs::write(root.join("seed.txt"), "s").unwrap();

    let indexer = Indexer::new(fx.store.clone(), &root, ".fstrackignore").unwrap();
    indexer.start().unwrap();
    assert!(fx.store.get(&root.join("seed.txt")).unwrap().is_some());

    let created = root.join("created.txt");
    fs::write(&created, "hello").unwrap();
    assert!(wait_for(|| fx.store.get(&created).unwrap().is_some()));

    fs::create_dir(root.join("node_modules")).unwrap();
    fs::write(root.join("node_modules/dep.js"), "d").unwrap();

    let moved = root.join("renamed.txt");
    fs::rename(&created, &moved).unwrap();
    assert!(wait_for(|| {
        fx.store.get(&moved).unwrap().is_some() && fx.store.get(&created).unwrap().is_none()
    }));

    fs::remove_file(&moved).unwrap();
    assert!(wait_for(|| fx.store.get(&moved).unwrap().is_none()));

    indexer.stop();
    assert!(!indexed_paths(&fx.store)
        .iter()
        .any(|p| p.contains("node_modules")));
}

/// Renaming a populated directory under a running indexer moves every
/// descendant, and the renamed directory keeps being tracked.
#[test]
fn test_live_directory_rename() {
    let fx = fixture();
    let root = fx.root.clone();
    let album = root.join("album");
    fs::create_dir_all(album.join("inner")).unwrap();
    for name in ["one.jpg", "two.jpg", "three.jpg", "inner/deep.jpg"] {
        fs::write(album.join(name), name).unwrap();
    }

    let indexer = Indexer::new(fx.store.clone(), &root, ".fstrackignore").unwrap();
    indexer.start().unwrap();
    fx.store.set_note(&album.join("two.jpg"), Some("keeper")).unwrap();
    assert_eq!(fx.store.list_subtree_paths(&album).unwrap().len(), 6);

    let photos = root.join("photos");
    fs::rename(&album, &photos).unwrap();
    assert!(wait_for(|| {
        fx.store.list_subtree_paths(&album).unwrap().is_empty()
            && fx.store.list_subtree_paths(&photos).unwrap().len() == 6
    }));

    let added = photos.join("inner/added.jpg");
    fs::write(&added, "new").unwrap();
    assert!(wait_for(|| fx.store.get(&added).unwrap().is_some()));
    indexer.stop();

    assert!(fx
        .store
        .get(&photos.join("inner/deep.jpg"))
        .unwrap()
        .is_some());
    let kept = fx.store.get(&photos.join("two.jpg")).unwrap().unwrap();
    assert_eq!(kept.note.as_deref(), Some("keeper"));
    assert_eq!(fx.store.list_subtree_paths(&photos).unwrap().len(), 7);
}

/// A database reached through a symlinked data dir inside the watch root
/// is never indexed, and its own writes do not feed back into the watcher.
#[cfg(unix)]
#[test]
fn test_store_behind_symlink_is_not_watched() {
    let tmp = TempDir::new().unwrap();
    let real = tmp.path().join("real");
    fs::create_dir(&real).unwrap();
    let link = tmp.path().join("link");
    std::os::unix::fs::symlink(&real, &link).unwrap();

    let db = Database::open(link.join("fstrack.db")).unwrap();
    init_storage(&db).unwrap();
    let store = IndexStore::new(db);
    let indexer = Indexer::new(store.clone(), &link, ".fstrackignore").unwrap();
    indexer.start().unwrap();

    let file = indexer.root().join("a.txt");
    fs::write(&file, "a").unwrap();
    assert!(wait_for(|| store.get(&file).unwrap().is_some()));

    let received = || {
        indexer
            .status()
            .unwrap()
            .watcher
            .map_or(0, |w| w.events_received)
    };
    thread::sleep(Duration::from_millis(500));
    let settled = received();
    thread::sleep(Duration::from_secs(1));
    let later = received();
    indexer.stop();

    assert!(later - settled < 10, "watcher kept receiving events: {settled} -> {later}");
    assert!(!indexed_paths(&store).iter().any(|p| p.contains("fstrack.db")));
}

/// Changes made while the watcher is stopped are not replayed on restart.
#[test]
fn test_events_while_stopped_are_not_observed() {
    let fx = fixture();
    let root = fx.root.clone();
    let rules = rebuild(&fx.store, &root);

    let mut watcher = EventWatcher::new(fx.store.clone(), rules);
    watcher.start().unwrap();
    watcher.stop();

    let missed = root.join("missed.txt");
    fs::write(&missed, "m").unwrap();

    watcher.start().unwrap();
    let seen = root.join("seen.txt");
    fs::write(&seen, "s").unwrap();
    assert!(wait_for(|| fx.store.get(&seen).unwrap().is_some()));
    watcher.stop();

    assert!(fx.store.get(&missed).unwrap().is_none());
}

//! Live filesystem watcher using notify-rs.
//!
//! Raw notifications are forwarded over a channel to one worker thread that
//! translates and applies them strictly in arrival order.

use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};

use super::events::EventTranslator;
use super::filter::IgnoreRules;
use super::handler::{EventHandler, WatcherStats};
use crate::error::WatcherError;
use crate::server::metrics::WATCHER_RUNNING;
use crate::storage::IndexStore;
use crate::Result;

/// How long an unpaired rename half waits for its partner.
const RENAME_PAIR_TIMEOUT: Duration = Duration::from_millis(250);

/// Wake-up interval when nothing is pending.
const IDLE_TICK: Duration = Duration::from_secs(5);

/// Watcher lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Stopped,
    Watching,
}

struct Running {
    notifier: RecommendedWatcher,
    shutdown_tx: Sender<()>,
    worker: JoinHandle<()>,
}

/// Keeps the index in sync with changes under the rules' root.
///
/// Owned by the caller; `start` on a running watcher is rejected and `stop`
/// is idempotent. Events that occur while stopped are not replayed.
pub struct EventWatcher {
    store: IndexStore,
    rules: Arc<IgnoreRules>,
    stats: Arc<WatcherStats>,
    running: Option<Running>,
}

impl std::fmt::Debug for EventWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventWatcher")
            .field("root", &self.rules.root())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl EventWatcher {
    #[must_use]
    pub fn new(store: IndexStore, rules: Arc<IgnoreRules>) -> Self {
        Self {
            store,
            rules,
            stats: WatcherStats::new(),
            running: None,
        }
    }

    #[must_use]
    pub const fn state(&self) -> WatchState {
        if self.running.is_some() {
            WatchState::Watching
        } else {
            WatchState::Stopped
        }
    }

    /// The watched root.
    #[must_use]
    pub fn root(&self) -> &Path {
        self.rules.root()
    }

    #[must_use]
    pub fn stats(&self) -> Arc<WatcherStats> {
        Arc::clone(&self.stats)
    }

    /// Subscribe recursively to the root and start applying events.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyWatching` if running, or `WatchFailed` if the
    /// subscription or worker thread cannot be set up.
    pub fn start(&mut self) -> Result<()> {
        let root = self.rules.root().to_path_buf();
        if self.running.is_some() {
            return Err(WatcherError::AlreadyWatching(root.display().to_string()).into());
        }

        let (event_tx, event_rx) = unbounded();
        let mut notifier = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            // the receiver is gone once the worker has exited
            let _ = event_tx.send(res);
        })
        .map_err(|e| watch_failed(&root, e))?;
        notifier
            .watch(&root, RecursiveMode::Recursive)
            .map_err(|e| watch_failed(&root, e))?;

        let (shutdown_tx, shutdown_rx) = bounded(1);
        let handler = EventHandler::new(
            self.store.clone(),
            Arc::clone(&self.rules),
            Arc::clone(&self.stats),
        );
        let worker = thread::Builder::new()
            .name("fstrack-watcher".to_string())
            .spawn(move || run_worker(&event_rx, &shutdown_rx, handler))
            .map_err(|e| watch_failed(&root, e))?;

        self.running = Some(Running {
            notifier,
            shutdown_tx,
            worker,
        });
        WATCHER_RUNNING.set(1);
        tracing::info!(root = %root.display(), "Watching directory");
        Ok(())
    }

    /// Cancel the subscription and wait for the worker thread to exit.
    ///
    /// Once this returns no further index mutation is made by this watcher.
    pub fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        drop(running.notifier);
        let _ = running.shutdown_tx.send(());
        if running.worker.join().is_err() {
            tracing::error!(component = "watcher", operation = "stop", "Watcher worker panicked");
        }

        WATCHER_RUNNING.set(0);
        tracing::info!(root = %self.rules.root().display(), "Stopped watching directory");
    }
}

impl Drop for EventWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn watch_failed(root: &Path, e: impl std::fmt::Display) -> crate::Error {
    WatcherError::WatchFailed {
        path: root.display().to_string(),
        reason: e.to_string(),
    }
    .into()
}

fn run_worker(
    events: &Receiver<notify::Result<notify::Event>>,
    shutdown: &Receiver<()>,
    mut handler: EventHandler,
) {
    let mut translator = EventTranslator::new();
    tracing::debug!("Watcher worker started");

    loop {
        // queued events are discarded once stop is requested
        if shutdown.try_recv().is_ok() {
            break;
        }

        let wait = if translator.has_pending() {
            RENAME_PAIR_TIMEOUT
        } else {
            IDLE_TICK
        };

        select! {
            recv(shutdown) -> _ => break,
            recv(events) -> msg => match msg {
                Ok(Ok(event)) => {
                    for fs_event in translator.translate(event) {
                        handler.process(fs_event);
                    }
                }
                Ok(Err(e)) => {
                    handler.stats().errors.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    tracing::warn!(component = "watcher", operation = "receive", error = %e, "Watch error");
                }
                Err(_) => break,
            },
            default(wait) => {
                if let Some(fs_event) = translator.flush() {
                    handler.process(fs_event);
                }
            }
        }
    }

    tracing::debug!("Watcher worker exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{init_storage, Database};
    use std::fs;
    use std::time::Instant;
    use tempfile::TempDir;

    fn setup() -> (TempDir, IndexStore, EventWatcher) {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().canonicalize().unwrap();
        let db = Database::open_in_memory().unwrap();
        init_storage(&db).unwrap();
        let store = IndexStore::new(db);
        let rules = Arc::new(IgnoreRules::new(&root, None));
        let watcher = EventWatcher::new(store.clone(), rules);
        (tmp, store, watcher)
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

    #[test]
    fn test_state_transitions() {
        let (_tmp, _store, mut watcher) = setup();
        assert_eq!(watcher.state(), WatchState::Stopped);

        watcher.start().unwrap();
        assert_eq!(watcher.state(), WatchState::Watching);

        let err = watcher.start().unwrap_err();
        assert!(err.to_string().contains("already watching"));

        watcher.stop();
        assert_eq!(watcher.state(), WatchState::Stopped);
        watcher.stop();
        assert_eq!(watcher.state(), WatchState::Stopped);
    }

    #[test]
    fn test_start_on_missing_root_fails() {
        let db = Database::open_in_memory().unwrap();
        init_storage(&db).unwrap();
        let rules = Arc::new(IgnoreRules::new("/nonexistent/fstrack/root", None));
        let mut watcher = EventWatcher::new(IndexStore::new(db), rules);

        assert!(watcher.start().is_err());
        assert_eq!(watcher.state(), WatchState::Stopped);
    }

    #[test]
    fn test_live_create_is_indexed() {
        let (tmp, store, mut watcher) = setup();
        let root = tmp.path().canonicalize().unwrap();
        watcher.start().unwrap();

        let file = root.join("live.txt");
        fs::write(&file, "live").unwrap();
        assert!(wait_for(|| store.get(&file).unwrap().is_some()));

        watcher.stop();
        assert!(watcher.stats().snapshot().events_received > 0);
    }
}

//! Prometheus metrics definitions.

use once_cell::sync::Lazy;
use prometheus::{
    register_histogram, register_histogram_vec, register_int_counter_vec, register_int_gauge,
    Histogram, HistogramVec, IntCounterVec, IntGauge,
};

/// Entries currently in the index.
pub static INDEX_ENTRIES: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("fstrack_index_entries", "Number of indexed paths").unwrap()
});

/// Whether the live watcher is running (1) or stopped (0).
pub static WATCHER_RUNNING: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("fstrack_watcher_running", "1 while the watcher is observing").unwrap()
});

/// Filesystem events applied to the index, by kind and outcome.
pub static WATCH_EVENTS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "fstrack_watch_events_total",
        "Filesystem events handled by the watcher",
        &["kind", "outcome"]
    )
    .unwrap()
});

/// Query gateway verdicts.
pub static QUERY_VERDICTS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "fstrack_query_verdicts_total",
        "Statements submitted to the query gateway",
        &["kind", "verdict"]
    )
    .unwrap()
});

/// Full rebuild duration.
pub static REBUILD_DURATION: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "fstrack_rebuild_duration_seconds",
        "Duration of full index rebuilds",
        vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0]
    )
    .unwrap()
});

/// Request latency histogram.
pub static REQUEST_LATENCY: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "fstrack_request_duration_seconds",
        "Request latency in seconds",
        &["endpoint", "method"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .unwrap()
});

/// Initialize all metrics (call once at startup).
pub fn init_metrics() {
    let _ = &*INDEX_ENTRIES;
    let _ = &*WATCHER_RUNNING;
    let _ = &*WATCH_EVENTS;
    let _ = &*QUERY_VERDICTS;
    let _ = &*REBUILD_DURATION;
    let _ = &*REQUEST_LATENCY;

    tracing::debug!("Prometheus metrics initialized");
}

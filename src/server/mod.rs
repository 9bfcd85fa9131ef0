//! HTTP surface, metrics and logging.
//!
//! This module provides:
//! - REST API using axum (status, query, rebuild, watch root)
//! - Health and metrics endpoints
//! - Tracing setup

mod app;
pub mod metrics;
mod observability;
mod rest;

pub use app::{App, ServerConfig};
pub use metrics::init_metrics;
pub use observability::{init_tracing, spans};
pub use rest::{create_rest_router, AppState, QueryRequest, WatchRootRequest};

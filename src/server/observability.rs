//! Structured logging and tracing configuration.
//!
//! Every caught failure is logged with `component` and `operation` fields
//! alongside the error, so log sinks can group them.

use tracing_subscriber::{
    filter::EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt, Registry,
};

/// Initialize tracing.
///
/// `RUST_LOG` takes precedence over `level` when set.
///
/// # Panics
///
/// Panics if a global subscriber has already been installed in this process.
pub fn init_tracing(level: &str, json: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if json {
        let json_layer = fmt::layer()
            .json()
            .with_target(true)
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true);

        Registry::default().with(env_filter).with(json_layer).init();
    } else {
        let fmt_layer = fmt::layer()
            .with_target(true)
            .with_thread_names(true);

        Registry::default().with(env_filter).with(fmt_layer).init();
    }

    tracing::debug!("Tracing initialized: level={}, json={}", level, json);
}

/// Span helpers.
pub mod spans {
    use std::path::Path;

    use tracing::{info_span, Span};

    /// Span for one HTTP request.
    #[must_use]
    pub fn request_span(method: &str, uri: &str, request_id: &str) -> Span {
        info_span!(
            "request",
            method = %method,
            uri = %uri,
            request_id = %request_id,
        )
    }

    /// Span for a lifecycle operation (start, rebuild, root change) on a root.
    #[must_use]
    pub fn lifecycle_span(operation: &str, root: &Path) -> Span {
        info_span!(
            "lifecycle",
            operation = %operation,
            root = %root.display(),
        )
    }
}

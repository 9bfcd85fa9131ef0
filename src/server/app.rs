//! Main application server.
//!
//! Starts the index lifecycle, serves the REST API, and on a shutdown
//! signal drains connections and stops the watcher.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::observability::spans;
use super::rest::{create_rest_router, AppState};
use crate::watcher::Indexer;
use crate::Result;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host address to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// Application server.
pub struct App {
    config: ServerConfig,
    state: AppState,
}

impl App {
    #[must_use]
    pub fn new(config: ServerConfig, indexer: Arc<Indexer>) -> Self {
        Self {
            config,
            state: AppState::new(indexer),
        }
    }

    /// Build the router with all endpoints.
    fn router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        create_rest_router(self.state.clone())
            .layer(
                TraceLayer::new_for_http()
                    .make_span_with(|request: &axum::http::Request<_>| {
                        let request_id = request
                            .headers()
                            .get("x-request-id")
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or("unknown");

                        spans::request_span(
                            request.method().as_str(),
                            &request.uri().to_string(),
                            request_id,
                        )
                    })
                    .on_response(
                        |response: &axum::response::Response,
                         latency: std::time::Duration,
                         _span: &tracing::Span| {
                            tracing::info!(
                                status = %response.status(),
                                latency = ?latency,
                                "Request completed"
                            );
                        },
                    ),
            )
            .layer(cors)
    }

    /// Rebuild and start watching, then serve until a shutdown signal.
    ///
    /// The watcher is stopped after the server has drained.
    ///
    /// # Errors
    ///
    /// Returns an error if the initial rebuild fails, the address cannot
    /// be bound, or the server fails.
    pub async fn run(self) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .map_err(|e| crate::Error::config(format!("invalid address: {e}")))?;

        let indexer = Arc::clone(&self.state.indexer);
        let stats = tokio::task::spawn_blocking(move || {
            let _span = spans::lifecycle_span("start", &indexer.root()).entered();
            indexer.start()
        })
        .await
        .map_err(|e| crate::Error::internal(format!("startup task failed: {e}")))??;
        tracing::info!(
            inserted = stats.inserted,
            duration_ms = stats.duration_ms,
            "Initial index built"
        );

        let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
            crate::error::ServerError::BindFailed {
                address: addr.to_string(),
                reason: e.to_string(),
            }
        })?;

        tracing::info!(%addr, "Server listening");

        let served = axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| crate::error::ServerError::Request(e.to_string()));

        let indexer = Arc::clone(&self.state.indexer);
        tokio::task::spawn_blocking(move || indexer.stop())
            .await
            .map_err(|e| crate::Error::internal(format!("shutdown task failed: {e}")))?;

        served?;
        tracing::info!("Server shut down gracefully");
        Ok(())
    }
}

/// Wait for SIGTERM (Unix) or Ctrl+C.
///
/// A signal handler that cannot be installed never fires; the other one
/// still can.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}

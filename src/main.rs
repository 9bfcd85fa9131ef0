//! fstrack - queryable filesystem metadata index
//!
//! Entry point for the fstrack server and maintenance commands.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

use std::sync::Arc;

use clap::{Parser, Subcommand};
use fstrack::gateway::QueryGateway;
use fstrack::server::{init_metrics, init_tracing, App, ServerConfig};
use fstrack::storage::{init_storage, Database, IndexStore};
use fstrack::watcher::Indexer;
use fstrack::{Config, Error, Result};

/// fstrack - queryable filesystem metadata index
#[derive(Parser, Debug)]
#[command(name = "fstrack")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Data directory for `SQLite` database
    #[arg(short, long, env = "FSTRACK_DATA_DIR", default_value = "./data")]
    data_dir: std::path::PathBuf,

    /// Directory tree to index and watch
    #[arg(short, long, env = "FSTRACK_WATCH_ROOT", default_value = ".")]
    watch_root: std::path::PathBuf,

    /// Name of the ignore file read from the watch root
    #[arg(long, env = "FSTRACK_IGNORE_FILE", default_value = fstrack::config::DEFAULT_IGNORE_FILE)]
    ignore_file: String,

    /// Host address to bind to
    #[arg(long, env = "FSTRACK_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on
    #[arg(short, long, env = "FSTRACK_PORT", default_value = "8080")]
    port: u16,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "FSTRACK_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Enable JSON logging output
    #[arg(long, env = "FSTRACK_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build the index, watch for changes and serve the API (default)
    Serve,
    /// Rebuild the index once and exit
    Rebuild,
    /// Validate and run one SQL statement against the index
    Query {
        /// `SELECT` on `files`, or `UPDATE files SET note = ... WHERE ...`
        statement: String,
    },
    /// Remove every entry from the index
    Reset,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(&cli.log_level, cli.log_json);

    let config = Config {
        data_dir: cli.data_dir,
        watch_root: cli.watch_root,
        host: cli.host,
        port: cli.port,
        log_level: cli.log_level,
        ignore_file: cli.ignore_file,
    };

    tracing::debug!(?config, "Configuration loaded");
    config.validate()?;

    let db = Database::open(config.database_path())?;
    init_storage(&db)?;
    init_metrics();
    let store = IndexStore::new(db);

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            tracing::info!(
                "fstrack v{} indexing {} and serving on {}",
                env!("CARGO_PKG_VERSION"),
                config.watch_root.display(),
                config.server_addr()
            );

            let indexer = Indexer::new(store, &config.watch_root, config.ignore_file)?;
            let server_config = ServerConfig {
                host: config.host,
                port: config.port,
            };
            App::new(server_config, Arc::new(indexer)).run().await
        }
        Command::Rebuild => {
            let indexer = Indexer::new(store, &config.watch_root, config.ignore_file)?;
            let stats = tokio::task::spawn_blocking(move || indexer.rebuild_now())
                .await
                .map_err(|e| Error::internal(format!("rebuild task failed: {e}")))??;
            print_json(&stats)
        }
        Command::Query { statement } => {
            let response = QueryGateway::default().execute(&store, &statement)?;
            print_json(&response)
        }
        Command::Reset => {
            let removed = store.reset_all()?;
            tracing::info!(removed, "Index reset");
            print_json(&serde_json::json!({ "removed": removed }))
        }
    }
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| Error::internal(format!("failed to encode output: {e}")))?;
    println!("{text}");
    Ok(())
}

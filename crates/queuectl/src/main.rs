//! `queuectl`: a persistent background job queue operated entirely through
//! this CLI (spec §1). `main` wires up logging and the SQLite-backed store,
//! then hands off to [`cli::Cli::run`].

mod cli;
mod control;
mod manager;
mod render;
mod signals;
mod worker;

use std::sync::Arc;

use clap::Parser;
use queue_core::{JobStore, QueueError};
use queue_store_sqlite::SqliteStore;
use tracing_subscriber::EnvFilter;

const DEFAULT_DB_PATH: &str = "./queue.db";

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = cli::Cli::parse();
    let db_path = std::env::var("QUEUECTL_DB_PATH").unwrap_or_else(|_| DEFAULT_DB_PATH.to_string());

    if let Err(e) = run(cli, db_path).await {
        eprintln!("Error: {e}");
        std::process::exit(exit_code_for(&e));
    }
}

async fn run(cli: cli::Cli, db_path: String) -> anyhow::Result<()> {
    let store = SqliteStore::open(&db_path).await?;
    let store: Arc<dyn JobStore> = Arc::new(store);
    cli.run(store, db_path).await
}

/// Spec §6/§7: 1 for user/validation errors, 2 for everything else.
fn exit_code_for(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<QueueError>()
        .map(QueueError::exit_code)
        .unwrap_or(2)
}

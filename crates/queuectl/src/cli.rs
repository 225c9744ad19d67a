//! `clap`-derived command surface (spec §6), following the pack's
//! top-level-struct-plus-subcommand-enum shape: a thin [`Cli::run`] parses,
//! matches, and delegates everything else to [`crate::control::ControlApi`],
//! [`crate::worker::Worker`], or [`crate::manager::WorkerManager`].

use std::sync::Arc;

use clap::{Parser, Subcommand};
use queue_core::{Job, JobStore, QueueError};

use crate::control::ControlApi;
use crate::manager::WorkerManager;
use crate::render;
use crate::worker::Worker;

#[derive(Parser)]
#[command(name = "queuectl", version, about = "A persistent background job queue")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Enqueue a job from a JSON object: {"command": "...", "id": "...", "max_retries": N}
    Enqueue { json: String },

    /// Print job counts by state and the currently registered worker pids
    Status,

    /// List jobs, optionally filtered by state (default: pending)
    List {
        #[arg(long)]
        state: Option<String>,
    },

    Worker {
        #[command(subcommand)]
        cmd: WorkerCommand,
    },

    Dlq {
        #[command(subcommand)]
        cmd: DlqCommand,
    },

    Config {
        #[command(subcommand)]
        cmd: ConfigCommand,
    },
}

#[derive(Subcommand)]
pub enum WorkerCommand {
    /// Spawn N worker processes
    Start {
        #[arg(long, default_value_t = 1)]
        count: u32,
        /// Block in this process and wait for workers instead of detaching
        #[arg(long)]
        foreground: bool,
    },
    /// Send SIGTERM to every currently registered worker pid
    Stop,
    /// Internal: run a single worker loop in the current process.
    /// Spawned by `worker start`; not meant to be invoked directly.
    #[command(hide = true)]
    Run {
        #[arg(long)]
        id: String,
    },
}

#[derive(Subcommand)]
pub enum DlqCommand {
    /// List dead-lettered jobs
    List,
    /// Re-queue a single dead job back to pending
    Retry { job_id: String },
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Set a config value (max_retries or backoff_base)
    Set { key: String, value: String },
    /// Print a single config value
    Get { key: String },
    /// Print all config values
    List,
}

impl Cli {
    pub async fn run(self, store: Arc<dyn JobStore>, db_path: String) -> anyhow::Result<()> {
        let api = ControlApi::new(store.clone());

        match self.command {
            Command::Enqueue { json } => {
                let outcome = api.enqueue(&json).await?;
                println!("Job {} enqueued: {}", outcome.id, outcome.command);
            }

            Command::Status => {
                let counts = api.counts_by_state().await?;
                let workers = api.list_workers().await?;
                println!("{}", render::status_summary(&counts, &workers));
            }

            Command::List { state } => {
                let state = state.as_deref().or(Some("pending"));
                let jobs: Vec<Job> = api.list_jobs(state).await?;
                println!("{}", render::jobs_table(&jobs));
            }

            Command::Worker { cmd } => match cmd {
                WorkerCommand::Start { count, foreground } => {
                    if count < 1 {
                        return Err(QueueError::Validation("--count must be at least 1".to_string()).into());
                    }
                    let manager = WorkerManager::new(store, db_path);
                    manager.start(count, foreground).await?;
                }
                WorkerCommand::Stop => {
                    let manager = WorkerManager::new(store, db_path);
                    manager.stop().await?;
                }
                WorkerCommand::Run { id } => {
                    let executor = Arc::new(queue_executor::ShellExecutor::new(None));
                    let worker = Worker::new(id, store, executor);
                    worker.run_until_shutdown().await?;
                }
            },

            Command::Dlq { cmd } => match cmd {
                DlqCommand::List => {
                    let jobs = api.list_dead().await?;
                    println!("{}", render::jobs_table(&jobs));
                }
                DlqCommand::Retry { job_id } => {
                    api.retry_from_dlq(&job_id).await?;
                    println!("Job {job_id} re-queued to pending");
                }
            },

            Command::Config { cmd } => match cmd {
                ConfigCommand::Set { key, value } => {
                    api.set_config(&key, &value).await?;
                    println!("{key}={value}");
                }
                ConfigCommand::Get { key } => match api.get_config(&key).await? {
                    Some(value) => println!("{value}"),
                    None => println!("(unset)"),
                },
                ConfigCommand::List => {
                    let entries = api.list_config().await?;
                    println!("{}", render::config_table(&entries));
                }
            },
        }

        Ok(())
    }
}

//! `WorkerManager` (spec §4.3): spawns N sibling `queuectl worker run`
//! processes, forwards termination signals to them, and waits for them to
//! exit. `stop` is a separate, standalone invocation that signals whatever
//! pids are currently registered in the Store, independent of whether the
//! manager that spawned them is still alive.

use std::sync::Arc;

use queue_core::JobStore;
use tracing::{info, warn};
use uuid::Uuid;

use crate::signals::{send_terminate, wait_for_termination};

pub struct WorkerManager {
    store: Arc<dyn JobStore>,
    db_path: String,
}

impl WorkerManager {
    pub fn new(store: Arc<dyn JobStore>, db_path: String) -> Self {
        Self { store, db_path }
    }

    /// Spawns `count` workers. In foreground mode, blocks until a
    /// termination signal arrives, forwards it to every child, and waits
    /// for all of them to exit. Otherwise returns immediately, leaving the
    /// children running independently.
    pub async fn start(&self, count: u32, foreground: bool) -> anyhow::Result<()> {
        let exe = std::env::current_exe()?;
        let mut children = Vec::with_capacity(count as usize);

        for _ in 0..count {
            let worker_id = format!("worker-{}", Uuid::new_v4());
            let child = tokio::process::Command::new(&exe)
                .arg("worker")
                .arg("run")
                .arg("--id")
                .arg(&worker_id)
                .env("QUEUECTL_DB_PATH", &self.db_path)
                .spawn()?;
            info!(worker_id = %worker_id, pid = ?child.id(), "spawned worker");
            children.push((worker_id, child));
        }

        if !foreground {
            println!("spawned {} worker(s)", children.len());
            return Ok(());
        }

        wait_for_termination().await;
        info!("manager received shutdown signal, forwarding to workers");
        for (worker_id, child) in &children {
            if let Some(pid) = child.id() {
                send_terminate(pid);
            } else {
                warn!(worker_id = %worker_id, "worker child has no pid, cannot signal");
            }
        }

        for (worker_id, mut child) in children {
            if let Err(e) = child.wait().await {
                warn!(worker_id = %worker_id, error = %e, "error waiting for worker to exit");
            }
        }
        Ok(())
    }

    /// Signals every currently-registered worker pid directly, without
    /// requiring the original manager process to still be running.
    pub async fn stop(&self) -> anyhow::Result<()> {
        let workers = self.store.list_workers().await?;
        if workers.is_empty() {
            println!("no registered workers");
            return Ok(());
        }
        for worker in &workers {
            send_terminate(worker.pid as u32);
            println!("sent SIGTERM to {} (pid {})", worker.worker_id, worker.pid);
        }
        Ok(())
    }
}

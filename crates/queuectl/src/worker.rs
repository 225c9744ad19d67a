//! The Worker main loop (spec §4.2): claim, execute, report, repeat, until
//! a shutdown signal is observed and the in-flight job (if any) finishes.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use queue_core::{JobStore, QueueError};
use queue_executor::JobExecutor;
use tracing::{debug, error, info, warn};

use crate::signals::wait_for_termination;

const POLL_INTERVAL: Duration = Duration::from_secs(1);
const BUSY_RETRY_INTERVAL: Duration = Duration::from_millis(200);

/// Retries a store write until it stops returning `STORE_BUSY` (spec §7:
/// "workers recover from STORE_BUSY; all other store errors are fatal").
/// Unlike `claim_next_job`, which treats a busy store as "nothing to do"
/// and moves on, completing or failing an already-claimed job has no
/// acceptable "skip it" outcome, so this keeps retrying instead.
async fn retry_on_busy<T, F, Fut>(mut op: F) -> Result<T, QueueError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, QueueError>>,
{
    loop {
        match op().await {
            Err(QueueError::StoreBusy) => tokio::time::sleep(BUSY_RETRY_INTERVAL).await,
            other => return other,
        }
    }
}

pub struct Worker {
    worker_id: String,
    store: Arc<dyn JobStore>,
    executor: Arc<dyn JobExecutor>,
    shutdown: Arc<AtomicBool>,
}

impl Worker {
    pub fn new(worker_id: String, store: Arc<dyn JobStore>, executor: Arc<dyn JobExecutor>) -> Self {
        Self {
            worker_id,
            store,
            executor,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Registers, loops claim→execute→report until shutdown, unregisters.
    /// A non-`STORE_BUSY` store error is fatal: the worker logs and returns
    /// `Err`, and the manager does not restart it (spec §4.2 "Fatal errors").
    pub async fn run(self) -> anyhow::Result<()> {
        info!(worker_id = %self.worker_id, "worker starting");
        self.store
            .register_worker(&self.worker_id, std::process::id())
            .await?;

        let result = self.run_loop().await;

        if let Err(e) = self.store.unregister_worker(&self.worker_id).await {
            warn!(worker_id = %self.worker_id, error = %e, "failed to unregister worker on exit");
        }

        match &result {
            Ok(()) => info!(worker_id = %self.worker_id, "worker stopped"),
            Err(e) => error!(worker_id = %self.worker_id, error = %e, "worker exiting on fatal error"),
        }
        result
    }

    async fn run_loop(&self) -> anyhow::Result<()> {
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                return Ok(());
            }

            let job = self.store.claim_next_job(&self.worker_id).await?;

            let Some(job) = job else {
                tokio::time::sleep(POLL_INTERVAL).await;
                continue;
            };

            debug!(worker_id = %self.worker_id, job_id = %job.id, command = %job.command, "claimed job");

            let outcome = self.executor.execute(&job.command).await;
            match outcome {
                Ok(outcome) if outcome.succeeded() => {
                    info!(worker_id = %self.worker_id, job_id = %job.id, "job completed");
                    retry_on_busy(|| self.store.complete_job(&job.id)).await?;
                }
                Ok(outcome) => {
                    let summary = outcome.summary();
                    warn!(worker_id = %self.worker_id, job_id = %job.id, %summary, "job failed");
                    retry_on_busy(|| self.store.fail_job(&job.id, &summary)).await?;
                }
                Err(e) => {
                    let summary = format!("executor error: {e}");
                    warn!(worker_id = %self.worker_id, job_id = %job.id, %summary, "job failed");
                    retry_on_busy(|| self.store.fail_job(&job.id, &summary)).await?;
                }
            }

            if self.shutdown.load(Ordering::SeqCst) {
                return Ok(());
            }
        }
    }

    /// Installs a SIGTERM/SIGINT handler that flips the shutdown flag, then
    /// runs until it fires and the in-flight job (if any) finishes.
    pub async fn run_until_shutdown(self) -> anyhow::Result<()> {
        let shutdown = self.shutdown_handle();
        tokio::spawn(async move {
            wait_for_termination().await;
            info!("worker received shutdown signal");
            shutdown.store(true, Ordering::SeqCst);
        });
        self.run().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[tokio::test]
    async fn retry_on_busy_retries_until_success() {
        let attempts = AtomicU32::new(0);
        let result = retry_on_busy(|| {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(QueueError::StoreBusy)
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_on_busy_propagates_non_busy_errors() {
        let result: Result<(), QueueError> =
            retry_on_busy(|| async { Err(QueueError::NotFound("x".to_string())) }).await;
        assert!(matches!(result, Err(QueueError::NotFound(_))));
    }
}

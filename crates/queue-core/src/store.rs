use async_trait::async_trait;

use crate::error::QueueError;
use crate::types::{Job, JobSpec, JobState, WorkerRegistration};

/// Job counts broken down by state, as returned by `queuectl status` (spec §4.1 `countsByState`).
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct StateCounts {
    pub pending: i64,
    pub processing: i64,
    pub failed: i64,
    pub completed: i64,
    pub dead: i64,
}

/// The durable, transactional persistence layer (spec §4.1).
///
/// Every write is synchronous and crash-consistent: on return, either all
/// state changes are durably committed or none are. Implementations are
/// free to choose any backing engine, provided `claim_next_job` serializes
/// concurrent callers strongly enough that invariant 2 (at most one worker
/// observes a given job in `PROCESSING` at a time) holds under N concurrent
/// callers.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Inserts a new `Pending` job. Fails with `DuplicateId` if `spec.id` is
    /// already taken, `Validation` if `spec.command` is empty.
    async fn enqueue(&self, spec: JobSpec) -> Result<String, QueueError>;

    /// The atomic fetch-and-claim. Returns `None` if no job is eligible, or
    /// if the write lock could not be acquired within the retry budget
    /// (`STORE_BUSY` is swallowed here, never surfaced to the caller).
    async fn claim_next_job(&self, worker_id: &str) -> Result<Option<Job>, QueueError>;

    /// `Processing -> Completed`. `InvalidTransition` if not `Processing`.
    async fn complete_job(&self, job_id: &str) -> Result<(), QueueError>;

    /// `Processing -> Failed` or `Dead`, depending on `attempts` vs `max_retries`.
    async fn fail_job(&self, job_id: &str, error_text: &str) -> Result<(), QueueError>;

    /// Read-only listing, ordered `updated_at DESC`.
    async fn list_jobs(&self, state_filter: Option<JobState>) -> Result<Vec<Job>, QueueError>;

    async fn counts_by_state(&self) -> Result<StateCounts, QueueError>;

    /// `Dead -> Pending`, resetting `attempts` to 0. `NotDead`/`NotFound` on invalid input.
    async fn retry_from_dlq(&self, job_id: &str) -> Result<(), QueueError>;

    async fn get_config(&self, key: &str) -> Result<Option<String>, QueueError>;
    async fn set_config(&self, key: &str, value: &str) -> Result<(), QueueError>;
    async fn list_config(&self) -> Result<Vec<(String, String)>, QueueError>;

    async fn register_worker(&self, worker_id: &str, pid: u32) -> Result<(), QueueError>;
    async fn unregister_worker(&self, worker_id: &str) -> Result<(), QueueError>;
    async fn list_workers(&self) -> Result<Vec<WorkerRegistration>, QueueError>;
}

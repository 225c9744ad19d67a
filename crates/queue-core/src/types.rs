use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::QueueError;

/// The five states a job can occupy. See spec §3 invariants 1-5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Processing,
    Failed,
    Completed,
    Dead,
}

impl JobState {
    pub const ALL: [JobState; 5] = [
        JobState::Pending,
        JobState::Processing,
        JobState::Failed,
        JobState::Completed,
        JobState::Dead,
    ];

    /// `true` for states invariant 1 says are never claimed again.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Dead)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Pending => "pending",
            JobState::Processing => "processing",
            JobState::Failed => "failed",
            JobState::Completed => "completed",
            JobState::Dead => "dead",
        };
        f.write_str(s)
    }
}

impl FromStr for JobState {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobState::Pending),
            "processing" => Ok(JobState::Processing),
            "failed" => Ok(JobState::Failed),
            "completed" => Ok(JobState::Completed),
            "dead" => Ok(JobState::Dead),
            other => Err(QueueError::Validation(format!(
                "unknown job state {other:?}, expected one of pending/processing/completed/failed/dead"
            ))),
        }
    }
}

/// The payload needed to enqueue a new job (spec §4.1 `enqueue`).
#[derive(Debug, Clone, Deserialize)]
pub struct JobSpec {
    pub command: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub max_retries: Option<i64>,
}

/// A job row, as returned by every read and write operation on the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub command: String,
    pub state: JobState,
    pub attempts: i64,
    pub max_retries: i64,
    pub run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub claimed_by: Option<String>,
    pub last_error: Option<String>,
}

/// A worker process registration (spec §3 `WorkerRegistration`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRegistration {
    pub worker_id: String,
    pub pid: i64,
    pub started_at: DateTime<Utc>,
}

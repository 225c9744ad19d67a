//! The thin, validate-then-delegate layer the CLI command handlers call
//! (spec §4.4). Every method maps 1:1 onto a [`JobStore`] operation; the
//! only work done here is turning loosely-typed CLI input (a JSON blob, a
//! state name, a config value) into the typed arguments the store expects.

use std::str::FromStr;
use std::sync::Arc;

use queue_core::{
    is_recognized_key, Job, JobSpec, JobState, JobStore, QueueError, StateCounts,
    WorkerRegistration,
};

/// Result of a successful `enqueue`, carrying what the CLI prints
/// (`Job <id> enqueued: <command>`).
pub struct EnqueueOutcome {
    pub id: String,
    pub command: String,
}

pub struct ControlApi {
    store: Arc<dyn JobStore>,
}

impl ControlApi {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    pub async fn enqueue(&self, json: &str) -> Result<EnqueueOutcome, QueueError> {
        let spec: JobSpec = serde_json::from_str(json)
            .map_err(|e| QueueError::Validation(format!("invalid json: {e}")))?;
        let command = spec.command.clone();
        let id = self.store.enqueue(spec).await?;
        Ok(EnqueueOutcome { id, command })
    }

    pub async fn list_jobs(&self, state_filter: Option<&str>) -> Result<Vec<Job>, QueueError> {
        let state = state_filter.map(JobState::from_str).transpose()?;
        self.store.list_jobs(state).await
    }

    pub async fn counts_by_state(&self) -> Result<StateCounts, QueueError> {
        self.store.counts_by_state().await
    }

    pub async fn list_dead(&self) -> Result<Vec<Job>, QueueError> {
        self.store.list_jobs(Some(JobState::Dead)).await
    }

    pub async fn retry_from_dlq(&self, job_id: &str) -> Result<(), QueueError> {
        self.store.retry_from_dlq(job_id).await
    }

    pub async fn get_config(&self, key: &str) -> Result<Option<String>, QueueError> {
        if !is_recognized_key(key) {
            return Err(QueueError::Validation(format!("unrecognized config key {key:?}")));
        }
        self.store.get_config(key).await
    }

    pub async fn set_config(&self, key: &str, value: &str) -> Result<(), QueueError> {
        if !is_recognized_key(key) {
            return Err(QueueError::Validation(format!("unrecognized config key {key:?}")));
        }
        let parsed: i64 = value
            .parse()
            .map_err(|_| QueueError::Validation(format!("config value {value:?} is not an integer")))?;
        let floor = if key == queue_core::BACKOFF_BASE_KEY { 1 } else { 0 };
        if parsed < floor {
            return Err(QueueError::Validation(format!(
                "config value {parsed} must be at least {floor}"
            )));
        }
        self.store.set_config(key, value).await
    }

    pub async fn list_config(&self) -> Result<Vec<(String, String)>, QueueError> {
        self.store.list_config().await
    }

    pub async fn list_workers(&self) -> Result<Vec<WorkerRegistration>, QueueError> {
        self.store.list_workers().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use queue_store_sqlite::SqliteStore;

    async fn control() -> (ControlApi, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.db");
        let store = SqliteStore::open(path.to_str().unwrap()).await.unwrap();
        (ControlApi::new(Arc::new(store)), dir)
    }

    #[tokio::test]
    async fn enqueue_rejects_malformed_json() {
        let (api, _dir) = control().await;
        let err = api.enqueue("not json").await.unwrap_err();
        assert!(matches!(err, QueueError::Validation(_)));
    }

    #[tokio::test]
    async fn enqueue_happy_path() {
        let (api, _dir) = control().await;
        let outcome = api
            .enqueue(r#"{"id":"j1","command":"echo ok"}"#)
            .await
            .unwrap();
        assert_eq!(outcome.id, "j1");
        assert_eq!(outcome.command, "echo ok");
    }

    #[tokio::test]
    async fn list_jobs_rejects_unknown_state() {
        let (api, _dir) = control().await;
        let err = api.list_jobs(Some("bogus")).await.unwrap_err();
        assert!(matches!(err, QueueError::Validation(_)));
    }

    #[tokio::test]
    async fn set_config_rejects_unrecognized_key() {
        let (api, _dir) = control().await;
        let err = api.set_config("nope", "1").await.unwrap_err();
        assert!(matches!(err, QueueError::Validation(_)));
    }

    #[tokio::test]
    async fn set_config_rejects_non_integer_value() {
        let (api, _dir) = control().await;
        let err = api.set_config("max_retries", "abc").await.unwrap_err();
        assert!(matches!(err, QueueError::Validation(_)));
    }

    #[tokio::test]
    async fn config_roundtrip_through_control_api() {
        let (api, _dir) = control().await;
        api.set_config("backoff_base", "3").await.unwrap();
        assert_eq!(api.get_config("backoff_base").await.unwrap(), Some("3".to_string()));
    }
}

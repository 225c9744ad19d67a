//! Data model, error types, and the `JobStore` trait shared by every part
//! of `queuectl`: the store implementation, the worker loop, and the CLI.

mod config;
mod error;
mod store;
mod types;

pub use config::{
    is_recognized_key, BACKOFF_BASE_KEY, DEFAULT_BACKOFF_BASE, DEFAULT_MAX_RETRIES,
    MAX_RETRIES_KEY,
};
pub use error::QueueError;
pub use store::{JobStore, StateCounts};
pub use types::{Job, JobSpec, JobState, WorkerRegistration};

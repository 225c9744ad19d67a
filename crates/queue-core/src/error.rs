use thiserror::Error;

/// Errors raised by the scheduling engine.
///
/// Kept independent of any particular storage backend (`queue-store-sqlite`
/// maps its own `sqlx` errors onto these variants at the `JobStore` boundary)
/// so callers never need to match on backend-specific error types.
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("a job with id {0} already exists")]
    DuplicateId(String),

    #[error("no job with id {0}")]
    NotFound(String),

    #[error("invalid state transition: {0}")]
    InvalidTransition(String),

    #[error("job {0} is not in the dead letter queue")]
    NotDead(String),

    #[error("could not acquire the store's write lock in time")]
    StoreBusy,

    #[error("store is unavailable: {0}")]
    StoreUnavailable(String),
}

impl QueueError {
    /// Maps an error to the exit code `queuectl` reports to its caller (spec §6/§7).
    pub fn exit_code(&self) -> i32 {
        match self {
            QueueError::Validation(_) => 1,
            QueueError::DuplicateId(_)
            | QueueError::NotFound(_)
            | QueueError::InvalidTransition(_)
            | QueueError::NotDead(_)
            | QueueError::StoreBusy
            | QueueError::StoreUnavailable(_) => 2,
        }
    }
}

//! Errors returned by the job store.

use easel_core::error::CoreError;
use easel_core::job_state::JobState;
use easel_core::types::DbId;

/// Failure of a [`JobRepo`](crate::repositories::JobRepo) operation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The database could not be reached. Does not affect job state.
    #[error("Job store unavailable: {0}")]
    Unavailable(sqlx::Error),

    /// The database rejected the statement or returned an unusable row.
    #[error("Job store error: {0}")]
    Database(sqlx::Error),

    #[error("Job {0} not found")]
    NotFound(DbId),

    /// The job is not in a state that allows the requested operation.
    #[error("Invalid transition: cannot {action} job {id} in state {from}")]
    InvalidTransition {
        id: DbId,
        action: &'static str,
        from: JobState,
    },

    /// The caller's claim was recovered and the job has been claimed again.
    #[error("Claim on job {id} for attempt {attempt} was superseded by attempt {current}")]
    ClaimSuperseded { id: DbId, attempt: i32, current: i32 },

    #[error("Validation failed: {0}")]
    Validation(String),
}

impl StoreError {
    /// Whether retrying the same call later could succeed.
    ///
    /// Only connection-level failures qualify. A closed pool never reopens.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(err) if !matches!(err, sqlx::Error::PoolClosed))
    }

    /// Lost a race with cancellation or stale-claim recovery. Benign for
    /// a worker finishing its attempt.
    pub fn is_lost_claim(&self) -> bool {
        matches!(
            self,
            StoreError::InvalidTransition { .. } | StoreError::ClaimSuperseded { .. }
        )
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => StoreError::Unavailable(err),
            other => StoreError::Database(other),
        }
    }
}

impl From<CoreError> for StoreError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(msg) => StoreError::Validation(msg),
            other => StoreError::Validation(other.to_string()),
        }
    }
}

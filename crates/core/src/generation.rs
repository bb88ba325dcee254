//! Contract for the external operation that produces a job's result.
//!
//! The engine treats generation as opaque: it hands over the job kind,
//! payload and target, and gets back either a result blob or a reason.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::types::DbId;

/// Input handed to a [`GenerationOperation`] for one attempt.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationRequest {
    pub job_id: DbId,
    /// Dispatch key the implementation switches on.
    pub kind: String,
    pub payload: serde_json::Value,
    pub target_id: Option<String>,
    /// 1-based attempt number.
    pub attempt: i32,
}

/// Why an attempt produced no result.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GenerationError {
    /// The collaborator reported a failure.
    #[error("{0}")]
    Failed(String),

    /// The attempt exceeded the execution deadline.
    #[error("Generation timed out after {}s", .0.as_secs_f64())]
    TimedOut(Duration),

    /// The attempt ended abnormally (panic or abort).
    #[error("Generation aborted: {0}")]
    Aborted(String),
}

/// The long-running operation a worker invokes for each claimed job.
#[async_trait]
pub trait GenerationOperation: Send + Sync + 'static {
    async fn generate(
        &self,
        request: GenerationRequest,
    ) -> Result<serde_json::Value, GenerationError>;
}

//! Job entity models and DTOs for the generation job queue.

use easel_core::job_state::JobState;
use easel_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A row from the `jobs` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Job {
    pub id: DbId,
    pub kind: String,
    pub owner_id: String,
    pub target_id: Option<String>,
    #[sqlx(rename = "status_id", try_from = "i16")]
    pub state: JobState,
    pub priority: i32,
    pub payload: serde_json::Value,
    /// Set only when `state` is `Completed`.
    pub result: Option<serde_json::Value>,
    /// Set only when `state` is `Failed`.
    pub failure_reason: Option<String>,
    /// Message from the most recent failed attempt, kept across retries.
    pub last_error: Option<String>,
    pub attempt_count: i32,
    pub max_attempts: i32,
    /// Replica that holds (or last held) the claim.
    pub claimed_by: Option<String>,
    pub created_at: Timestamp,
    pub claimed_at: Option<Timestamp>,
    pub finished_at: Option<Timestamp>,
    pub next_eligible_at: Timestamp,
    pub updated_at: Timestamp,
}

/// DTO for submitting a new job.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitJob {
    pub kind: String,
    pub owner_id: String,
    pub target_id: Option<String>,
    pub payload: serde_json::Value,
    pub priority: Option<i32>,
    /// Falls back to the engine's configured default when absent.
    pub max_attempts: Option<i32>,
}

impl SubmitJob {
    /// Minimal submission with default priority and attempts.
    pub fn new(
        kind: impl Into<String>,
        owner_id: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            kind: kind.into(),
            owner_id: owner_id.into(),
            target_id: None,
            payload,
            priority: None,
            max_attempts: None,
        }
    }

    pub fn with_target(mut self, target_id: impl Into<String>) -> Self {
        self.target_id = Some(target_id.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

/// Pagination and filter for owner listings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobListQuery {
    /// Filter by state.
    pub state: Option<JobState>,
    /// Maximum number of results. Defaults to 50, capped at 100.
    pub limit: Option<i64>,
    /// Number of results to skip. Defaults to 0.
    pub offset: Option<i64>,
}

/// Outcome of a failed attempt recorded by `JobRepo::fail_and_reschedule`.
#[derive(Debug, Clone)]
pub struct FailOutcome {
    /// The job after the transition.
    pub job: Job,
    /// `true` if the job went back to `Queued`, `false` if it is now `Failed`.
    pub retried: bool,
}

/// Per-state job counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, FromRow, Serialize)]
pub struct JobStats {
    pub total: i64,
    pub queued: i64,
    pub claimed: i64,
    pub completed: i64,
    pub failed: i64,
    pub cancelled: i64,
}

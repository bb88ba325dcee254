//! Repository for the `jobs` table.
//!
//! Every state-mutating operation is a single conditional `UPDATE ...
//! WHERE status_id = <expected> RETURNING`, never a read followed by a
//! write. A miss is classified afterwards with a point lookup purely to
//! report the right error.

use std::time::Duration;

use easel_core::job_state::{JobState, Transition};
use easel_core::types::DbId;
use sqlx::PgPool;

use crate::error::StoreError;
use crate::models::job::{FailOutcome, Job, JobListQuery, JobStats, SubmitJob};

/// Column list for `jobs` queries.
const COLUMNS: &str = "\
    id, kind, owner_id, target_id, status_id, priority, \
    payload, result, failure_reason, last_error, \
    attempt_count, max_attempts, claimed_by, \
    created_at, claimed_at, finished_at, next_eligible_at, updated_at";

/// Maximum page size for job listing.
const MAX_LIMIT: i64 = 100;

/// Default page size for job listing.
const DEFAULT_LIMIT: i64 = 50;

/// Attempts granted when a submission does not specify any.
pub const DEFAULT_MAX_ATTEMPTS: i32 = 3;

/// Stored when a failure arrives without a usable message.
const UNKNOWN_FAILURE: &str = "Unknown failure";

/// Provides the durable queue operations for generation jobs.
pub struct JobRepo;

impl JobRepo {
    /// Insert a new `Queued` job, eligible immediately.
    pub async fn submit(pool: &PgPool, input: &SubmitJob) -> Result<Job, StoreError> {
        validate_submission(input)?;

        let query = format!(
            "INSERT INTO jobs \
                 (kind, owner_id, target_id, status_id, priority, payload, max_attempts) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING {COLUMNS}"
        );
        let job = sqlx::query_as::<_, Job>(&query)
            .bind(&input.kind)
            .bind(&input.owner_id)
            .bind(&input.target_id)
            .bind(JobState::Queued.id())
            .bind(input.priority.unwrap_or(0))
            .bind(&input.payload)
            .bind(input.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS))
            .fetch_one(pool)
            .await?;
        Ok(job)
    }

    /// Atomically claim the most urgent eligible job.
    ///
    /// Uses `SELECT FOR UPDATE SKIP LOCKED` inside the `UPDATE` so that
    /// concurrent callers (threads or replicas) never receive the same row.
    /// Increments `attempt_count` as part of the claim.
    pub async fn claim_next(pool: &PgPool, claimed_by: &str) -> Result<Option<Job>, StoreError> {
        let query = format!(
            "UPDATE jobs \
             SET status_id = $1, claimed_at = NOW(), claimed_by = $2, \
                 attempt_count = attempt_count + 1, updated_at = NOW() \
             WHERE status_id = $3 AND id = ( \
                 SELECT id FROM jobs \
                 WHERE status_id = $3 \
                   AND next_eligible_at <= NOW() \
                   AND attempt_count < max_attempts \
                 ORDER BY priority DESC, created_at ASC, id ASC \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {COLUMNS}"
        );
        let job = sqlx::query_as::<_, Job>(&query)
            .bind(JobState::Claimed.id())
            .bind(claimed_by)
            .bind(JobState::Queued.id())
            .fetch_optional(pool)
            .await?;
        Ok(job)
    }

    /// Mark a claimed job as completed with its result payload.
    ///
    /// `attempt` is the attempt number returned by the claim; a claim
    /// that has since been recovered and re-issued is rejected.
    pub async fn complete(
        pool: &PgPool,
        job_id: DbId,
        attempt: i32,
        result: &serde_json::Value,
    ) -> Result<Job, StoreError> {
        let query = format!(
            "UPDATE jobs \
             SET status_id = $3, result = $4, finished_at = NOW(), updated_at = NOW() \
             WHERE id = $1 AND attempt_count = $2 AND status_id = $5 \
             RETURNING {COLUMNS}"
        );
        let updated = sqlx::query_as::<_, Job>(&query)
            .bind(job_id)
            .bind(attempt)
            .bind(JobState::Completed.id())
            .bind(result)
            .bind(JobState::Claimed.id())
            .fetch_optional(pool)
            .await?;

        match updated {
            Some(job) => Ok(job),
            None => Err(Self::classify_miss(pool, job_id, Some(attempt), Transition::Complete).await),
        }
    }

    /// Record a failed attempt on a claimed job.
    ///
    /// With attempts remaining the job returns to `Queued` and becomes
    /// eligible again after `backoff`. Otherwise it becomes `Failed` with
    /// `reason` as its failure reason. Both branches are one statement.
    pub async fn fail_and_reschedule(
        pool: &PgPool,
        job_id: DbId,
        attempt: i32,
        reason: &str,
        backoff: Duration,
    ) -> Result<FailOutcome, StoreError> {
        let reason = if reason.trim().is_empty() {
            UNKNOWN_FAILURE
        } else {
            reason
        };

        let query = format!(
            "UPDATE jobs \
             SET status_id = CASE WHEN attempt_count < max_attempts THEN $3 ELSE $4 END, \
                 next_eligible_at = CASE WHEN attempt_count < max_attempts \
                     THEN NOW() + make_interval(secs => $6) \
                     ELSE next_eligible_at END, \
                 failure_reason = CASE WHEN attempt_count < max_attempts THEN NULL ELSE $5 END, \
                 finished_at = CASE WHEN attempt_count < max_attempts THEN NULL ELSE NOW() END, \
                 last_error = $5, \
                 updated_at = NOW() \
             WHERE id = $1 AND attempt_count = $2 AND status_id = $7 \
             RETURNING {COLUMNS}"
        );
        let updated = sqlx::query_as::<_, Job>(&query)
            .bind(job_id)
            .bind(attempt)
            .bind(JobState::Queued.id())
            .bind(JobState::Failed.id())
            .bind(reason)
            .bind(backoff.as_secs_f64())
            .bind(JobState::Claimed.id())
            .fetch_optional(pool)
            .await?;

        match updated {
            Some(job) => {
                let retried = job.state == JobState::Queued;
                Ok(FailOutcome { job, retried })
            }
            None => Err(Self::classify_miss(pool, job_id, Some(attempt), Transition::Retry).await),
        }
    }

    /// Cancel a queued or claimed job.
    ///
    /// A claimed job's running attempt is not interrupted; its eventual
    /// completion or failure write will be rejected instead.
    pub async fn cancel(pool: &PgPool, job_id: DbId) -> Result<Job, StoreError> {
        let query = format!(
            "UPDATE jobs \
             SET status_id = $2, finished_at = NOW(), updated_at = NOW() \
             WHERE id = $1 AND status_id IN ($3, $4) \
             RETURNING {COLUMNS}"
        );
        let updated = sqlx::query_as::<_, Job>(&query)
            .bind(job_id)
            .bind(JobState::Cancelled.id())
            .bind(JobState::Queued.id())
            .bind(JobState::Claimed.id())
            .fetch_optional(pool)
            .await?;

        match updated {
            Some(job) => Ok(job),
            None => Err(Self::classify_miss(pool, job_id, None, Transition::Cancel).await),
        }
    }

    /// Find a job by its ID.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Job>, StoreError> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE id = $1");
        let job = sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(job)
    }

    /// Fetch a job by its ID, failing with `NotFound` if absent.
    pub async fn get(pool: &PgPool, id: DbId) -> Result<Job, StoreError> {
        Self::find_by_id(pool, id)
            .await?
            .ok_or(StoreError::NotFound(id))
    }

    /// List an owner's jobs, newest first, with optional state filter.
    pub async fn list_by_owner(
        pool: &PgPool,
        owner_id: &str,
        params: &JobListQuery,
    ) -> Result<Vec<Job>, StoreError> {
        let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
        let offset = params.offset.unwrap_or(0).max(0);

        let (state_clause, limit_idx) = match params.state {
            Some(_) => ("AND status_id = $2", 3),
            None => ("", 2),
        };

        let query = format!(
            "SELECT {COLUMNS} FROM jobs \
             WHERE owner_id = $1 {state_clause} \
             ORDER BY created_at DESC, id DESC \
             LIMIT ${limit_idx} OFFSET ${}",
            limit_idx + 1,
        );

        let mut q = sqlx::query_as::<_, Job>(&query).bind(owner_id);
        if let Some(state) = params.state {
            q = q.bind(state.id());
        }
        let jobs = q.bind(limit).bind(offset).fetch_all(pool).await?;
        Ok(jobs)
    }

    /// Delete terminal jobs that finished more than `retention` ago.
    ///
    /// Returns the number of rows deleted. Queued and claimed jobs are
    /// never touched.
    pub async fn purge_older_than(pool: &PgPool, retention: Duration) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "DELETE FROM jobs \
             WHERE status_id IN ($1, $2, $3) \
               AND finished_at < NOW() - make_interval(secs => $4)",
        )
        .bind(JobState::Completed.id())
        .bind(JobState::Failed.id())
        .bind(JobState::Cancelled.id())
        .bind(retention.as_secs_f64())
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Claimed jobs whose claim is older than `timeout`, oldest first.
    pub async fn list_stale_claims(
        pool: &PgPool,
        timeout: Duration,
        limit: i64,
    ) -> Result<Vec<Job>, StoreError> {
        let query = format!(
            "SELECT {COLUMNS} FROM jobs \
             WHERE status_id = $1 \
               AND claimed_at < NOW() - make_interval(secs => $2) \
             ORDER BY claimed_at ASC \
             LIMIT $3"
        );
        let jobs = sqlx::query_as::<_, Job>(&query)
            .bind(JobState::Claimed.id())
            .bind(timeout.as_secs_f64())
            .bind(limit)
            .fetch_all(pool)
            .await?;
        Ok(jobs)
    }

    /// Aggregate per-state counts.
    pub async fn stats(pool: &PgPool) -> Result<JobStats, StoreError> {
        let stats = sqlx::query_as::<_, JobStats>(
            "SELECT \
                 COUNT(*) AS total, \
                 COUNT(*) FILTER (WHERE status_id = $1) AS queued, \
                 COUNT(*) FILTER (WHERE status_id = $2) AS claimed, \
                 COUNT(*) FILTER (WHERE status_id = $3) AS completed, \
                 COUNT(*) FILTER (WHERE status_id = $4) AS failed, \
                 COUNT(*) FILTER (WHERE status_id = $5) AS cancelled \
             FROM jobs",
        )
        .bind(JobState::Queued.id())
        .bind(JobState::Claimed.id())
        .bind(JobState::Completed.id())
        .bind(JobState::Failed.id())
        .bind(JobState::Cancelled.id())
        .fetch_one(pool)
        .await?;
        Ok(stats)
    }

    /// Explain why a conditional update matched no row.
    async fn classify_miss(
        pool: &PgPool,
        job_id: DbId,
        attempt: Option<i32>,
        transition: Transition,
    ) -> StoreError {
        let job = match Self::find_by_id(pool, job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => return StoreError::NotFound(job_id),
            Err(e) => return e,
        };

        tracing::debug!(
            job_id,
            action = transition.action(),
            state = %job.state,
            attempt_count = job.attempt_count,
            "Conditional job update matched no row",
        );

        match attempt {
            Some(attempt) if job.state == JobState::Claimed && job.attempt_count != attempt => {
                StoreError::ClaimSuperseded {
                    id: job_id,
                    attempt,
                    current: job.attempt_count,
                }
            }
            _ => StoreError::InvalidTransition {
                id: job_id,
                action: transition.action(),
                from: job.state,
            },
        }
    }
}

/// Reject submissions the table constraints would refuse anyway, with a
/// readable message.
fn validate_submission(input: &SubmitJob) -> Result<(), StoreError> {
    if input.kind.trim().is_empty() {
        return Err(StoreError::Validation("Job kind must not be empty".to_string()));
    }
    if input.owner_id.trim().is_empty() {
        return Err(StoreError::Validation(
            "Job owner must not be empty".to_string(),
        ));
    }
    if let Some(max) = input.max_attempts {
        if max < 1 {
            return Err(StoreError::Validation(format!(
                "max_attempts must be at least 1, got {max}"
            )));
        }
    }
    Ok(())
}

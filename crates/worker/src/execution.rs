//! One in-flight attempt of a claimed job.
//!
//! Runs the generation collaborator under a deadline, writes the outcome
//! back through the fenced store operations, then notifies. Every path
//! ends in a store write or a logged hand-off to the stale-claim sweep,
//! so an attempt never leaves its job `Claimed` on purpose.

use std::sync::Arc;
use std::time::{Duration, Instant};

use easel_core::generation::{GenerationError, GenerationOperation, GenerationRequest};
use easel_core::job_state::JobState;
use easel_core::retry::RetryPolicy;
use easel_db::models::job::{FailOutcome, Job};
use easel_db::repositories::JobRepo;
use easel_db::StoreError;
use easel_events::JobNotifier;
use sqlx::PgPool;
use tokio::task::JoinError;

use crate::backoff::{retry_store_call, StoreBackoff};

/// How an attempt ended, from the engine's point of view.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Completed,
    /// Failed with attempts left; eligible again after the delay.
    RetryScheduled(Duration),
    /// Failed with no attempts left.
    Failed,
    /// The job was cancelled while the attempt ran; the outcome was dropped.
    Cancelled,
    /// The claim was recovered by the sweeper before the outcome landed.
    Superseded,
    /// The outcome could not be stored; the sweeper will recover the claim.
    Abandoned,
}

/// Executes claimed jobs. Shared by all in-flight attempts of a replica.
pub struct WorkerExecution {
    pool: PgPool,
    generation: Arc<dyn GenerationOperation>,
    notifier: Arc<dyn JobNotifier>,
    retry: Arc<dyn RetryPolicy>,
    timeout: Duration,
    store_backoff: StoreBackoff,
}

impl WorkerExecution {
    pub fn new(
        pool: PgPool,
        generation: Arc<dyn GenerationOperation>,
        notifier: Arc<dyn JobNotifier>,
        retry: Arc<dyn RetryPolicy>,
        timeout: Duration,
        store_backoff: StoreBackoff,
    ) -> Self {
        Self {
            pool,
            generation,
            notifier,
            retry,
            timeout,
            store_backoff,
        }
    }

    /// Run one attempt of a job previously returned by `JobRepo::claim_next`.
    pub async fn execute(&self, job: Job) -> ExecutionOutcome {
        let started = Instant::now();
        tracing::info!(
            job_id = job.id,
            kind = %job.kind,
            attempt = job.attempt_count,
            max_attempts = job.max_attempts,
            "Job execution started",
        );

        let outcome = match self.run_generation(&job).await {
            Ok(result) => self.record_success(&job, result).await,
            Err(e) => self.record_failure(&job, &e).await,
        };

        tracing::debug!(
            job_id = job.id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            outcome = ?outcome,
            "Job execution finished",
        );
        outcome
    }

    /// Invoke the collaborator in its own task so that a panic or a hang
    /// is contained and reported as a failed attempt.
    async fn run_generation(&self, job: &Job) -> Result<serde_json::Value, GenerationError> {
        let request = GenerationRequest {
            job_id: job.id,
            kind: job.kind.clone(),
            payload: job.payload.clone(),
            target_id: job.target_id.clone(),
            attempt: job.attempt_count,
        };
        let generation = Arc::clone(&self.generation);
        let mut handle = tokio::spawn(async move { generation.generate(request).await });

        match tokio::time::timeout(self.timeout, &mut handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(GenerationError::Aborted(describe_join_error(join_err))),
            Err(_) => {
                handle.abort();
                Err(GenerationError::TimedOut(self.timeout))
            }
        }
    }

    async fn record_success(&self, job: &Job, result: serde_json::Value) -> ExecutionOutcome {
        let pool = &self.pool;
        let result = &result;
        let (id, attempt) = (job.id, job.attempt_count);

        let write = retry_store_call("complete", &self.store_backoff, move || {
            JobRepo::complete(pool, id, attempt, result)
        })
        .await;

        match write {
            Ok(done) => {
                tracing::info!(job_id = done.id, attempt, "Job completed");
                self.notifier.on_completed(&done);
                ExecutionOutcome::Completed
            }
            Err(e) => self.handle_write_error(job, e),
        }
    }

    async fn record_failure(&self, job: &Job, error: &GenerationError) -> ExecutionOutcome {
        let attempts = u32::try_from(job.attempt_count).unwrap_or(0);
        let max_attempts = u32::try_from(job.max_attempts).unwrap_or(0);
        let delay = if self.retry.should_give_up(attempts, max_attempts) {
            Duration::ZERO
        } else {
            self.retry.next_delay(attempts)
        };

        let pool = &self.pool;
        let reason = error.to_string();
        let reason = reason.as_str();
        let (id, attempt) = (job.id, job.attempt_count);

        let write = retry_store_call("fail_and_reschedule", &self.store_backoff, move || {
            JobRepo::fail_and_reschedule(pool, id, attempt, reason, delay)
        })
        .await;

        match write {
            Ok(FailOutcome { job: updated, retried: true }) => {
                tracing::warn!(
                    job_id = id,
                    attempt,
                    retry_in_ms = delay.as_millis() as u64,
                    error = %error,
                    "Job attempt failed, retry scheduled",
                );
                self.notifier.on_retry_scheduled(&updated, delay);
                ExecutionOutcome::RetryScheduled(delay)
            }
            Ok(FailOutcome { job: updated, retried: false }) => {
                tracing::error!(
                    job_id = id,
                    attempt,
                    error = %error,
                    "Job failed permanently",
                );
                self.notifier.on_failed(&updated);
                ExecutionOutcome::Failed
            }
            Err(e) => self.handle_write_error(job, e),
        }
    }

    /// A rejected outcome write. Losing to cancellation or recovery is
    /// expected and swallowed; anything else leaves the claim for the sweeper.
    fn handle_write_error(&self, job: &Job, error: StoreError) -> ExecutionOutcome {
        match error {
            StoreError::InvalidTransition {
                from: JobState::Cancelled,
                ..
            } => {
                tracing::info!(
                    job_id = job.id,
                    attempt = job.attempt_count,
                    "Job was cancelled during execution, outcome discarded",
                );
                ExecutionOutcome::Cancelled
            }
            e if e.is_lost_claim() => {
                tracing::warn!(
                    job_id = job.id,
                    attempt = job.attempt_count,
                    error = %e,
                    "Claim lost before outcome was stored, outcome discarded",
                );
                ExecutionOutcome::Superseded
            }
            e => {
                tracing::error!(
                    job_id = job.id,
                    attempt = job.attempt_count,
                    error = %e,
                    "Failed to store job outcome, leaving claim for stale-claim recovery",
                );
                ExecutionOutcome::Abandoned
            }
        }
    }
}

fn describe_join_error(err: JoinError) -> String {
    if err.is_panic() {
        let panic = err.into_panic();
        let message = panic
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        format!("generation task panicked: {message}")
    } else {
        "generation task was cancelled".to_string()
    }
}

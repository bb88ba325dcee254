//! Periodic maintenance: stale-claim recovery and retention purge.
//!
//! A claim whose replica died (or whose outcome write never landed) stays
//! `Claimed` forever unless something treats it as a failed attempt. The
//! sweeper does that for claims older than the stale-claim timeout, and
//! separately deletes terminal jobs past the retention window.

use std::sync::Arc;
use std::time::Duration;

use easel_core::retry::RetryPolicy;
use easel_db::models::job::FailOutcome;
use easel_db::repositories::JobRepo;
use easel_db::StoreError;
use easel_events::JobNotifier;
use sqlx::PgPool;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Stale claims handled per sweep.
const RECOVERY_BATCH: i64 = 100;

/// Result of one stale-claim sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Claims returned to `Queued` with a retry scheduled.
    pub requeued: usize,
    /// Claims that had no attempts left and became `Failed`.
    pub failed: usize,
    /// Claims resolved by someone else between listing and writing.
    pub skipped: usize,
    /// Claims whose recovery write was rejected. Retried next sweep.
    pub errors: usize,
}

pub struct MaintenanceSweeper {
    pool: PgPool,
    notifier: Arc<dyn JobNotifier>,
    retry: Arc<dyn RetryPolicy>,
    stale_timeout: Duration,
    stale_interval: Duration,
    retention: Duration,
    purge_interval: Duration,
}

impl MaintenanceSweeper {
    pub fn new(
        pool: PgPool,
        notifier: Arc<dyn JobNotifier>,
        retry: Arc<dyn RetryPolicy>,
        stale_timeout: Duration,
        stale_interval: Duration,
        retention: Duration,
        purge_interval: Duration,
    ) -> Self {
        Self {
            pool,
            notifier,
            retry,
            stale_timeout,
            stale_interval,
            retention,
            purge_interval,
        }
    }

    /// Run both maintenance loops until `cancel` is triggered.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(
            stale_timeout_secs = self.stale_timeout.as_secs(),
            stale_interval_secs = self.stale_interval.as_secs(),
            retention_hours = self.retention.as_secs() / 3600,
            purge_interval_secs = self.purge_interval.as_secs(),
            "Maintenance sweeper started",
        );

        let mut stale_tick = tokio::time::interval(self.stale_interval);
        stale_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut purge_tick = tokio::time::interval(self.purge_interval);
        purge_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Maintenance sweeper stopping");
                    break;
                }
                _ = stale_tick.tick() => {
                    if let Err(e) = self.recover_stale_once().await {
                        tracing::error!(error = %e, "Stale-claim recovery failed");
                    }
                }
                _ = purge_tick.tick() => {
                    if let Err(e) = self.purge_once().await {
                        tracing::error!(error = %e, "Retention purge failed");
                    }
                }
            }
        }
    }

    /// Delete terminal jobs older than the retention window.
    pub async fn purge_once(&self) -> Result<u64, StoreError> {
        let deleted = JobRepo::purge_older_than(&self.pool, self.retention).await?;
        if deleted > 0 {
            tracing::info!(deleted, "Retention purge: deleted old terminal jobs");
        } else {
            tracing::debug!("Retention purge: nothing to delete");
        }
        Ok(deleted)
    }

    /// Treat every expired claim as a failed attempt.
    ///
    /// Each write is fenced on the attempt number that was listed, so a
    /// worker that finishes concurrently wins and the claim is skipped.
    pub async fn recover_stale_once(&self) -> Result<RecoveryReport, StoreError> {
        let stale =
            JobRepo::list_stale_claims(&self.pool, self.stale_timeout, RECOVERY_BATCH).await?;
        let mut report = RecoveryReport::default();
        if stale.is_empty() {
            return Ok(report);
        }

        let reason = format!(
            "Claim expired after {}s without completion",
            self.stale_timeout.as_secs()
        );

        for job in stale {
            let attempts = u32::try_from(job.attempt_count).unwrap_or(0);
            let max_attempts = u32::try_from(job.max_attempts).unwrap_or(0);
            let delay = if self.retry.should_give_up(attempts, max_attempts) {
                Duration::ZERO
            } else {
                self.retry.next_delay(attempts)
            };

            match JobRepo::fail_and_reschedule(&self.pool, job.id, job.attempt_count, &reason, delay)
                .await
            {
                Ok(FailOutcome { job: updated, retried: true }) => {
                    tracing::warn!(
                        job_id = updated.id,
                        claimed_by = job.claimed_by.as_deref().unwrap_or("unknown"),
                        attempt = job.attempt_count,
                        retry_in_ms = delay.as_millis() as u64,
                        "Stale claim recovered, job re-queued",
                    );
                    self.notifier.on_retry_scheduled(&updated, delay);
                    report.requeued += 1;
                }
                Ok(FailOutcome { job: updated, retried: false }) => {
                    tracing::error!(
                        job_id = updated.id,
                        claimed_by = job.claimed_by.as_deref().unwrap_or("unknown"),
                        attempt = job.attempt_count,
                        "Stale claim recovered, no attempts left, job failed",
                    );
                    self.notifier.on_failed(&updated);
                    report.failed += 1;
                }
                Err(e) if e.is_lost_claim() || matches!(e, StoreError::NotFound(_)) => {
                    tracing::debug!(job_id = job.id, error = %e, "Stale claim already resolved");
                    report.skipped += 1;
                }
                Err(e) if e.is_transient() => return Err(e),
                Err(e) => {
                    tracing::error!(
                        job_id = job.id,
                        attempt = job.attempt_count,
                        error = %e,
                        "Stale claim could not be recovered",
                    );
                    report.errors += 1;
                }
            }
        }

        tracing::info!(
            requeued = report.requeued,
            failed = report.failed,
            skipped = report.skipped,
            errors = report.errors,
            "Stale-claim recovery pass finished",
        );
        Ok(report)
    }
}

//! Background job dispatcher.
//!
//! Polls for eligible jobs every `poll_interval` and hands each claimed
//! job to a [`WorkerExecution`] running in its own task. Uses
//! `SELECT FOR UPDATE SKIP LOCKED` via [`JobRepo::claim_next`], so any
//! number of replicas may poll the same table.
//!
//! The in-flight count is an in-process semaphore: a permit is taken
//! before claiming and released when the execution finishes, which caps
//! this replica at `concurrency` running jobs without counting rows.

use std::sync::Arc;
use std::time::Duration;

use easel_db::models::job::Job;
use easel_db::repositories::JobRepo;
use easel_db::StoreError;
use sqlx::PgPool;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::backoff::{next_delay, StoreBackoff};
use crate::execution::WorkerExecution;

/// Single coordinating loop of a replica.
pub struct JobDispatcher {
    pool: PgPool,
    execution: Arc<WorkerExecution>,
    replica_id: String,
    concurrency: usize,
    slots: Arc<Semaphore>,
    poll_interval: Duration,
    error_backoff: StoreBackoff,
    /// Signalled when an execution frees a slot.
    slot_freed: Arc<Notify>,
    tracker: TaskTracker,
}

impl JobDispatcher {
    pub fn new(
        pool: PgPool,
        execution: Arc<WorkerExecution>,
        replica_id: impl Into<String>,
        concurrency: usize,
        poll_interval: Duration,
        error_backoff: StoreBackoff,
    ) -> Self {
        Self {
            pool,
            execution,
            replica_id: replica_id.into(),
            concurrency,
            slots: Arc::new(Semaphore::new(concurrency)),
            poll_interval,
            error_backoff,
            slot_freed: Arc::new(Notify::new()),
            tracker: TaskTracker::new(),
        }
    }

    /// Executions currently running in this replica.
    pub fn in_flight(&self) -> usize {
        self.concurrency.saturating_sub(self.slots.available_permits())
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Tracker of spawned executions; closed when [`run`](Self::run) returns.
    pub fn tracker(&self) -> TaskTracker {
        self.tracker.clone()
    }

    /// Run the dispatcher loop until the cancellation token is triggered.
    ///
    /// Store failures never end the loop: they are logged and the next
    /// cycle is delayed with exponential backoff.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut error_delay: Option<Duration> = None;

        tracing::info!(
            replica_id = %self.replica_id,
            concurrency = self.concurrency,
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Job dispatcher started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
                _ = self.slot_freed.notified() => {}
            }

            match self.dispatch_ready().await {
                Ok(dispatched) => {
                    if error_delay.take().is_some() {
                        tracing::info!("Job store reachable again, dispatch resumed");
                    }
                    if dispatched > 0 {
                        tracing::debug!(
                            dispatched,
                            in_flight = self.in_flight(),
                            "Dispatch cycle claimed jobs",
                        );
                    }
                }
                Err(e) => {
                    let delay = match error_delay {
                        Some(previous) => next_delay(previous, &self.error_backoff),
                        None => self.error_backoff.initial_delay,
                    };
                    error_delay = Some(delay);
                    tracing::error!(
                        error = %e,
                        retry_in_ms = delay.as_millis() as u64,
                        "Dispatch cycle failed, backing off",
                    );

                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        self.tracker.close();
        tracing::info!(
            in_flight = self.in_flight(),
            "Job dispatcher shutting down",
        );
    }

    /// One dispatch cycle: claim jobs until every slot is busy or no job
    /// is eligible. Returns the number of jobs handed to executions.
    pub async fn dispatch_ready(&self) -> Result<usize, StoreError> {
        let mut dispatched = 0;

        loop {
            let Ok(permit) = Arc::clone(&self.slots).try_acquire_owned() else {
                break;
            };
            let Some(job) = JobRepo::claim_next(&self.pool, &self.replica_id).await? else {
                break;
            };

            tracing::info!(
                job_id = job.id,
                kind = %job.kind,
                priority = job.priority,
                attempt = job.attempt_count,
                "Job claimed",
            );
            self.spawn_execution(job, permit);
            dispatched += 1;
        }

        Ok(dispatched)
    }

    fn spawn_execution(&self, job: Job, permit: OwnedSemaphorePermit) {
        let execution = Arc::clone(&self.execution);
        let slot_freed = Arc::clone(&self.slot_freed);

        self.tracker.spawn(async move {
            let outcome = execution.execute(job).await;
            drop(permit);
            slot_freed.notify_one();
            outcome
        });
    }
}

//! The job engine: inbound job API plus the background services of one
//! replica.
//!
//! [`JobEngine`] is what a request-handling layer holds. Calling
//! [`JobEngine::start`] spawns the dispatcher and the maintenance sweeper;
//! the returned [`EngineHandle`] stops them and drains in-flight
//! executions.

use std::sync::Arc;
use std::time::Duration;

use easel_core::generation::GenerationOperation;
use easel_core::retry::RetryPolicy;
use easel_core::types::DbId;
use easel_db::models::job::{Job, JobListQuery, JobStats, SubmitJob};
use easel_db::repositories::JobRepo;
use easel_db::StoreError;
use easel_events::JobNotifier;
use serde::Serialize;
use sqlx::PgPool;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::EngineConfig;
use crate::dispatcher::JobDispatcher;
use crate::execution::WorkerExecution;
use crate::sweeper::MaintenanceSweeper;

/// Table-wide counts plus this replica's live load.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub jobs: JobStats,
    pub in_flight: usize,
    pub concurrency: usize,
}

pub struct JobEngine {
    pool: PgPool,
    config: EngineConfig,
    notifier: Arc<dyn JobNotifier>,
    dispatcher: Arc<JobDispatcher>,
    sweeper: Arc<MaintenanceSweeper>,
}

impl JobEngine {
    /// Build an engine that retries with the configured exponential curve.
    pub fn new(
        pool: PgPool,
        config: EngineConfig,
        generation: Arc<dyn GenerationOperation>,
        notifier: Arc<dyn JobNotifier>,
    ) -> Self {
        let retry: Arc<dyn RetryPolicy> = Arc::new(config.retry.clone());
        Self::with_retry_policy(pool, config, generation, notifier, retry)
    }

    pub fn with_retry_policy(
        pool: PgPool,
        config: EngineConfig,
        generation: Arc<dyn GenerationOperation>,
        notifier: Arc<dyn JobNotifier>,
        retry: Arc<dyn RetryPolicy>,
    ) -> Self {
        let execution = Arc::new(WorkerExecution::new(
            pool.clone(),
            generation,
            Arc::clone(&notifier),
            Arc::clone(&retry),
            config.generation_timeout,
            config.store_backoff.clone(),
        ));
        let dispatcher = Arc::new(JobDispatcher::new(
            pool.clone(),
            execution,
            config.replica_id.clone(),
            config.concurrency,
            config.poll_interval,
            config.store_backoff.clone(),
        ));
        let sweeper = Arc::new(MaintenanceSweeper::new(
            pool.clone(),
            Arc::clone(&notifier),
            retry,
            config.stale_claim_timeout,
            config.stale_sweep_interval,
            config.retention,
            config.purge_interval,
        ));

        Self {
            pool,
            config,
            notifier,
            dispatcher,
            sweeper,
        }
    }

    /// Queue a new job. `max_attempts` falls back to the configured default.
    pub async fn submit(&self, mut input: SubmitJob) -> Result<DbId, StoreError> {
        input
            .max_attempts
            .get_or_insert(self.config.default_max_attempts);
        let job = JobRepo::submit(&self.pool, &input).await?;
        tracing::info!(
            job_id = job.id,
            kind = %job.kind,
            owner_id = %job.owner_id,
            priority = job.priority,
            "Job submitted",
        );
        Ok(job.id)
    }

    pub async fn get(&self, id: DbId) -> Result<Job, StoreError> {
        JobRepo::get(&self.pool, id).await
    }

    pub async fn list_by_owner(
        &self,
        owner_id: &str,
        params: &JobListQuery,
    ) -> Result<Vec<Job>, StoreError> {
        JobRepo::list_by_owner(&self.pool, owner_id, params).await
    }

    /// Cancel a queued or claimed job and notify subscribers.
    ///
    /// A running attempt keeps running; its outcome is discarded when it
    /// tries to write back.
    pub async fn cancel(&self, id: DbId) -> Result<Job, StoreError> {
        let job = JobRepo::cancel(&self.pool, id).await?;
        tracing::info!(
            job_id = job.id,
            attempt = job.attempt_count,
            was_claimed = job.claimed_at.is_some(),
            "Job cancelled",
        );
        self.notifier.on_cancelled(&job);
        Ok(job)
    }

    pub async fn stats(&self) -> Result<EngineStats, StoreError> {
        let jobs = JobRepo::stats(&self.pool).await?;
        Ok(EngineStats {
            jobs,
            in_flight: self.dispatcher.in_flight(),
            concurrency: self.dispatcher.concurrency(),
        })
    }

    pub fn sweeper(&self) -> &Arc<MaintenanceSweeper> {
        &self.sweeper
    }

    /// Spawn the dispatcher and sweeper loops.
    pub fn start(&self) -> EngineHandle {
        let cancel = CancellationToken::new();

        let dispatcher = Arc::clone(&self.dispatcher);
        let dispatcher_cancel = cancel.clone();
        let dispatcher_task = tokio::spawn(async move {
            dispatcher.run(dispatcher_cancel).await;
        });

        let sweeper = Arc::clone(&self.sweeper);
        let sweeper_cancel = cancel.clone();
        let sweeper_task = tokio::spawn(async move {
            sweeper.run(sweeper_cancel).await;
        });

        tracing::info!(replica_id = %self.config.replica_id, "Job engine started");

        EngineHandle {
            cancel,
            dispatcher_task,
            sweeper_task,
            executions: self.dispatcher.tracker(),
            shutdown_timeout: self.config.shutdown_timeout,
        }
    }
}

/// Running background services of a [`JobEngine`].
pub struct EngineHandle {
    cancel: CancellationToken,
    dispatcher_task: JoinHandle<()>,
    sweeper_task: JoinHandle<()>,
    executions: TaskTracker,
    shutdown_timeout: Duration,
}

impl EngineHandle {
    /// Stop claiming, stop maintenance, and wait for in-flight executions.
    ///
    /// Returns `false` when executions were still running after the
    /// shutdown timeout. Their claims are left for stale-claim recovery.
    pub async fn shutdown(self) -> bool {
        self.cancel.cancel();

        if let Err(e) = self.dispatcher_task.await {
            tracing::error!(error = %e, "Dispatcher task ended abnormally");
        }
        if let Err(e) = self.sweeper_task.await {
            tracing::error!(error = %e, "Sweeper task ended abnormally");
        }

        self.executions.close();
        let remaining = self.executions.len();
        tracing::info!(remaining, "Waiting for in-flight executions");

        match tokio::time::timeout(self.shutdown_timeout, self.executions.wait()).await {
            Ok(()) => {
                tracing::info!("Job engine stopped");
                true
            }
            Err(_) => {
                tracing::warn!(
                    remaining = self.executions.len(),
                    timeout_secs = self.shutdown_timeout.as_secs(),
                    "Shutdown timeout elapsed with executions still running",
                );
                false
            }
        }
    }
}

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use easel_core::generation::{GenerationError, GenerationOperation, GenerationRequest};
use easel_core::job_state::JobState;
use easel_core::retry::ExponentialBackoff;
use easel_core::types::DbId;
use easel_db::models::job::{Job, SubmitJob};
use easel_db::repositories::JobRepo;
use easel_events::JobNotifier;
use easel_worker::backoff::StoreBackoff;
use easel_worker::{EngineConfig, WorkerExecution};
use serde_json::json;
use sqlx::PgPool;

pub const REPLICA: &str = "test-replica";

/// Build an `EngineConfig` with millisecond-scale timings.
///
/// The stale sweep and purge run once at startup and then hourly, so
/// they stay out of the way unless a test calls the sweeper directly.
pub fn test_config(concurrency: usize) -> EngineConfig {
    EngineConfig {
        replica_id: REPLICA.to_string(),
        concurrency,
        poll_interval: Duration::from_millis(20),
        default_max_attempts: 3,
        retry: ExponentialBackoff::new(2.0, Duration::from_millis(1), Duration::from_millis(10))
            .unwrap(),
        generation_timeout: Duration::from_secs(2),
        stale_claim_timeout: Duration::from_secs(60),
        stale_sweep_interval: Duration::from_secs(3600),
        retention: Duration::from_secs(7 * 24 * 3600),
        purge_interval: Duration::from_secs(3600),
        shutdown_timeout: Duration::from_secs(5),
        store_backoff: fast_store_backoff(),
        db_max_connections: 5,
    }
}

pub fn fast_store_backoff() -> StoreBackoff {
    StoreBackoff {
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(40),
        multiplier: 2.0,
        max_attempts: 2,
    }
}

pub fn new_job(owner: &str) -> SubmitJob {
    SubmitJob::new("canvas.generate", owner, json!({"prompt": "a blue circle"}))
        .with_target("canvas-9")
}

pub async fn submit(pool: &PgPool, input: SubmitJob) -> Job {
    JobRepo::submit(pool, &input).await.unwrap()
}

/// Make a re-queued job eligible right away.
pub async fn make_eligible(pool: &PgPool, id: DbId) {
    sqlx::query("UPDATE jobs SET next_eligible_at = NOW() WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await
        .unwrap();
}

/// Move a claim's timestamps into the past, keeping their order.
pub async fn age_claim(pool: &PgPool, id: DbId, by: Duration) {
    sqlx::query(
        "UPDATE jobs SET \
             created_at = created_at - make_interval(secs => $2), \
             claimed_at = claimed_at - make_interval(secs => $2) \
         WHERE id = $1",
    )
    .bind(id)
    .bind(by.as_secs_f64())
    .execute(pool)
    .await
    .unwrap();
}

/// Shift every timestamp of a job into the past, keeping their order.
pub async fn backdate(pool: &PgPool, id: DbId, by: Duration) {
    sqlx::query(
        "UPDATE jobs SET \
             created_at = created_at - make_interval(secs => $2), \
             claimed_at = claimed_at - make_interval(secs => $2), \
             finished_at = finished_at - make_interval(secs => $2), \
             next_eligible_at = next_eligible_at - make_interval(secs => $2) \
         WHERE id = $1",
    )
    .bind(id)
    .bind(by.as_secs_f64())
    .execute(pool)
    .await
    .unwrap();
}

/// A `WorkerExecution` over the given collaborators.
pub fn execution(
    pool: &PgPool,
    generation: Arc<ScriptedGeneration>,
    notifier: Arc<RecordingNotifier>,
    retry: ExponentialBackoff,
    timeout: Duration,
) -> WorkerExecution {
    WorkerExecution::new(
        pool.clone(),
        generation,
        notifier,
        Arc::new(retry),
        timeout,
        fast_store_backoff(),
    )
}

/// Poll until the job is terminal, failing the test after `timeout`.
pub async fn wait_for_terminal(pool: &PgPool, id: DbId, timeout: Duration) -> Job {
    wait_for_state(pool, id, timeout, JobState::is_terminal).await
}

pub async fn wait_for_state(
    pool: &PgPool,
    id: DbId,
    timeout: Duration,
    done: impl Fn(JobState) -> bool,
) -> Job {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let job = JobRepo::get(pool, id).await.unwrap();
        if done(job.state) {
            return job;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "job {id} still {} after {timeout:?}",
            job.state
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

// ---------------------------------------------------------------------------
// Scripted generation
// ---------------------------------------------------------------------------

/// What one generation call does.
#[derive(Debug, Clone, Copy)]
pub enum Step {
    Succeed,
    Fail(&'static str),
    Panic,
    Hang,
    /// Sleep, then succeed.
    Delay(Duration),
}

/// Plays back a fixed sequence of steps, then repeats `fallback`.
pub struct ScriptedGeneration {
    script: Mutex<VecDeque<Step>>,
    fallback: Step,
    calls: AtomicUsize,
}

impl ScriptedGeneration {
    pub fn new(script: impl IntoIterator<Item = Step>, fallback: Step) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into_iter().collect()),
            fallback,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn always(step: Step) -> Arc<Self> {
        Self::new([], step)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerationOperation for ScriptedGeneration {
    async fn generate(
        &self,
        request: GenerationRequest,
    ) -> Result<serde_json::Value, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.fallback);

        match step {
            Step::Succeed => Ok(json!({"job_id": request.job_id, "attempt": request.attempt})),
            Step::Fail(reason) => Err(GenerationError::Failed(reason.to_string())),
            Step::Panic => panic!("scripted generation panic"),
            Step::Hang => std::future::pending().await,
            Step::Delay(d) => {
                tokio::time::sleep(d).await;
                Ok(json!({"job_id": request.job_id, "attempt": request.attempt}))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Recording notifier
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Completed(DbId),
    Failed(DbId, String),
    RetryScheduled(DbId, Duration),
    Cancelled(DbId),
}

#[derive(Default)]
pub struct RecordingNotifier {
    seen: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Notification> {
        self.seen.lock().unwrap().clone()
    }

    pub fn events_for(&self, id: DbId) -> Vec<Notification> {
        self.events()
            .into_iter()
            .filter(|n| match n {
                Notification::Completed(j)
                | Notification::Failed(j, _)
                | Notification::RetryScheduled(j, _)
                | Notification::Cancelled(j) => *j == id,
            })
            .collect()
    }

    fn push(&self, notification: Notification) {
        self.seen.lock().unwrap().push(notification);
    }
}

impl JobNotifier for RecordingNotifier {
    fn on_completed(&self, job: &Job) {
        self.push(Notification::Completed(job.id));
    }

    fn on_failed(&self, job: &Job) {
        self.push(Notification::Failed(
            job.id,
            job.failure_reason.clone().unwrap_or_default(),
        ));
    }

    fn on_retry_scheduled(&self, job: &Job, delay: Duration) {
        self.push(Notification::RetryScheduled(job.id, delay));
    }

    fn on_cancelled(&self, job: &Job) {
        self.push(Notification::Cancelled(job.id));
    }
}

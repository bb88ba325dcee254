//! Integration tests for the `JobEngine` inbound API and its lifecycle.

mod common;

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use easel_core::job_state::JobState;
use easel_db::models::job::JobListQuery;
use easel_db::StoreError;
use easel_worker::JobEngine;
use sqlx::PgPool;

use common::{
    new_job, test_config, wait_for_state, wait_for_terminal, Notification, RecordingNotifier,
    ScriptedGeneration, Step,
};

const WAIT: Duration = Duration::from_secs(10);

fn build_engine(pool: &PgPool, concurrency: usize, step: Step) -> (JobEngine, Arc<RecordingNotifier>) {
    let notifier = RecordingNotifier::new();
    let engine = JobEngine::new(
        pool.clone(),
        test_config(concurrency),
        ScriptedGeneration::always(step),
        notifier.clone(),
    );
    (engine, notifier)
}

// ---------------------------------------------------------------------------
// Inbound API
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn submit_applies_default_max_attempts(pool: PgPool) {
    let mut config = test_config(1);
    config.default_max_attempts = 5;
    let engine = JobEngine::new(
        pool.clone(),
        config,
        ScriptedGeneration::always(Step::Succeed),
        RecordingNotifier::new(),
    );

    let defaulted = engine.submit(new_job("user-1")).await.unwrap();
    let explicit = engine
        .submit(new_job("user-1").with_max_attempts(2))
        .await
        .unwrap();

    let defaulted = engine.get(defaulted).await.unwrap();
    assert_eq!(defaulted.max_attempts, 5);
    assert_eq!(defaulted.state, JobState::Queued);
    assert_eq!(defaulted.attempt_count, 0);
    assert_eq!(engine.get(explicit).await.unwrap().max_attempts, 2);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn get_unknown_job_is_not_found(pool: PgPool) {
    let (engine, _) = build_engine(&pool, 1, Step::Succeed);
    assert_matches!(engine.get(9999).await, Err(StoreError::NotFound(9999)));
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn list_by_owner_returns_only_that_owner_newest_first(pool: PgPool) {
    let (engine, _) = build_engine(&pool, 1, Step::Succeed);
    let a1 = engine.submit(new_job("alice")).await.unwrap();
    let a2 = engine.submit(new_job("alice")).await.unwrap();
    engine.submit(new_job("bob")).await.unwrap();
    let a3 = engine.submit(new_job("alice")).await.unwrap();

    let jobs = engine
        .list_by_owner("alice", &JobListQuery::default())
        .await
        .unwrap();
    let ids: Vec<_> = jobs.iter().map(|j| j.id).collect();
    assert_eq!(ids, vec![a3, a2, a1]);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn stats_combine_table_counts_and_replica_load(pool: PgPool) {
    let (engine, _) = build_engine(&pool, 3, Step::Succeed);
    engine.submit(new_job("user-1")).await.unwrap();
    let cancelled = engine.submit(new_job("user-1")).await.unwrap();
    engine.cancel(cancelled).await.unwrap();

    let stats = engine.stats().await.unwrap();
    assert_eq!(stats.jobs.total, 2);
    assert_eq!(stats.jobs.queued, 1);
    assert_eq!(stats.jobs.cancelled, 1);
    assert_eq!(stats.in_flight, 0);
    assert_eq!(stats.concurrency, 3);
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn cancelling_queued_job_notifies_and_prevents_execution(pool: PgPool) {
    let (engine, notifier) = build_engine(&pool, 1, Step::Succeed);
    let id = engine.submit(new_job("user-1")).await.unwrap();

    let cancelled = engine.cancel(id).await.unwrap();
    assert_eq!(cancelled.state, JobState::Cancelled);
    assert!(cancelled.finished_at.is_some());

    let handle = engine.start();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(handle.shutdown().await);

    assert_eq!(engine.get(id).await.unwrap().state, JobState::Cancelled);
    assert_eq!(notifier.events(), vec![Notification::Cancelled(id)]);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn cancelling_claimed_job_notifies_once(pool: PgPool) {
    let (engine, notifier) = build_engine(&pool, 1, Step::Delay(Duration::from_millis(300)));
    let id = engine.submit(new_job("user-1")).await.unwrap();

    let handle = engine.start();
    wait_for_state(&pool, id, WAIT, |s| s == JobState::Claimed).await;
    engine.cancel(id).await.unwrap();
    assert!(handle.shutdown().await);

    let stored = engine.get(id).await.unwrap();
    assert_eq!(stored.state, JobState::Cancelled);
    assert!(stored.result.is_none());
    assert_eq!(notifier.events(), vec![Notification::Cancelled(id)]);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn cancelling_terminal_job_is_rejected(pool: PgPool) {
    let (engine, notifier) = build_engine(&pool, 1, Step::Succeed);
    let id = engine.submit(new_job("user-1")).await.unwrap();
    engine.cancel(id).await.unwrap();

    assert_matches!(
        engine.cancel(id).await,
        Err(StoreError::InvalidTransition { from: JobState::Cancelled, .. })
    );
    assert_matches!(engine.cancel(424242).await, Err(StoreError::NotFound(424242)));
    assert_eq!(notifier.events().len(), 1);
}

// ---------------------------------------------------------------------------
// End to end
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn flaky_job_completes_through_the_running_engine(pool: PgPool) {
    let notifier = RecordingNotifier::new();
    let engine = JobEngine::new(
        pool.clone(),
        test_config(2),
        ScriptedGeneration::new([Step::Fail("flaky upstream")], Step::Succeed),
        notifier.clone(),
    );
    let id = engine.submit(new_job("user-1")).await.unwrap();

    let handle = engine.start();
    let done = wait_for_terminal(&pool, id, WAIT).await;
    assert!(handle.shutdown().await);

    assert_eq!(done.state, JobState::Completed);
    assert_eq!(done.attempt_count, 2);
    assert_eq!(
        notifier.events_for(id),
        vec![
            Notification::RetryScheduled(id, Duration::from_millis(2)),
            Notification::Completed(id),
        ]
    );
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn always_failing_job_ends_failed_through_the_running_engine(pool: PgPool) {
    let (engine, notifier) = build_engine(&pool, 2, Step::Fail("no capacity"));
    let id = engine.submit(new_job("user-1")).await.unwrap();

    let handle = engine.start();
    let done = wait_for_terminal(&pool, id, WAIT).await;
    assert!(handle.shutdown().await);

    assert_eq!(done.state, JobState::Failed);
    assert_eq!(done.attempt_count, done.max_attempts);
    assert_eq!(done.failure_reason.as_deref(), Some("no capacity"));

    let events = notifier.events_for(id);
    assert_eq!(events.len(), 3);
    assert_eq!(
        events.last(),
        Some(&Notification::Failed(id, "no capacity".to_string()))
    );
}

// ---------------------------------------------------------------------------
// Shutdown
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn shutdown_waits_for_in_flight_executions(pool: PgPool) {
    let (engine, _) = build_engine(&pool, 1, Step::Delay(Duration::from_millis(300)));
    let id = engine.submit(new_job("user-1")).await.unwrap();

    let handle = engine.start();
    wait_for_state(&pool, id, WAIT, |s| s == JobState::Claimed).await;

    assert!(handle.shutdown().await);
    assert_eq!(engine.get(id).await.unwrap().state, JobState::Completed);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn shutdown_gives_up_on_executions_past_the_timeout(pool: PgPool) {
    let mut config = test_config(1);
    config.shutdown_timeout = Duration::from_millis(100);
    let engine = JobEngine::new(
        pool.clone(),
        config,
        ScriptedGeneration::always(Step::Hang),
        RecordingNotifier::new(),
    );
    let id = engine.submit(new_job("user-1")).await.unwrap();

    let handle = engine.start();
    wait_for_state(&pool, id, WAIT, |s| s == JobState::Claimed).await;

    assert!(!handle.shutdown().await);
    // The claim stays for stale-claim recovery.
    assert_eq!(engine.get(id).await.unwrap().state, JobState::Claimed);
}

//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] is the publish/subscribe hub for [`JobEvent`]s. It is
//! designed to be shared via `Arc<EventBus>` between the engine and
//! whatever transport forwards events to clients.

use chrono::{DateTime, Utc};
use easel_core::job_state::JobState;
use easel_core::types::DbId;
use easel_db::models::job::Job;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// JobEvent
// ---------------------------------------------------------------------------

/// A job lifecycle transition, as seen by subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEvent {
    /// Dot-separated event name, e.g. `"job.completed"`.
    pub event_type: String,

    pub job_id: DbId,
    pub owner_id: String,
    pub kind: String,
    pub target_id: Option<String>,

    /// State after the transition.
    pub state: JobState,
    pub attempt_count: i32,

    /// Backoff before the next attempt, for retry events.
    pub retry_in_ms: Option<u64>,

    /// Terminal failure reason, for failure events.
    pub failure_reason: Option<String>,

    /// When the event was created (UTC).
    pub timestamp: DateTime<Utc>,
}

impl JobEvent {
    /// Snapshot the subscriber-relevant fields of `job`.
    pub fn from_job(event_type: impl Into<String>, job: &Job) -> Self {
        Self {
            event_type: event_type.into(),
            job_id: job.id,
            owner_id: job.owner_id.clone(),
            kind: job.kind.clone(),
            target_id: job.target_id.clone(),
            state: job.state,
            attempt_count: job.attempt_count,
            retry_in_ms: None,
            failure_reason: job.failure_reason.clone(),
            timestamp: Utc::now(),
        }
    }

    /// Attach the retry backoff.
    pub fn with_retry_in(mut self, delay: std::time::Duration) -> Self {
        self.retry_in_ms = Some(u64::try_from(delay.as_millis()).unwrap_or(u64::MAX));
        self
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
///
/// Wraps a [`broadcast::Sender`] so that any number of subscribers can
/// independently receive every published [`JobEvent`].
pub struct EventBus {
    sender: broadcast::Sender<JobEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full, the oldest un-consumed messages are dropped
    /// and slow receivers will observe a `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers. Never blocks.
    ///
    /// If there are no active subscribers the event is silently dropped.
    pub fn publish(&self, event: JobEvent) {
        // A send error only means there are zero receivers.
        let _ = self.sender.send(event);
    }

    /// Subscribe to all events published on this bus.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

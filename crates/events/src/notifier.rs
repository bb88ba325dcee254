//! Notification seam between the engine and delivery transports.
//!
//! The engine calls a [`JobNotifier`] after the corresponding transition
//! has been committed. Implementations must return promptly and must not
//! fail: delivery is best-effort and never affects stored job state.

use std::sync::Arc;
use std::time::Duration;

use easel_core::job_events::{
    EVENT_JOB_CANCELLED, EVENT_JOB_COMPLETED, EVENT_JOB_FAILED, EVENT_JOB_RETRY_SCHEDULED,
};
use easel_db::models::job::Job;

use crate::bus::{EventBus, JobEvent};

/// Observer of committed job transitions.
pub trait JobNotifier: Send + Sync {
    /// The job reached `Completed`.
    fn on_completed(&self, job: &Job);

    /// The job reached `Failed`; `failure_reason` is populated.
    fn on_failed(&self, job: &Job);

    /// An attempt failed and the job is queued again after `delay`.
    fn on_retry_scheduled(&self, job: &Job, delay: Duration);

    /// The job reached `Cancelled`.
    fn on_cancelled(&self, _job: &Job) {}
}

/// Discards every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl JobNotifier for NoopNotifier {
    fn on_completed(&self, _job: &Job) {}
    fn on_failed(&self, _job: &Job) {}
    fn on_retry_scheduled(&self, _job: &Job, _delay: Duration) {}
}

/// Publishes every transition as a [`JobEvent`] on an [`EventBus`].
pub struct BusNotifier {
    bus: Arc<EventBus>,
}

impl BusNotifier {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }

    fn publish(&self, event: JobEvent) {
        tracing::trace!(
            event_type = %event.event_type,
            job_id = event.job_id,
            subscribers = self.bus.subscriber_count(),
            "Publishing job event",
        );
        self.bus.publish(event);
    }
}

impl JobNotifier for BusNotifier {
    fn on_completed(&self, job: &Job) {
        self.publish(JobEvent::from_job(EVENT_JOB_COMPLETED, job));
    }

    fn on_failed(&self, job: &Job) {
        self.publish(JobEvent::from_job(EVENT_JOB_FAILED, job));
    }

    fn on_retry_scheduled(&self, job: &Job, delay: Duration) {
        self.publish(JobEvent::from_job(EVENT_JOB_RETRY_SCHEDULED, job).with_retry_in(delay));
    }

    fn on_cancelled(&self, job: &Job) {
        self.publish(JobEvent::from_job(EVENT_JOB_CANCELLED, job));
    }
}

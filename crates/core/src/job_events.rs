//! Event type names published for job lifecycle transitions.
//!
//! Shared by the notifier implementations and by any transport that
//! forwards job events to subscribers.

/// Job finished successfully and carries a result.
pub const EVENT_JOB_COMPLETED: &str = "job.completed";

/// Job exhausted its attempts and is terminally failed.
pub const EVENT_JOB_FAILED: &str = "job.failed";

/// Job failed an attempt and was re-queued with a backoff delay.
pub const EVENT_JOB_RETRY_SCHEDULED: &str = "job.retry_scheduled";

/// Job was cancelled by its owner (or an operator).
pub const EVENT_JOB_CANCELLED: &str = "job.cancelled";

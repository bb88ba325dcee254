//! Job lifecycle state machine.
//!
//! Discriminants match the seed rows of the `job_statuses` lookup table.
//!
//! ```text
//! Queued ──claim──▶ Claimed ──complete──▶ Completed
//!   │  ▲               │
//!   │  └───retry───────┤
//!   │                  └──fail (attempts exhausted)──▶ Failed
//!   └──cancel──▶ Cancelled ◀──cancel── Claimed
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::StatusId;

/// Lifecycle state of a job.
#[repr(i16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued = 1,
    Claimed = 2,
    Completed = 3,
    Failed = 4,
    Cancelled = 5,
}

/// A state-mutating operation on a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Claim,
    Complete,
    /// Failed attempt with attempts remaining: back to `Queued`.
    Retry,
    /// Failed attempt with no attempts remaining.
    Fail,
    Cancel,
}

impl Transition {
    /// Verb used in error messages and logs.
    pub fn action(self) -> &'static str {
        match self {
            Transition::Claim => "claim",
            Transition::Complete => "complete",
            Transition::Retry => "reschedule",
            Transition::Fail => "fail",
            Transition::Cancel => "cancel",
        }
    }
}

impl JobState {
    pub const ALL: [JobState; 5] = [
        JobState::Queued,
        JobState::Claimed,
        JobState::Completed,
        JobState::Failed,
        JobState::Cancelled,
    ];

    /// Return the database status ID.
    pub fn id(self) -> StatusId {
        self as StatusId
    }

    /// Look up a state by its database status ID.
    pub fn from_id(id: StatusId) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.id() == id)
    }

    /// Lower-case name, matching `job_statuses.name`.
    pub fn name(self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Claimed => "claimed",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        }
    }

    /// Completed, failed and cancelled jobs accept no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled
        )
    }

    /// The state reached by applying `transition`, if it is legal here.
    pub fn apply(self, transition: Transition) -> Option<JobState> {
        use JobState::*;
        match (self, transition) {
            (Queued, Transition::Claim) => Some(Claimed),
            (Claimed, Transition::Complete) => Some(Completed),
            (Claimed, Transition::Retry) => Some(Queued),
            (Claimed, Transition::Fail) => Some(Failed),
            (Queued | Claimed, Transition::Cancel) => Some(Cancelled),
            _ => None,
        }
    }

    /// Like [`apply`](Self::apply) but reports illegal transitions as errors.
    pub fn transition(self, transition: Transition) -> Result<JobState, CoreError> {
        self.apply(transition)
            .ok_or(CoreError::InvalidTransition {
                action: transition.action(),
                from: self,
            })
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<StatusId> for JobState {
    type Error = CoreError;

    fn try_from(id: StatusId) -> Result<Self, Self::Error> {
        JobState::from_id(id)
            .ok_or_else(|| CoreError::Internal(format!("Unknown job status id {id}")))
    }
}

impl From<JobState> for StatusId {
    fn from(value: JobState) -> Self {
        value.id()
    }
}

use crate::job_state::JobState;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid transition: cannot {action} a job in state {from}")]
    InvalidTransition { action: &'static str, from: JobState },

    #[error("Internal error: {0}")]
    Internal(String),
}

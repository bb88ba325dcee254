//! Pure domain layer for the canvas AI-job engine.
//!
//! Holds everything that does not touch I/O: identifiers, the job state
//! machine, the retry policy, the generation collaborator contract, and
//! the shared error type. Depends on no other workspace crate.

pub mod error;
pub mod generation;
pub mod job_events;
pub mod job_state;
pub mod retry;
pub mod types;

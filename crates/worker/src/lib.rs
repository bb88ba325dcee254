//! Easel job worker library.
//!
//! Exposes the engine building blocks (config, dispatcher, worker
//! execution, maintenance sweeper) so integration tests and the binary
//! entrypoint can both access them.

pub mod backoff;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod execution;
pub mod http_generation;
pub mod sweeper;

pub use config::EngineConfig;
pub use engine::{EngineHandle, EngineStats, JobEngine};
pub use execution::{ExecutionOutcome, WorkerExecution};

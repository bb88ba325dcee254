//! Row models and DTOs.

pub mod job;

//! Gridlink Agent
//!
//! The scheduling-RPC client of the Gridlink volunteer computing client:
//! decides when to contact each project's scheduler, backs off on failure,
//! rediscovers scheduler URLs from the project's master page, and parses
//! replies into typed records.
//!
//! Architecture:
//! - Backoff: retry delays and master-refetch eligibility
//! - Master: master document parsing and URL merging
//! - Reply: defensive scheduler reply parsing
//! - Scheduler: the per-project operation state machine and the poll loop
//! - Configuration: settings from the environment or defaults

pub mod backoff;
pub mod config;
pub mod error;
pub mod master;
pub mod reply;
pub mod scheduler;

#[cfg(test)]
mod testing;

pub use error::{Result, SchedulerError};

//! Scheduler layer
//!
//! `op` holds the negotiation state machine for one project; `poller` is the
//! caller-side loop that owns the projects and drives one op per project.

pub mod op;
pub mod poller;

pub use op::{OpState, PollOutcome, SchedulerOp};
pub use poller::SchedulerPoller;

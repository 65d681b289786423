//! Scheduler request DTOs
//!
//! The document POSTed to a scheduler URL. One round trip both reports
//! finished results and asks for more work; `work_req_seconds` of zero means
//! the client only reports.

use serde::{Deserialize, Serialize};

/// Why the client is contacting the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestMode {
    /// Fetch work, reporting results as a side effect
    GetWork,
    /// Report results, fetching work as a side effect if the buffer is low
    ReturnResults,
}

impl std::fmt::Display for RequestMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestMode::GetWork => write!(f, "get work"),
            RequestMode::ReturnResults => write!(f, "return results"),
        }
    }
}

/// A finished computation being reported
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportedResult {
    pub name: String,
    pub exit_status: i32,
    /// CPU seconds consumed
    pub cpu_time: f64,
}

/// Request body sent to a scheduling server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerRequest {
    pub mode: RequestMode,
    pub authenticator: String,
    pub hostid: u64,

    /// Seconds of work wanted; zero when only reporting
    pub work_req_seconds: f64,

    pub reported_results: Vec<ReportedResult>,

    pub client_version: String,
}

impl SchedulerRequest {
    /// Whether this request also asks for new work
    pub fn wants_work(&self) -> bool {
        self.work_req_seconds > 0.0
    }
}

//! Scheduler reply record
//!
//! The typed result of a successful negotiation. List order is the order the
//! server sent; callers correlate results with workunits by position.

use serde::{Deserialize, Serialize};

use crate::domain::work::{App, AppVersion, FileInfo, ResultAck, ResultInfo, Workunit};

/// Everything a scheduler hands back in one reply
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulerReply {
    /// Server-assigned host identifier
    pub hostid: u64,
    pub host_total_credit: f64,
    pub host_expavg_credit: f64,
    /// Unix seconds
    pub host_create_time: u64,

    /// Seconds to wait before contacting the scheduler again
    pub request_delay: f64,

    pub message: String,
    pub message_priority: String,

    pub project_name: String,

    /// Opaque preference documents
    pub global_prefs: Option<String>,
    pub project_prefs: Option<String>,

    pub user_name: String,
    pub user_total_credit: f64,
    pub user_expavg_credit: f64,
    /// Unix seconds
    pub user_create_time: u64,

    pub apps: Vec<App>,
    pub app_versions: Vec<AppVersion>,
    pub file_infos: Vec<FileInfo>,
    pub workunits: Vec<Workunit>,
    pub results: Vec<ResultInfo>,
    pub result_acks: Vec<ResultAck>,

    /// Code-signing key and its signature, not interpreted by the client
    pub code_sign_key: Option<String>,
    pub code_sign_key_signature: Option<String>,
}

impl SchedulerReply {
    /// Whether the server flagged its message for the user's attention
    pub fn has_urgent_message(&self) -> bool {
        !self.message.is_empty() && self.message_priority.eq_ignore_ascii_case("high")
    }

    /// Whether the reply granted any new work
    pub fn has_work(&self) -> bool {
        !self.results.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urgent_message_requires_text_and_high_priority() {
        let mut reply = SchedulerReply::default();
        reply.message_priority = "high".to_string();
        assert!(!reply.has_urgent_message());

        reply.message = "Server maintenance tonight".to_string();
        assert!(reply.has_urgent_message());

        reply.message_priority = "low".to_string();
        assert!(!reply.has_urgent_message());
    }
}

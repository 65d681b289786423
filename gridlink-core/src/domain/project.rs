//! Project domain model
//!
//! A project is a remote entity that issues work and accepts results. The
//! client keeps one `Project` per attachment for the life of the process.
//!
//! At most one scheduler operation may advance a project at a time. The
//! counters and URL list below are not safe for concurrent mutation; callers
//! take a [`ProjectLease`] before starting an operation and hold it until the
//! operation reaches a terminal state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// A project the client is attached to
#[derive(Debug, Serialize, Deserialize)]
pub struct Project {
    /// Stable address used to discover scheduler URLs; empty when unknown
    master_url: String,

    /// Display name, as last reported by the scheduler
    #[serde(default)]
    pub name: String,

    /// Account key sent with every scheduler request
    #[serde(default)]
    pub authenticator: String,

    /// Host identifier assigned by the scheduler (0 until assigned)
    #[serde(default)]
    pub host_id: u64,

    /// Known scheduler URLs, in preference order
    #[serde(default)]
    pub scheduler_urls: Vec<String>,

    /// Index into `scheduler_urls` of the last URL contacted
    #[serde(default)]
    pub last_url_index: Option<usize>,

    /// Consecutive failed negotiations
    #[serde(default)]
    pub nrpc_failures: u32,

    /// Consecutive master document fetches since the last successful RPC
    #[serde(default)]
    pub master_fetch_attempts: u32,

    /// When the master document was last requested
    #[serde(default)]
    pub last_master_fetch: Option<DateTime<Utc>>,

    /// Earliest time the scheduler may be contacted again
    #[serde(default)]
    pub min_rpc_time: DateTime<Utc>,

    /// Last human-readable failure, for display
    #[serde(default)]
    pub last_error: Option<String>,

    #[serde(skip)]
    busy: Arc<AtomicBool>,
}

impl Project {
    /// Creates a project known only by its master URL
    pub fn new(master_url: impl Into<String>) -> Self {
        Self {
            master_url: master_url.into().trim().to_string(),
            name: String::new(),
            authenticator: String::new(),
            host_id: 0,
            scheduler_urls: Vec::new(),
            last_url_index: None,
            nrpc_failures: 0,
            master_fetch_attempts: 0,
            last_master_fetch: None,
            min_rpc_time: DateTime::<Utc>::default(),
            last_error: None,
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Sets the initial scheduler URL list
    pub fn with_scheduler_urls(mut self, urls: Vec<String>) -> Self {
        self.scheduler_urls = urls;
        self
    }

    /// Sets the account key
    pub fn with_authenticator(mut self, authenticator: impl Into<String>) -> Self {
        self.authenticator = authenticator.into();
        self
    }

    /// The project's master URL (empty if the project has none)
    pub fn master_url(&self) -> &str {
        &self.master_url
    }

    pub fn has_master_url(&self) -> bool {
        !self.master_url.is_empty()
    }

    /// Name to use in log lines: display name if known, master URL otherwise
    pub fn label(&self) -> &str {
        if self.name.is_empty() {
            &self.master_url
        } else {
            &self.name
        }
    }

    /// Whether the backoff window has elapsed
    pub fn can_contact(&self, now: DateTime<Utc>) -> bool {
        now >= self.min_rpc_time
    }

    /// Whether an operation currently holds this project
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Marks the project busy, or returns `None` if it already is
    ///
    /// The mark is cleared when the returned lease is dropped.
    pub fn try_lease(&self) -> Option<ProjectLease> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| ProjectLease {
                busy: Arc::clone(&self.busy),
            })
    }
}

/// Exclusive claim on a project, released on drop
#[derive(Debug)]
pub struct ProjectLease {
    busy: Arc<AtomicBool>,
}

impl Drop for ProjectLease {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

//! Agent configuration
//!
//! Defines all configurable parameters for the agent including the projects
//! it is attached to, polling cadence, transport deadline and the backoff
//! constants.

use std::time::Duration;

use crate::backoff::BackoffConfig;

/// Agent configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Master URLs of the attached projects
    pub projects: Vec<String>,

    /// Account key sent with every scheduler request
    pub authenticator: String,

    /// How often the poller advances in-flight operations
    pub poll_interval: Duration,

    /// Seconds of queued work the client aims to hold
    pub work_buffer: Duration,

    /// Deadline for a single transport request
    pub rpc_timeout: Duration,

    pub backoff: BackoffConfig,
}

impl Config {
    /// Creates a new configuration with defaults
    pub fn new(projects: Vec<String>) -> Self {
        Self {
            projects,
            authenticator: String::new(),
            poll_interval: Duration::from_secs(1),
            work_buffer: Duration::from_secs(60 * 60 * 24),
            rpc_timeout: Duration::from_secs(120),
            backoff: BackoffConfig::default(),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - GRIDLINK_PROJECTS (required, comma-separated master URLs)
    /// - GRIDLINK_AUTHENTICATOR (optional)
    /// - POLL_INTERVAL (optional, seconds, default: 1)
    /// - WORK_BUFFER_SECONDS (optional, default: 86400)
    /// - RPC_TIMEOUT (optional, seconds, default: 120)
    /// - SCHED_RETRY_BASE, SCHED_RETRY_CAP, MASTER_FETCH_PERIOD,
    ///   MASTER_FETCH_RETRY_CAP, MASTER_FETCH_INTERVAL,
    ///   SCHED_RETRY_DELAY_MIN, SCHED_RETRY_DELAY_MAX (optional)
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds configuration from any variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let projects: Vec<String> = lookup("GRIDLINK_PROJECTS")
            .ok_or_else(|| anyhow::anyhow!("GRIDLINK_PROJECTS environment variable not set"))?
            .split(',')
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty())
            .collect();

        let secs = |name: &str, default: Duration| {
            lookup(name)
                .and_then(|s| s.trim().parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(default)
        };
        let count = |name: &str, default: u32| {
            lookup(name)
                .and_then(|s| s.trim().parse::<u32>().ok())
                .unwrap_or(default)
        };

        let defaults = Self::new(Vec::new());
        let backoff_defaults = BackoffConfig::default();

        Ok(Self {
            projects,
            authenticator: lookup("GRIDLINK_AUTHENTICATOR").unwrap_or_default(),
            poll_interval: secs("POLL_INTERVAL", defaults.poll_interval),
            work_buffer: secs("WORK_BUFFER_SECONDS", defaults.work_buffer),
            rpc_timeout: secs("RPC_TIMEOUT", defaults.rpc_timeout),
            backoff: BackoffConfig {
                retry_base: secs("SCHED_RETRY_BASE", backoff_defaults.retry_base),
                retry_cap: count("SCHED_RETRY_CAP", backoff_defaults.retry_cap),
                master_fetch_period: count(
                    "MASTER_FETCH_PERIOD",
                    backoff_defaults.master_fetch_period,
                ),
                master_fetch_retry_cap: count(
                    "MASTER_FETCH_RETRY_CAP",
                    backoff_defaults.master_fetch_retry_cap,
                ),
                master_fetch_interval: secs(
                    "MASTER_FETCH_INTERVAL",
                    backoff_defaults.master_fetch_interval,
                ),
                min_delay: secs("SCHED_RETRY_DELAY_MIN", backoff_defaults.min_delay),
                max_delay: secs("SCHED_RETRY_DELAY_MAX", backoff_defaults.max_delay),
            },
        })
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.projects.is_empty() {
            anyhow::bail!("at least one project must be configured");
        }

        for url in &self.projects {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                anyhow::bail!("project URL '{}' must start with http:// or https://", url);
            }
        }

        if self.poll_interval.is_zero() {
            anyhow::bail!("poll_interval must be greater than 0");
        }

        if self.rpc_timeout.is_zero() {
            anyhow::bail!("rpc_timeout must be greater than 0");
        }

        self.backoff.validate()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

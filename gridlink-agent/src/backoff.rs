//! Retry backoff policy
//!
//! Pure computation of how long a project must wait after a failed
//! negotiation, and of when its master document should be refetched.
//!
//! The retry delay is `base * 2^min(n, cap) * jitter`, clamped to
//! `[min_delay, max_delay]`, with `jitter` drawn from [`JITTER_MIN`, `JITTER_MAX`]
//! so that many clients failing together do not retry together.

use chrono::{DateTime, Utc};
use gridlink_core::domain::project::Project;
use std::time::Duration;

/// Lower bound of the random jitter factor
pub const JITTER_MIN: f64 = 0.5;
/// Upper bound of the random jitter factor
pub const JITTER_MAX: f64 = 1.0;

/// Largest exponent cap accepted by [`BackoffConfig::validate`]
pub const MAX_RETRY_CAP: u32 = 62;

/// Tunables for the backoff policy
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    /// Delay multiplied by `2^n`
    pub retry_base: Duration,

    /// Exponent cap on the failure counter
    pub retry_cap: u32,

    /// Refetch the master document every this many failures
    pub master_fetch_period: u32,

    /// Refetches allowed on the failure-count schedule
    pub master_fetch_retry_cap: u32,

    /// Once the cap is hit, refetch at most this often
    pub master_fetch_interval: Duration,

    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            retry_base: Duration::from_secs(1),
            retry_cap: 10,
            master_fetch_period: 10,
            master_fetch_retry_cap: 3,
            master_fetch_interval: Duration::from_secs(60 * 60 * 24 * 14), // 2 weeks
            min_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(60 * 60 * 4),
        }
    }
}

impl BackoffConfig {
    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.master_fetch_period == 0 {
            anyhow::bail!("master_fetch_period must be greater than 0");
        }

        if self.retry_cap > MAX_RETRY_CAP {
            anyhow::bail!("retry_cap must be at most {}", MAX_RETRY_CAP);
        }

        if self.min_delay > self.max_delay {
            anyhow::bail!(
                "min_delay ({:?}) must not exceed max_delay ({:?})",
                self.min_delay,
                self.max_delay
            );
        }

        Ok(())
    }
}

/// Retry and master-refetch decisions
#[derive(Debug, Clone, Default)]
pub struct BackoffPolicy {
    config: BackoffConfig,
}

impl BackoffPolicy {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }

    /// Delay before the next attempt after `failures` consecutive failures
    pub fn retry_delay(&self, failures: u32) -> Duration {
        let jitter = rand::random_range(JITTER_MIN..=JITTER_MAX);
        self.retry_delay_with_jitter(failures, jitter)
    }

    /// Same as [`retry_delay`](Self::retry_delay) with a caller-chosen jitter
    ///
    /// `jitter` is clamped into the jitter range.
    pub fn retry_delay_with_jitter(&self, failures: u32, jitter: f64) -> Duration {
        let exponent = failures.min(self.config.retry_cap).min(MAX_RETRY_CAP);
        let jitter = if jitter.is_nan() {
            JITTER_MIN
        } else {
            jitter.clamp(JITTER_MIN, JITTER_MAX)
        };

        let raw = self.config.retry_base.as_secs_f64() * 2f64.powi(exponent as i32) * jitter;
        let delay = Duration::try_from_secs_f64(raw).unwrap_or(Duration::MAX);

        // An unvalidated window may be inverted
        let (min, max) = if self.config.min_delay <= self.config.max_delay {
            (self.config.min_delay, self.config.max_delay)
        } else {
            (self.config.max_delay, self.config.min_delay)
        };
        delay.clamp(min, max)
    }

    /// Whether the master document should be fetched before the next RPC
    ///
    /// While fewer than `master_fetch_retry_cap` attempts have been made, a
    /// fetch is due whenever `failures` is a positive multiple of
    /// `master_fetch_period`. After that, a fetch is due once
    /// `master_fetch_interval` has passed since the last attempt, whatever the
    /// failure count.
    pub fn master_fetch_due(
        &self,
        failures: u32,
        attempts: u32,
        last_attempt: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> bool {
        if attempts < self.config.master_fetch_retry_cap {
            return failures > 0
                && failures
                    .checked_rem(self.config.master_fetch_period)
                    .is_some_and(|rem| rem == 0);
        }

        match last_attempt {
            None => true,
            Some(last) => match (now - last).to_std() {
                Ok(elapsed) => elapsed >= self.config.master_fetch_interval,
                // Last attempt is in the future: clock went backwards
                Err(_) => false,
            },
        }
    }

    /// [`master_fetch_due`](Self::master_fetch_due) for a project's counters
    pub fn project_master_fetch_due(&self, project: &Project, now: DateTime<Utc>) -> bool {
        self.master_fetch_due(
            project.nrpc_failures,
            project.master_fetch_attempts,
            project.last_master_fetch,
            now,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn policy() -> BackoffPolicy {
        BackoffPolicy::new(BackoffConfig {
            retry_base: Duration::from_secs(1),
            retry_cap: 5,
            master_fetch_period: 5,
            master_fetch_retry_cap: 3,
            master_fetch_interval: Duration::from_secs(3600),
            min_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
        })
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(BackoffConfig::default().validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = BackoffConfig::default();

        config.master_fetch_period = 0;
        assert!(config.validate().is_err());
        config.master_fetch_period = 10;

        config.min_delay = Duration::from_secs(100);
        config.max_delay = Duration::from_secs(10);
        assert!(config.validate().is_err());
        config.max_delay = Duration::from_secs(100);
        assert!(config.validate().is_ok());

        config.retry_cap = MAX_RETRY_CAP + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_delay_always_within_window() {
        let policy = policy();
        let min = policy.config().min_delay;
        let max = policy.config().max_delay;

        for failures in 0..200 {
            for _ in 0..20 {
                let delay = policy.retry_delay(failures);
                assert!(delay >= min && delay <= max, "{failures}: {delay:?}");
            }
            for jitter in [0.0, 0.5, 0.75, 1.0, 7.0, f64::NAN] {
                let delay = policy.retry_delay_with_jitter(failures, jitter);
                assert!(delay >= min && delay <= max, "{failures}/{jitter}: {delay:?}");
            }
        }
    }

    #[test]
    fn test_delay_grows_then_flattens_at_cap() {
        let policy = policy();

        // 1s * 2^n * 1.0, clamped to [2, 30]
        assert_eq!(policy.retry_delay_with_jitter(0, 1.0), Duration::from_secs(2));
        assert_eq!(policy.retry_delay_with_jitter(2, 1.0), Duration::from_secs(4));
        assert_eq!(policy.retry_delay_with_jitter(3, 1.0), Duration::from_secs(8));
        assert_eq!(policy.retry_delay_with_jitter(4, 1.0), Duration::from_secs(16));
        assert_eq!(policy.retry_delay_with_jitter(5, 1.0), Duration::from_secs(30));
        assert_eq!(policy.retry_delay_with_jitter(50, 1.0), Duration::from_secs(30));

        let mut previous = Duration::ZERO;
        for failures in 0..=5 {
            let delay = policy.retry_delay_with_jitter(failures, 0.75);
            assert!(delay >= previous);
            previous = delay;
        }
        for failures in 6..40 {
            assert_eq!(policy.retry_delay_with_jitter(failures, 0.75), previous);
        }
    }

    #[test]
    fn test_huge_exponent_is_clamped() {
        let policy = BackoffPolicy::new(BackoffConfig {
            retry_cap: MAX_RETRY_CAP,
            ..BackoffConfig::default()
        });

        assert_eq!(
            policy.retry_delay_with_jitter(u32::MAX, 1.0),
            BackoffConfig::default().max_delay
        );
    }

    #[test]
    fn test_extreme_windows_do_not_panic() {
        let huge = Duration::from_secs(u64::MAX);
        let config = BackoffConfig {
            min_delay: huge,
            max_delay: huge,
            ..BackoffConfig::default()
        };
        assert!(config.validate().is_ok());

        let policy = BackoffPolicy::new(config);
        for failures in [0, 1, 10, u32::MAX] {
            assert_eq!(policy.retry_delay(failures), huge);
        }

        // Never validated: the window is used the other way round
        let inverted = BackoffPolicy::new(BackoffConfig {
            min_delay: Duration::from_secs(100),
            max_delay: Duration::from_secs(10),
            ..BackoffConfig::default()
        });
        let delay = inverted.retry_delay(3);
        assert!(delay >= Duration::from_secs(10) && delay <= Duration::from_secs(100));

        let no_period = BackoffPolicy::new(BackoffConfig {
            master_fetch_period: 0,
            ..BackoffConfig::default()
        });
        assert!(!no_period.master_fetch_due(10, 0, None, Utc::now()));
    }

    #[test]
    fn test_master_fetch_on_period_multiples() {
        let policy = policy();
        let now = Utc::now();

        let due: Vec<u32> = (0..=14)
            .filter(|&n| policy.master_fetch_due(n, 0, None, now))
            .collect();
        assert_eq!(due, vec![5, 10]);
    }

    #[test]
    fn test_master_fetch_sequence_switches_to_interval_after_cap() {
        let policy = policy();
        let start = Utc::now();
        let mut attempts = 0;
        let mut last_attempt = None;
        let mut fetched_at = Vec::new();

        // One failure per minute
        for failures in 1..=40u32 {
            let now = start + TimeDelta::minutes(failures as i64);
            if policy.master_fetch_due(failures, attempts, last_attempt, now) {
                fetched_at.push(failures);
                attempts += 1;
                last_attempt = Some(now);
            }
        }
        assert_eq!(fetched_at, vec![5, 10, 15]);

        // Past the interval the fetch is due regardless of the failure count
        let later = last_attempt.unwrap() + TimeDelta::hours(1);
        assert!(policy.master_fetch_due(41, attempts, last_attempt, later));
        assert!(!policy.master_fetch_due(41, attempts, last_attempt, later - TimeDelta::seconds(1)));
    }

    #[test]
    fn test_master_fetch_clock_skew() {
        let policy = policy();
        let now = Utc::now();

        assert!(!policy.master_fetch_due(3, 3, Some(now + TimeDelta::hours(5)), now));
        assert!(policy.master_fetch_due(3, 3, None, now));
    }
}

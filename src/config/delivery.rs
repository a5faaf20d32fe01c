//! Delivery worker configuration

use std::time::Duration;

use serde::Deserialize;

/// Delay strategy between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    /// Same delay before every retry
    #[default]
    Fixed,
    /// Delay doubles per retry, capped at `max_retry_delay`
    Exponential,
}

/// The `[delivery]` section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Per-attempt request timeout (e.g., "7s")
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Retries after the first timed-out attempt
    pub max_retries: u32,

    /// Delay before the first retry
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,

    /// Fixed or exponential retry delays
    pub backoff: BackoffKind,

    /// Cap for exponential backoff
    #[serde(with = "humantime_serde")]
    pub max_retry_delay: Duration,

    /// How long the worker waits on an empty queue before re-checking shutdown
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Duration,

    /// Extra time granted to the worker on shutdown beyond one attempt timeout
    #[serde(with = "humantime_serde")]
    pub shutdown_grace: Duration,

    /// Build URLs and log, but never write to the store
    pub dry_run: bool,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(7),
            max_retries: 2,
            retry_delay: Duration::from_secs(5),
            backoff: BackoffKind::Fixed,
            max_retry_delay: Duration::from_secs(60),
            idle_timeout: Duration::from_secs(5),
            shutdown_grace: Duration::from_secs(2),
            dry_run: false,
        }
    }
}

impl DeliveryConfig {
    /// Upper bound on how long shutdown waits for the worker
    pub fn shutdown_deadline(&self) -> Duration {
        self.timeout + self.shutdown_grace
    }
}

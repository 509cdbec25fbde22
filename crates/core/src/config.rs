//! Runtime configuration read from `CORRAL_*` environment variables.

use std::time::Duration;

use serde::{Deserialize, Serialize};

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|s| s.parse::<T>().ok()).unwrap_or(default)
}

/// Bounded polling: at most `max_attempts` tries, `interval` apart, all within `deadline`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
    pub deadline: Duration,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, interval: Duration, deadline: Duration) -> Self {
        Self { max_attempts, interval, deadline }
    }

    /// Defaults for reads that wait on this operator's own writes.
    pub const fn fetch_default() -> Self {
        Self::new(20, Duration::from_millis(500), Duration::from_secs(10))
    }

    /// Defaults for waiting on externally-operated resources.
    pub const fn readiness_default() -> Self {
        Self::new(30, Duration::from_millis(2000), Duration::from_secs(60))
    }

    /// Read `{prefix}_ATTEMPTS`, `{prefix}_INTERVAL_MS` and `{prefix}_DEADLINE_SECS`,
    /// falling back to `default` per field.
    pub fn from_env(prefix: &str, default: RetryPolicy) -> Self {
        let max_attempts = env_or(&format!("{prefix}_ATTEMPTS"), default.max_attempts).max(1);
        let interval_ms = env_or(&format!("{prefix}_INTERVAL_MS"), default.interval.as_millis() as u64);
        let deadline_secs = env_or(&format!("{prefix}_DEADLINE_SECS"), default.deadline.as_secs());
        Self {
            max_attempts,
            interval: Duration::from_millis(interval_ms),
            deadline: Duration::from_secs(deadline_secs),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorConfig {
    /// Field manager used for server-side apply.
    pub field_manager: String,
    pub fetch: RetryPolicy,
    pub readiness: RetryPolicy,
    pub requeue: Duration,
    pub error_requeue: Duration,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            field_manager: "corral".to_string(),
            fetch: RetryPolicy::fetch_default(),
            readiness: RetryPolicy::readiness_default(),
            requeue: Duration::from_secs(30),
            error_requeue: Duration::from_secs(10),
        }
    }
}

impl OperatorConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        let cfg = Self {
            field_manager: std::env::var("CORRAL_FIELD_MANAGER").unwrap_or(d.field_manager),
            fetch: RetryPolicy::from_env("CORRAL_FETCH", d.fetch),
            readiness: RetryPolicy::from_env("CORRAL_READY", d.readiness),
            requeue: Duration::from_secs(env_or("CORRAL_REQUEUE_SECS", d.requeue.as_secs())),
            error_requeue: Duration::from_secs(env_or("CORRAL_ERROR_REQUEUE_SECS", d.error_requeue.as_secs())),
        };
        tracing::debug!(?cfg, "operator config loaded");
        cfg
    }
}

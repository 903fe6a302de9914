//! Reconnect policy and the exponential backoff that drives it.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How the channel retries after losing or failing to reach the trainer.
///
/// The delay before attempt `k` (1-based, counting consecutive failures)
/// is `initial_backoff_ms * multiplier^(k-1)`, capped at `max_backoff_ms`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Whether to reconnect at all. Default: true.
    pub enabled: bool,
    /// Consecutive failed attempts before giving up. `None` = retry
    /// forever. Default: `None`.
    pub max_attempts: Option<u32>,
    /// Delay after the first failure (ms). Default: 250.
    pub initial_backoff_ms: u64,
    /// Upper bound on the delay (ms). Default: 5000.
    pub max_backoff_ms: u64,
    /// Growth factor per consecutive failure. Default: 2.0.
    pub multiplier: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: None,
            initial_backoff_ms: 250,
            max_backoff_ms: 5000,
            multiplier: 2.0,
        }
    }
}

impl ReconnectPolicy {
    /// Never reconnect.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

/// Tracks consecutive failures against a [`ReconnectPolicy`].
#[derive(Clone, Debug)]
pub struct ReconnectBackoff {
    policy: ReconnectPolicy,
    failures: u32,
}

impl ReconnectBackoff {
    /// A fresh tracker with no failures recorded.
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            failures: 0,
        }
    }

    /// Consecutive failures since the last success.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Whether another attempt is allowed.
    pub fn may_retry(&self) -> bool {
        self.policy.enabled
            && self
                .policy
                .max_attempts
                .is_none_or(|max| self.failures < max)
    }

    /// Record a failure and return the delay before the next attempt, or
    /// `None` when the policy forbids another one.
    pub fn record_failure(&mut self) -> Option<Duration> {
        self.failures = self.failures.saturating_add(1);
        if !self.may_retry() {
            return None;
        }
        Some(self.delay_for(self.failures))
    }

    /// Forget past failures after a successful connection.
    pub fn reset(&mut self) {
        self.failures = 0;
    }

    fn delay_for(&self, failures: u32) -> Duration {
        let exp = failures.saturating_sub(1).min(63) as i32;
        let raw = self.policy.initial_backoff_ms as f64 * self.policy.multiplier.powi(exp);
        let capped = raw.min(self.policy.max_backoff_ms as f64);
        Duration::from_millis(capped as u64)
    }
}

//! Reconnect backoff.
//!
//! Exponential and capped, with no attempt limit: a control session keeps
//! trying to reach the broker until it is told to disconnect.

use std::time::Duration;

/// Reconnect delay schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Delay before the first retry in milliseconds (default 1000).
    pub initial_backoff_ms: u64,
    /// Growth factor per failed attempt (default 2.0).
    pub multiplier: f64,
    /// Upper bound for a single delay in milliseconds (default 10000).
    pub max_backoff_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 1_000,
            multiplier: 2.0,
            max_backoff_ms: 10_000,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt` (zero-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.min(63) as i32;
        let raw = self.initial_backoff_ms as f64 * self.multiplier.max(1.0).powi(exp);
        let capped = raw.min(self.max_backoff_ms as f64);
        Duration::from_millis(capped as u64)
    }
}

/// Attempt counter over a [`ReconnectPolicy`].
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: ReconnectPolicy,
    attempt: u32,
}

impl Backoff {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Delay for the next retry; advances the attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.policy.delay_for(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Number of retries scheduled since the last successful connect.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Call after a successful connect.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

//! Reconnection policy: capped exponential backoff with an attempt budget

use std::time::Duration;

use backoff::backoff::Backoff;

/// Tunables for reconnection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnect
    pub base_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Consecutive failed attempts allowed before giving up
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt `attempt` (1-based):
    /// `min(base * 2^(attempt-1), max)`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let delay = self.base_delay.saturating_mul(1u32 << exponent);
        delay.min(self.max_delay)
    }

    /// Whether another attempt fits in the budget after `attempts` failures
    pub fn allows(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

/// Attempt counter driven by a [`ReconnectPolicy`]
///
/// Deterministic (no jitter), so the delay before attempt `k` is always
/// exactly [`ReconnectPolicy::delay_for`]`(k)`.
#[derive(Debug, Clone)]
pub struct ChannelBackoff {
    policy: ReconnectPolicy,
    attempts: u32,
}

impl ChannelBackoff {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self { policy, attempts: 0 }
    }

    /// Consecutive failed attempts since the last successful open
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Whether the budget still allows scheduling another attempt
    pub fn has_budget(&self) -> bool {
        self.policy.allows(self.attempts)
    }

    /// Delay the next [`Backoff::next_backoff`] call will return
    pub fn current_delay(&self) -> Duration {
        self.policy.delay_for(self.attempts.max(1))
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }
}

impl Backoff for ChannelBackoff {
    fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Count one more attempt and return its delay, or `None` once the
    /// budget is spent
    fn next_backoff(&mut self) -> Option<Duration> {
        if !self.has_budget() {
            return None;
        }
        self.attempts += 1;
        Some(self.policy.delay_for(self.attempts))
    }
}

//! Retry policy: decides backoff delays and the attempt bound.

use std::time::Duration;

/// Bounded exponential backoff.
///
/// Used by the connection supervisor for rebuild cycles and by the message
/// bridge for relaying commands. The call sites own the loop; the policy
/// only answers "how long" and "may I try again".
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Base delay for the first retry.
    pub base_delay: Duration,

    /// Backoff multiplier for exponential backoff.
    pub multiplier: f64,

    /// Upper bound for a single delay.
    pub max_delay: Duration,

    /// Maximum number of attempts before giving up.
    pub max_attempts: u32,
}

impl RetryPolicy {
    /// Reconnection defaults: 1s, 2s, 4s ... capped at 10s, 3 attempts.
    pub fn reconnect_default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(10),
            max_attempts: 3,
        }
    }

    /// Delay before attempt number `attempts` (1-indexed).
    ///
    /// `base_delay * multiplier^(attempts - 1)`, capped at `max_delay`.
    /// attempts=0 is treated like the first attempt.
    ///
    /// With base=1s, multiplier=2.0, max=10s:
    /// - attempt 1: 1s
    /// - attempt 2: 2s
    /// - attempt 3: 4s
    /// - attempt 5: 10s (capped)
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay_secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        if !delay_secs.is_finite() || delay_secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(delay_secs)
    }

    /// Whether another attempt is allowed after `attempts` have been made.
    pub fn allows(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::reconnect_default()
    }
}

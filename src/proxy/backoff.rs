//! Reconnection policy.
//!
//! Pure functions: the orchestrator owns the attempt counter and does the
//! sleeping.

use std::time::Duration;

use crate::config::RetryPolicy;

/// Delay before reconnection attempt `attempt` (0-indexed):
/// `min(initial * multiplier^attempt, max_backoff)`.
///
/// Overflow, infinities and NaN all clamp to `max_backoff`.
#[must_use]
pub fn next_delay(attempt: u32, policy: &RetryPolicy) -> Duration {
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let secs = policy.initial_backoff.as_secs_f64() * policy.backoff_multiplier.powi(exponent);
    Duration::try_from_secs_f64(secs)
        .map_or(policy.max_backoff, |delay| delay.min(policy.max_backoff))
}

/// Whether the attempt budget is spent.
#[must_use]
pub const fn should_give_up(attempt: u32, policy: &RetryPolicy) -> bool {
    attempt >= policy.max_attempts
}

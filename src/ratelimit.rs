//! Hourly invocation budget.
//!
//! A sliding one-hour window over agent invocation times. Independent
//! of the circuit breaker: tripping it is a resource-budget condition,
//! not a failure diagnosis, and is classified separately.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};

/// Sliding-window calls-per-hour guard.
///
/// Timestamps are passed in by the caller, which keeps the limiter
/// deterministic under test.
#[derive(Debug, Clone)]
pub struct HourlyRateLimiter {
    max_calls_per_hour: u32,
    calls: VecDeque<DateTime<Utc>>,
}

impl HourlyRateLimiter {
    /// Create a limiter allowing at most `max_calls_per_hour` calls.
    #[must_use]
    pub fn new(max_calls_per_hour: u32) -> Self {
        Self {
            max_calls_per_hour,
            calls: VecDeque::new(),
        }
    }

    /// Try to reserve one invocation at `now`.
    ///
    /// Returns `false` when the budget for the trailing hour is spent;
    /// the call must not proceed.
    pub fn try_acquire(&mut self, now: DateTime<Utc>) -> bool {
        self.prune(now);
        if self.calls.len() >= self.max_calls_per_hour as usize {
            return false;
        }
        self.calls.push_back(now);
        true
    }

    /// Calls recorded within the trailing hour.
    #[must_use]
    pub fn calls_in_window(&self) -> u32 {
        self.calls.len() as u32
    }

    /// Configured hourly budget.
    #[must_use]
    pub fn max_calls_per_hour(&self) -> u32 {
        self.max_calls_per_hour
    }

    /// Time until the next call would be admitted, if throttled.
    #[must_use]
    pub fn time_until_ready(&self, now: DateTime<Utc>) -> Option<Duration> {
        if (self.calls.len() as u32) < self.max_calls_per_hour {
            return None;
        }
        self.calls
            .front()
            .map(|oldest| (*oldest + Duration::hours(1)) - now)
            .filter(|remaining| *remaining > Duration::zero())
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = now - Duration::hours(1);
        while let Some(oldest) = self.calls.front() {
            if *oldest <= cutoff {
                self.calls.pop_front();
            } else {
                break;
            }
        }
    }
}

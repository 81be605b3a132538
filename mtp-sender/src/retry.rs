//! Retry and reconnect policies.
//!
//! All automatic retry constants live here and are carried by
//! [`crate::Config`]; nothing else in the crate hardcodes a delay.

use std::num::NonZeroU32;
use std::ops::ControlFlow;
use std::time::Duration;

use crate::errors::RpcError;

/// Context passed to [`RetryConfig::should_retry`] on each failure.
pub struct RetryContext<'a> {
    /// How many times this request has failed so far, this failure included.
    pub fail_count: NonZeroU32,
    pub error:      &'a RpcError,
}

/// How requests react to `FLOOD_WAIT_X` and `*_MIGRATE_X`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryConfig {
    /// Flood waits longer than this are surfaced instead of slept through.
    pub flood_sleep_threshold: Duration,
    /// Automatic flood-wait retries per request.
    pub max_flood_retries:     u32,
    /// Migrations a single request may follow before its error is surfaced.
    pub max_migrations:        u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            flood_sleep_threshold: Duration::from_secs(60),
            max_flood_retries:     2,
            max_migrations:        3,
        }
    }
}

impl RetryConfig {
    /// `Continue(delay)` to reschedule the request, `Break` to surface the error.
    pub fn should_retry(&self, ctx: &RetryContext<'_>) -> ControlFlow<(), Duration> {
        if let Some(secs) = ctx.error.flood_wait_seconds() {
            if ctx.fail_count.get() <= self.max_flood_retries
                && secs <= self.flood_sleep_threshold.as_secs()
            {
                tracing::info!("[retry] {}_{secs}: sleeping before retry", ctx.error.name);
                return ControlFlow::Continue(Duration::from_secs(secs));
            }
        }
        ControlFlow::Break(())
    }
}

/// Exponential backoff between reconnect attempts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectConfig {
    pub base_delay:   Duration,
    pub max_delay:    Duration,
    /// Consecutive failures after which queued requests fail.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay:   Duration::from_millis(500),
            max_delay:    Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

impl ReconnectConfig {
    /// Delay before reconnect attempt number `attempt` (1-based), or `Break`
    /// once the budget is exhausted.
    pub fn next_delay(&self, attempt: u32) -> ControlFlow<(), Duration> {
        if attempt > self.max_attempts {
            return ControlFlow::Break(());
        }
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor).min(self.max_delay);
        ControlFlow::Continue(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(error: &RpcError, n: u32) -> RetryContext<'_> {
        RetryContext { fail_count: NonZeroU32::new(n).unwrap(), error }
    }

    #[test]
    fn flood_wait_within_budget_is_retried() {
        let cfg = RetryConfig::default();
        let err = RpcError::from_telegram(420, "FLOOD_WAIT_3");
        assert_eq!(cfg.should_retry(&ctx(&err, 1)), ControlFlow::Continue(Duration::from_secs(3)));
        assert_eq!(cfg.should_retry(&ctx(&err, 2)), ControlFlow::Continue(Duration::from_secs(3)));
        assert_eq!(cfg.should_retry(&ctx(&err, 3)), ControlFlow::Break(()));
    }

    #[test]
    fn long_flood_wait_is_surfaced() {
        let cfg = RetryConfig::default();
        let err = RpcError::from_telegram(420, "FLOOD_WAIT_3600");
        assert_eq!(cfg.should_retry(&ctx(&err, 1)), ControlFlow::Break(()));
    }

    #[test]
    fn other_errors_are_not_retried() {
        let cfg = RetryConfig::default();
        let err = RpcError::from_telegram(400, "PEER_ID_INVALID");
        assert_eq!(cfg.should_retry(&ctx(&err, 1)), ControlFlow::Break(()));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let cfg = ReconnectConfig {
            base_delay:   Duration::from_secs(1),
            max_delay:    Duration::from_secs(5),
            max_attempts: 4,
        };
        assert_eq!(cfg.next_delay(1), ControlFlow::Continue(Duration::from_secs(1)));
        assert_eq!(cfg.next_delay(2), ControlFlow::Continue(Duration::from_secs(2)));
        assert_eq!(cfg.next_delay(3), ControlFlow::Continue(Duration::from_secs(4)));
        assert_eq!(cfg.next_delay(4), ControlFlow::Continue(Duration::from_secs(5)));
        assert_eq!(cfg.next_delay(5), ControlFlow::Break(()));
    }
}

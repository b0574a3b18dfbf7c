//! Fixed, cancellable backoff waits before re-registering

use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::TimingConfig;

/// Failure that led to a teardown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryTrigger {
    Unauthorized,
    Restarting,
    Unreachable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub unauthorized: Duration,
    pub restarting: Duration,
    pub unreachable: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_timing(&TimingConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_timing(timing: &TimingConfig) -> Self {
        Self {
            unauthorized: Duration::from_secs(timing.unauthorized_backoff),
            restarting: Duration::from_secs(timing.restarting_backoff),
            unreachable: Duration::from_secs(timing.unreachable_backoff),
        }
    }

    pub fn delay_for(&self, trigger: RetryTrigger) -> Duration {
        match trigger {
            RetryTrigger::Unauthorized => self.unauthorized,
            RetryTrigger::Restarting => self.restarting,
            RetryTrigger::Unreachable => self.unreachable,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Elapsed,
    Cancelled,
}

/// Sleep for `delay` unless `token` fires first
pub async fn wait_unless_cancelled(token: &CancellationToken, delay: Duration) -> WaitOutcome {
    if token.is_cancelled() {
        return WaitOutcome::Cancelled;
    }

    tokio::select! {
        biased;
        _ = token.cancelled() => WaitOutcome::Cancelled,
        _ = tokio::time::sleep(delay) => WaitOutcome::Elapsed,
    }
}

//! Retry policy: transient/fatal classification plus jittered backoff.
//!
//! Stateless decisions over attempt counts and `StepError` classes. The
//! executor tracks the attempt number; this module answers "retry?" and
//! "after how long?".

use std::time::Duration;

use rand::Rng;
use trainloop_types::config::RetrySettings;
use trainloop_types::error::StepError;

/// Jitter applied to every backoff delay (+/- 25%).
const JITTER_FACTOR: f64 = 0.25;

/// Stateless retry policy.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    settings: RetrySettings,
}

impl RetryPolicy {
    pub fn new(settings: RetrySettings) -> Self {
        Self { settings }
    }

    /// Whether a failed attempt should be retried.
    ///
    /// `attempt` is 1-based (first execution is attempt 1). Fatal errors
    /// never retry; transient errors retry while attempts remain.
    pub fn should_retry(&self, error: &StepError, attempt: u32, max_attempts: u32) -> bool {
        error.is_transient() && attempt < max_attempts
    }

    /// Backoff delay before the given attempt (2-based: the delay that
    /// precedes attempt N doubles for each attempt after the second),
    /// jittered +/- 25% and capped at the configured ceiling.
    pub fn backoff_delay(&self, next_attempt: u32) -> Duration {
        let exponent = next_attempt.saturating_sub(2).min(16);
        let raw = self
            .settings
            .base_ms
            .saturating_mul(1u64 << exponent)
            .min(self.settings.ceiling_ms);
        let jitter = rand::rng().random_range(1.0 - JITTER_FACTOR..=1.0 + JITTER_FACTOR);
        Duration::from_millis(((raw as f64) * jitter) as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetrySettings::default())
    }
}

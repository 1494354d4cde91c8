//! Usage and quota tracking.
//!
//! `UsageTracker::record` is deliberately infallible from the caller's
//! perspective: a generation that succeeded must never be reported as
//! failed because accounting hiccupped. Storage errors are logged and
//! swallowed.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use trainloop_types::quota::{QuotaCounter, UsageSample};

use crate::repository::QuotaStore;

/// Records usage samples against the rolling quota period.
pub struct UsageTracker<Q> {
    store: Arc<Q>,
    /// Rollover period length in seconds.
    period_secs: i64,
}

impl<Q: QuotaStore> UsageTracker<Q> {
    pub fn new(store: Arc<Q>, period_days: u32) -> Self {
        Self {
            store,
            period_secs: i64::from(period_days.max(1)) * 86_400,
        }
    }

    /// Start of the quota period containing `at`.
    ///
    /// Periods are fixed windows anchored at the Unix epoch, so every node
    /// computes the same boundary without coordination.
    pub fn period_start(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        let secs = at.timestamp().div_euclid(self.period_secs) * self.period_secs;
        Utc.timestamp_opt(secs, 0).single().unwrap_or(at)
    }

    /// Record one usage sample. Never fails: storage errors are logged and
    /// the caller proceeds.
    pub async fn record(&self, user_id: &str, sample: UsageSample) {
        let period_start = self.period_start(Utc::now());
        if let Err(err) = self.store.record_usage(user_id, &sample, period_start).await {
            tracing::warn!(
                %user_id,
                kind = sample.kind.as_str(),
                error = %err,
                "usage tracking failed, sample dropped"
            );
        } else {
            tracing::debug!(
                %user_id,
                kind = sample.kind.as_str(),
                input_tokens = sample.usage.input_tokens,
                output_tokens = sample.usage.output_tokens,
                cache_hit = sample.cache_hit,
                "usage recorded"
            );
        }
    }

    /// Current counter for a user, if one exists.
    pub async fn counter(&self, user_id: &str) -> Option<QuotaCounter> {
        match self.store.get_counter(user_id).await {
            Ok(counter) => counter,
            Err(err) => {
                tracing::warn!(%user_id, error = %err, "quota counter read failed");
                None
            }
        }
    }

    /// Zero every counter whose period has lapsed. Returns the count reset.
    pub async fn reset_lapsed_counters(&self) -> u64 {
        let now = Utc::now();
        let current_period = self.period_start(now);
        match self
            .store
            .reset_expired_counters(current_period, current_period)
            .await
        {
            Ok(count) => {
                if count > 0 {
                    tracing::info!(count, "quota counters reset for new period");
                }
                count
            }
            Err(err) => {
                tracing::warn!(error = %err, "quota counter reset failed");
                0
            }
        }
    }
}

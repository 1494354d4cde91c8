//! Quota store trait definition.

use chrono::{DateTime, Utc};
use trainloop_types::error::RepositoryError;
use trainloop_types::quota::{QuotaCounter, UsageEvent, UsageSample};

/// Storage interface for usage accounting.
pub trait QuotaStore: Send + Sync {
    /// Record one usage sample: append an audit row and increment the
    /// user's rolling counter in the same transaction.
    ///
    /// If the stored counter belongs to an older period than `period_start`,
    /// it is reset before the increment.
    fn record_usage(
        &self,
        user_id: &str,
        sample: &UsageSample,
        period_start: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Get a user's current counter.
    fn get_counter(
        &self,
        user_id: &str,
    ) -> impl std::future::Future<Output = Result<Option<QuotaCounter>, RepositoryError>> + Send;

    /// List a user's usage events, newest first.
    fn list_usage_events(
        &self,
        user_id: &str,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<UsageEvent>, RepositoryError>> + Send;

    /// Zero every counter whose period started before `cutoff`, stamping
    /// them with `new_period_start`. Returns the count reset.
    fn reset_expired_counters(
        &self,
        cutoff: DateTime<Utc>,
        new_period_start: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;
}

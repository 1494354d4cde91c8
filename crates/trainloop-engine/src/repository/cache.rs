//! Cache store trait definition (the durable tier of the response cache).

use chrono::{DateTime, Utc};
use trainloop_types::cache::CacheEntry;
use trainloop_types::error::RepositoryError;

/// Storage interface for the durable cache tier.
pub trait CacheStore: Send + Sync {
    /// Get an entry by key (expired entries are returned; the cache layer
    /// decides what expiry means).
    fn get(
        &self,
        key: &str,
    ) -> impl std::future::Future<Output = Result<Option<CacheEntry>, RepositoryError>> + Send;

    /// Insert or replace an entry.
    ///
    /// Replacing resets `hit_count` to the entry's value (zero for a fresh
    /// generation) -- a rewritten response starts its life over.
    fn upsert(
        &self,
        entry: &CacheEntry,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Increment an entry's hit counter.
    fn record_hit(
        &self,
        key: &str,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Delete one entry. Returns `true` if it existed.
    fn delete(
        &self,
        key: &str,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// Delete every entry whose key starts with `prefix`. Returns the count.
    fn delete_prefix(
        &self,
        prefix: &str,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;

    /// Delete entries that expired at or before `now`. Returns the count.
    fn sweep_expired(
        &self,
        now: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;
}

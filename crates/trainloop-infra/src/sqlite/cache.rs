//! SQLite cache store implementation (the durable cache tier).

use chrono::{DateTime, Utc};
use sqlx::Row;
use trainloop_engine::repository::CacheStore;
use trainloop_types::cache::{CacheEntry, CacheType, TokenUsage};
use trainloop_types::error::RepositoryError;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `CacheStore`.
pub struct SqliteCacheStore {
    pool: DatabasePool,
}

impl SqliteCacheStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Internal row type
// ---------------------------------------------------------------------------

struct CacheRow {
    key: String,
    cache_type: String,
    entity_id: String,
    payload: String,
    model: Option<String>,
    input_tokens: i64,
    output_tokens: i64,
    cached_tokens: i64,
    hit_count: i64,
    created_at: String,
    expires_at: String,
}

impl CacheRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            key: row.try_get("key")?,
            cache_type: row.try_get("cache_type")?,
            entity_id: row.try_get("entity_id")?,
            payload: row.try_get("payload")?,
            model: row.try_get("model")?,
            input_tokens: row.try_get("input_tokens")?,
            output_tokens: row.try_get("output_tokens")?,
            cached_tokens: row.try_get("cached_tokens")?,
            hit_count: row.try_get("hit_count")?,
            created_at: row.try_get("created_at")?,
            expires_at: row.try_get("expires_at")?,
        })
    }

    fn into_entry(self) -> Result<CacheEntry, RepositoryError> {
        let payload: serde_json::Value = serde_json::from_str(&self.payload)
            .map_err(|e| RepositoryError::Query(format!("invalid cache payload: {e}")))?;

        Ok(CacheEntry {
            key: self.key,
            cache_type: parse_cache_type(&self.cache_type)?,
            entity_id: self.entity_id,
            payload,
            model: self.model,
            usage: TokenUsage {
                input_tokens: self.input_tokens as u32,
                output_tokens: self.output_tokens as u32,
                cached_tokens: self.cached_tokens as u32,
            },
            hit_count: self.hit_count as u32,
            created_at: parse_datetime(&self.created_at)?,
            expires_at: parse_datetime(&self.expires_at)?,
        })
    }
}

fn parse_cache_type(s: &str) -> Result<CacheType, RepositoryError> {
    match s {
        "plan" => Ok(CacheType::Plan),
        "coach_reply" => Ok(CacheType::CoachReply),
        "snapshot" => Ok(CacheType::Snapshot),
        "session_context" => Ok(CacheType::SessionContext),
        other => Err(RepositoryError::Query(format!("invalid cache type: {other}"))),
    }
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

/// Escape LIKE wildcards so a prefix containing `%` or `_` matches literally.
fn escape_like(prefix: &str) -> String {
    prefix
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

// ---------------------------------------------------------------------------
// CacheStore impl
// ---------------------------------------------------------------------------

impl CacheStore for SqliteCacheStore {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM response_cache WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let r = CacheRow::from_row(&row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(r.into_entry()?))
            }
            None => Ok(None),
        }
    }

    async fn upsert(&self, entry: &CacheEntry) -> Result<(), RepositoryError> {
        let payload = serde_json::to_string(&entry.payload)
            .map_err(|e| RepositoryError::Query(format!("serialize cache payload: {e}")))?;

        // Replacing an entry restarts its life: hit_count comes from the
        // incoming entry, not the stored one.
        sqlx::query(
            r#"INSERT INTO response_cache
               (key, cache_type, entity_id, payload, model,
                input_tokens, output_tokens, cached_tokens, hit_count, created_at, expires_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(key) DO UPDATE SET
                 cache_type = excluded.cache_type,
                 entity_id = excluded.entity_id,
                 payload = excluded.payload,
                 model = excluded.model,
                 input_tokens = excluded.input_tokens,
                 output_tokens = excluded.output_tokens,
                 cached_tokens = excluded.cached_tokens,
                 hit_count = excluded.hit_count,
                 created_at = excluded.created_at,
                 expires_at = excluded.expires_at"#,
        )
        .bind(&entry.key)
        .bind(entry.cache_type.as_str())
        .bind(&entry.entity_id)
        .bind(&payload)
        .bind(&entry.model)
        .bind(entry.usage.input_tokens as i64)
        .bind(entry.usage.output_tokens as i64)
        .bind(entry.usage.cached_tokens as i64)
        .bind(entry.hit_count as i64)
        .bind(format_datetime(&entry.created_at))
        .bind(format_datetime(&entry.expires_at))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn record_hit(&self, key: &str) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE response_cache SET hit_count = hit_count + 1 WHERE key = ?")
            .bind(key)
            .execute(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM response_cache WHERE key = ?")
            .bind(key)
            .execute(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64, RepositoryError> {
        let pattern = format!("{}%", escape_like(prefix));
        let result = sqlx::query("DELETE FROM response_cache WHERE key LIKE ? ESCAPE '\\'")
            .bind(&pattern)
            .execute(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(result.rows_affected())
    }

    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM response_cache WHERE expires_at <= ?")
            .bind(format_datetime(&now))
            .execute(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(result.rows_affected())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

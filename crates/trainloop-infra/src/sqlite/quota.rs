//! SQLite quota store implementation.
//!
//! The audit row and the counter increment land in one transaction, so a
//! crash can never leave an event recorded without its counter bump (or the
//! reverse).

use chrono::{DateTime, Utc};
use sqlx::Row;
use trainloop_engine::repository::QuotaStore;
use trainloop_types::cache::TokenUsage;
use trainloop_types::error::RepositoryError;
use trainloop_types::quota::{QuotaCounter, UsageEvent, UsageKind, UsageSample};
use uuid::Uuid;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `QuotaStore`.
pub struct SqliteQuotaStore {
    pool: DatabasePool,
}

impl SqliteQuotaStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn parse_kind(s: &str) -> Result<UsageKind, RepositoryError> {
    match s {
        "generation" => Ok(UsageKind::Generation),
        "chat" => Ok(UsageKind::Chat),
        other => Err(RepositoryError::Query(format!("invalid usage kind: {other}"))),
    }
}

fn counter_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<QuotaCounter, RepositoryError> {
    let period_start: String = row
        .try_get("period_start")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
    let read_i64 = |name: &str| -> Result<i64, RepositoryError> {
        row.try_get(name).map_err(|e| RepositoryError::Query(e.to_string()))
    };

    Ok(QuotaCounter {
        user_id: row
            .try_get("user_id")
            .map_err(|e| RepositoryError::Query(e.to_string()))?,
        period_start: parse_datetime(&period_start)?,
        generation_count: read_i64("generation_count")? as u32,
        chat_count: read_i64("chat_count")? as u32,
        total_input_tokens: read_i64("total_input_tokens")? as u64,
        total_output_tokens: read_i64("total_output_tokens")? as u64,
        total_cost: row
            .try_get("total_cost")
            .map_err(|e| RepositoryError::Query(e.to_string()))?,
    })
}

fn event_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<UsageEvent, RepositoryError> {
    let q = |e: sqlx::Error| RepositoryError::Query(e.to_string());
    let id: String = row.try_get("id").map_err(q)?;
    let kind: String = row.try_get("kind").map_err(q)?;
    let recorded_at: String = row.try_get("recorded_at").map_err(q)?;
    let input_tokens: i64 = row.try_get("input_tokens").map_err(q)?;
    let output_tokens: i64 = row.try_get("output_tokens").map_err(q)?;
    let cached_tokens: i64 = row.try_get("cached_tokens").map_err(q)?;
    let duration_ms: i64 = row.try_get("duration_ms").map_err(q)?;
    let cache_hit: i64 = row.try_get("cache_hit").map_err(q)?;

    Ok(UsageEvent {
        id: id
            .parse::<Uuid>()
            .map_err(|e| RepositoryError::Query(format!("invalid UUID: {e}")))?,
        user_id: row.try_get("user_id").map_err(q)?,
        sample: UsageSample {
            kind: parse_kind(&kind)?,
            model: row.try_get("model").map_err(q)?,
            usage: TokenUsage {
                input_tokens: input_tokens as u32,
                output_tokens: output_tokens as u32,
                cached_tokens: cached_tokens as u32,
            },
            estimated_cost: row.try_get("estimated_cost").map_err(q)?,
            duration_ms: duration_ms as u64,
            cache_hit: cache_hit != 0,
        },
        recorded_at: parse_datetime(&recorded_at)?,
    })
}

// ---------------------------------------------------------------------------
// QuotaStore impl
// ---------------------------------------------------------------------------

impl QuotaStore for SqliteQuotaStore {
    async fn record_usage(
        &self,
        user_id: &str,
        sample: &UsageSample,
        period_start: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let event = UsageEvent::new(user_id, sample.clone());
        let (gen_inc, chat_inc) = match sample.kind {
            UsageKind::Generation => (1i64, 0i64),
            UsageKind::Chat => (0i64, 1i64),
        };
        let period = format_datetime(&period_start);

        let mut tx = self
            .pool
            .writer
            .begin()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        sqlx::query(
            r#"INSERT INTO usage_events
               (id, user_id, kind, model, input_tokens, output_tokens, cached_tokens,
                estimated_cost, duration_ms, cache_hit, recorded_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(event.id.to_string())
        .bind(user_id)
        .bind(sample.kind.as_str())
        .bind(&sample.model)
        .bind(sample.usage.input_tokens as i64)
        .bind(sample.usage.output_tokens as i64)
        .bind(sample.usage.cached_tokens as i64)
        .bind(sample.estimated_cost)
        .bind(sample.duration_ms as i64)
        .bind(sample.cache_hit as i64)
        .bind(format_datetime(&event.recorded_at))
        .execute(&mut *tx)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        // A stored counter from an older period is reset to the fresh
        // increment instead of accumulating across the boundary.
        sqlx::query(
            r#"INSERT INTO quota_counters
               (user_id, period_start, generation_count, chat_count,
                total_input_tokens, total_output_tokens, total_cost)
               VALUES (?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(user_id) DO UPDATE SET
                 generation_count = CASE WHEN quota_counters.period_start < excluded.period_start
                   THEN excluded.generation_count
                   ELSE quota_counters.generation_count + excluded.generation_count END,
                 chat_count = CASE WHEN quota_counters.period_start < excluded.period_start
                   THEN excluded.chat_count
                   ELSE quota_counters.chat_count + excluded.chat_count END,
                 total_input_tokens = CASE WHEN quota_counters.period_start < excluded.period_start
                   THEN excluded.total_input_tokens
                   ELSE quota_counters.total_input_tokens + excluded.total_input_tokens END,
                 total_output_tokens = CASE WHEN quota_counters.period_start < excluded.period_start
                   THEN excluded.total_output_tokens
                   ELSE quota_counters.total_output_tokens + excluded.total_output_tokens END,
                 total_cost = CASE WHEN quota_counters.period_start < excluded.period_start
                   THEN excluded.total_cost
                   ELSE quota_counters.total_cost + excluded.total_cost END,
                 period_start = CASE WHEN quota_counters.period_start < excluded.period_start
                   THEN excluded.period_start
                   ELSE quota_counters.period_start END"#,
        )
        .bind(user_id)
        .bind(&period)
        .bind(gen_inc)
        .bind(chat_inc)
        .bind(sample.usage.input_tokens as i64)
        .bind(sample.usage.output_tokens as i64)
        .bind(sample.estimated_cost)
        .execute(&mut *tx)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn get_counter(&self, user_id: &str) -> Result<Option<QuotaCounter>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM quota_counters WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        row.as_ref().map(counter_from_row).transpose()
    }

    async fn list_usage_events(
        &self,
        user_id: &str,
        limit: u32,
    ) -> Result<Vec<UsageEvent>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM usage_events WHERE user_id = ? ORDER BY recorded_at DESC, id DESC LIMIT ?",
        )
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        rows.iter().map(event_from_row).collect()
    }

    async fn reset_expired_counters(
        &self,
        cutoff: DateTime<Utc>,
        new_period_start: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            r#"UPDATE quota_counters SET
                 period_start = ?,
                 generation_count = 0,
                 chat_count = 0,
                 total_input_tokens = 0,
                 total_output_tokens = 0,
                 total_cost = 0
               WHERE period_start < ?"#,
        )
        .bind(format_datetime(&new_period_start))
        .bind(format_datetime(&cutoff))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(result.rows_affected())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

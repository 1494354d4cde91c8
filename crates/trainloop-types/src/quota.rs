//! Usage and quota accounting types.
//!
//! Every generation records a `UsageSample`; the store keeps both an
//! append-only audit trail (`UsageEvent`) and a rolling per-user counter
//! (`QuotaCounter`) incremented in the same transaction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cache::TokenUsage;

/// What kind of generation produced a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageKind {
    /// Structured plan or snapshot generation.
    Generation,
    /// Conversational coach chat.
    Chat,
}

impl UsageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UsageKind::Generation => "generation",
            UsageKind::Chat => "chat",
        }
    }
}

/// One recorded unit of model usage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageSample {
    pub kind: UsageKind,
    pub model: String,
    pub usage: TokenUsage,
    /// Estimated cost in dollars, from the price table.
    pub estimated_cost: f64,
    /// Wall-clock duration of the generation call.
    pub duration_ms: u64,
    /// Whether the response was served from cache (cost already sunk).
    pub cache_hit: bool,
}

/// Append-only audit record of one usage sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageEvent {
    /// UUIDv7 event ID.
    pub id: Uuid,
    pub user_id: String,
    #[serde(flatten)]
    pub sample: UsageSample,
    pub recorded_at: DateTime<Utc>,
}

impl UsageEvent {
    pub fn new(user_id: impl Into<String>, sample: UsageSample) -> Self {
        Self {
            id: Uuid::now_v7(),
            user_id: user_id.into(),
            sample,
            recorded_at: Utc::now(),
        }
    }
}

/// Rolling per-user counters for the current quota period.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaCounter {
    pub user_id: String,
    /// Start of the period these counters cover.
    pub period_start: DateTime<Utc>,
    pub generation_count: u32,
    pub chat_count: u32,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    /// Accumulated estimated cost in dollars.
    pub total_cost: f64,
}

impl QuotaCounter {
    /// Fresh zeroed counter for a new period.
    pub fn fresh(user_id: impl Into<String>, period_start: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            period_start,
            generation_count: 0,
            chat_count: 0,
            total_input_tokens: 0,
            total_output_tokens: 0,
            total_cost: 0.0,
        }
    }
}

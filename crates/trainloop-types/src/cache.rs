//! Response cache domain types.
//!
//! A cached entry is the durable record of one expensive generated response:
//! the payload, the token usage that produced it, and its expiry. Entries are
//! keyed by a structured string (`"{type}:{entity}:{context_hash}"`) built in
//! the engine crate so entity-wide invalidation can match on prefix.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Cache types
// ---------------------------------------------------------------------------

/// What kind of generated response an entry holds. Each type carries its own
/// default time-to-live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheType {
    /// A generated training plan. Plans are regenerated weekly at most.
    Plan,
    /// A conversational coach reply.
    CoachReply,
    /// A computed progress snapshot.
    Snapshot,
    /// Assembled per-session context (entitlements, preferences).
    SessionContext,
}

impl CacheType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheType::Plan => "plan",
            CacheType::CoachReply => "coach_reply",
            CacheType::Snapshot => "snapshot",
            CacheType::SessionContext => "session_context",
        }
    }

    /// Default TTL for this cache type.
    pub fn default_ttl(&self) -> Duration {
        match self {
            CacheType::Plan => Duration::days(7),
            CacheType::CoachReply => Duration::hours(24),
            CacheType::Snapshot => Duration::hours(1),
            CacheType::SessionContext => Duration::minutes(15),
        }
    }
}

// ---------------------------------------------------------------------------
// Token usage
// ---------------------------------------------------------------------------

/// Token counts reported for one generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    /// Prompt tokens served from the provider's prompt cache.
    #[serde(default)]
    pub cached_tokens: u32,
}

impl TokenUsage {
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
            cached_tokens: 0,
        }
    }

    pub fn total(&self) -> u64 {
        u64::from(self.input_tokens) + u64::from(self.output_tokens)
    }
}

// ---------------------------------------------------------------------------
// Cache entry
// ---------------------------------------------------------------------------

/// One cached response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Structured key: `"{type}:{entity_id}:{context_hash}"`.
    pub key: String,
    pub cache_type: CacheType,
    /// The entity (usually a user) the response belongs to.
    pub entity_id: String,
    /// The cached response payload.
    pub payload: serde_json::Value,
    /// Model that generated the payload, when one did.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Token usage of the original generation. Used to compute the cost a
    /// cache hit avoided.
    #[serde(default)]
    pub usage: TokenUsage,
    /// Times this entry has been served.
    #[serde(default)]
    pub hit_count: u32,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Remaining lifetime at `now`. Zero when expired.
    pub fn remaining_ttl(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).max(Duration::zero())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

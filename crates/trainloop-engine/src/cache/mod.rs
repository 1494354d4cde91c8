//! Two-tier response cache for expensive generated content.
//!
//! Tier 1 is an in-process LRU; tier 2 is the durable `CacheStore`. Reads
//! check tier 1, fall through to tier 2, and warm tier 1 with whatever TTL
//! the entry has left. Durable writes happen on detached tasks so a slow
//! store never blocks the caller. A per-key single-flight guard collapses
//! concurrent misses into one generation call.
//!
//! The cache never fails its caller: store errors are logged and treated as
//! misses.

pub mod key;

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{Duration, Utc};
use dashmap::DashMap;
use lru::LruCache;
use serde_json::Value;
use trainloop_types::cache::{CacheEntry, CacheType, TokenUsage};
use trainloop_types::config::CacheSettings;

use crate::generate::{GenerateError, Generated, Generator, StructuredPrompt};
use crate::pricing::PriceTable;
use crate::repository::CacheStore;

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Point-in-time cache statistics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Estimated spend avoided by serving hits instead of regenerating, USD.
    pub cost_saved: f64,
}

// ---------------------------------------------------------------------------
// Read/generate outcome
// ---------------------------------------------------------------------------

/// Result of a `get_or_generate` call.
#[derive(Debug, Clone)]
pub struct CacheOutcome {
    pub key: String,
    pub payload: Value,
    pub model: Option<String>,
    pub usage: TokenUsage,
    /// Whether the payload was served from cache.
    pub cache_hit: bool,
}

// ---------------------------------------------------------------------------
// ResponseCache
// ---------------------------------------------------------------------------

/// The two-tier response cache.
pub struct ResponseCache<S> {
    tier1: Mutex<LruCache<String, CacheEntry>>,
    store: Arc<S>,
    /// Per-key single-flight guards for `get_or_generate`.
    inflight: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    /// TTL overrides in seconds, keyed by cache type name.
    ttl_overrides: HashMap<String, u64>,
    pricing: PriceTable,

    hits: AtomicU64,
    misses: AtomicU64,
    /// Accumulated in microdollars so the counter can stay atomic.
    cost_saved_microdollars: AtomicU64,
}

impl<S: CacheStore + 'static> ResponseCache<S> {
    pub fn new(store: Arc<S>, settings: &CacheSettings, pricing: PriceTable) -> Self {
        let capacity = NonZeroUsize::new(settings.tier1_capacity.max(1))
            .unwrap_or(NonZeroUsize::MIN);
        Self {
            tier1: Mutex::new(LruCache::new(capacity)),
            store,
            inflight: DashMap::new(),
            ttl_overrides: settings.ttl_overrides.clone(),
            pricing,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            cost_saved_microdollars: AtomicU64::new(0),
        }
    }

    /// Effective TTL for a cache type (configured override or built-in
    /// default).
    pub fn ttl_for(&self, cache_type: CacheType) -> Duration {
        match self.ttl_overrides.get(cache_type.as_str()) {
            Some(secs) => Duration::seconds(*secs as i64),
            None => cache_type.default_ttl(),
        }
    }

    /// Look up an entry by key. Expired entries are never served.
    pub async fn get(&self, key: &str) -> Option<CacheEntry> {
        let now = Utc::now();

        // Tier 1.
        let tier1_hit = {
            let mut tier1 = self.lock_tier1();
            match tier1.get_mut(key) {
                Some(entry) if entry.is_expired(now) => {
                    tier1.pop(key);
                    None
                }
                Some(entry) => {
                    entry.hit_count += 1;
                    Some(entry.clone())
                }
                None => None,
            }
        };
        if let Some(entry) = tier1_hit {
            self.note_hit(&entry);
            return Some(entry);
        }

        // Tier 2.
        let stored = match self.store.get(key).await {
            Ok(found) => found,
            Err(err) => {
                tracing::warn!(%key, error = %err, "cache store read failed, treating as miss");
                None
            }
        };

        match stored {
            Some(mut entry) if !entry.is_expired(now) => {
                entry.hit_count += 1;
                self.lock_tier1().put(key.to_string(), entry.clone());
                self.note_hit(&entry);
                Some(entry)
            }
            _ => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store a generated response under its structured key. Returns the key.
    ///
    /// Tier 1 is written synchronously; the durable write is a detached
    /// task whose failure is logged and otherwise ignored.
    pub fn set(
        &self,
        cache_type: CacheType,
        entity_id: &str,
        context: &Value,
        payload: Value,
        model: Option<String>,
        usage: TokenUsage,
    ) -> String {
        let cache_key = key::build_key(cache_type, entity_id, context);
        let now = Utc::now();
        let entry = CacheEntry {
            key: cache_key.clone(),
            cache_type,
            entity_id: entity_id.to_string(),
            payload,
            model,
            usage,
            hit_count: 0,
            created_at: now,
            expires_at: now + self.ttl_for(cache_type),
        };

        self.lock_tier1().put(cache_key.clone(), entry.clone());

        let store = self.store.clone();
        tokio::spawn(async move {
            if let Err(err) = store.upsert(&entry).await {
                tracing::warn!(key = %entry.key, error = %err, "cache store write failed");
            }
        });

        cache_key
    }

    /// Serve from cache or run the generator exactly once per key.
    ///
    /// The prompt's context is the cache key input: identical contexts for
    /// the same (type, entity) share one entry. Concurrent misses for the
    /// same key queue on a per-key guard so only the first caller generates.
    pub async fn get_or_generate<G: Generator>(
        &self,
        cache_type: CacheType,
        entity_id: &str,
        prompt: &StructuredPrompt,
        generator: &G,
    ) -> Result<CacheOutcome, GenerateError> {
        let cache_key = key::build_key(cache_type, entity_id, &prompt.context);

        if let Some(entry) = self.get(&cache_key).await {
            return Ok(hit_outcome(entry));
        }

        let guard = self
            .inflight
            .entry(cache_key.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let _held = guard.lock().await;

        // A concurrent caller may have generated while we queued.
        if let Some(entry) = self.get(&cache_key).await {
            return Ok(hit_outcome(entry));
        }

        let Generated {
            result,
            usage,
            model,
        } = generator.generate(prompt).await?;

        self.set(
            cache_type,
            entity_id,
            &prompt.context,
            result.clone(),
            Some(model.clone()),
            usage,
        );
        drop(_held);
        self.inflight.remove(&cache_key);

        Ok(CacheOutcome {
            key: cache_key,
            payload: result,
            model: Some(model),
            usage,
            cache_hit: false,
        })
    }

    /// Drop one key from both tiers. Returns whether the durable tier held it.
    pub async fn invalidate(&self, key: &str) -> bool {
        self.lock_tier1().pop(key);
        match self.store.delete(key).await {
            Ok(existed) => existed,
            Err(err) => {
                tracing::warn!(%key, error = %err, "cache delete failed");
                false
            }
        }
    }

    /// Drop every entry of one type for one entity from both tiers.
    /// Returns the number of durable entries removed.
    pub async fn invalidate_entity(&self, cache_type: CacheType, entity_id: &str) -> u64 {
        let prefix = key::entity_prefix(cache_type, entity_id);

        {
            let mut tier1 = self.lock_tier1();
            let doomed: Vec<String> = tier1
                .iter()
                .filter(|(k, _)| k.starts_with(&prefix))
                .map(|(k, _)| k.clone())
                .collect();
            for k in doomed {
                tier1.pop(&k);
            }
        }

        match self.store.delete_prefix(&prefix).await {
            Ok(count) => count,
            Err(err) => {
                tracing::warn!(%prefix, error = %err, "cache prefix delete failed");
                0
            }
        }
    }

    /// Delete expired durable entries and drop the in-process tier entirely
    /// (it repopulates on demand). Returns the durable count removed.
    pub async fn sweep_expired(&self) -> u64 {
        self.lock_tier1().clear();
        match self.store.sweep_expired(Utc::now()).await {
            Ok(count) => count,
            Err(err) => {
                tracing::warn!(error = %err, "cache expiry sweep failed");
                0
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            cost_saved: self.cost_saved_microdollars.load(Ordering::Relaxed) as f64 / 1e6,
        }
    }

    fn note_hit(&self, entry: &CacheEntry) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        if let Some(model) = &entry.model {
            let saved = self.pricing.estimate_cost(model, &entry.usage);
            let micro = (saved * 1e6).round().max(0.0) as u64;
            self.cost_saved_microdollars.fetch_add(micro, Ordering::Relaxed);
        }

        let store = self.store.clone();
        let key = entry.key.clone();
        tokio::spawn(async move {
            if let Err(err) = store.record_hit(&key).await {
                tracing::debug!(%key, error = %err, "cache hit-count touch failed");
            }
        });
    }

    fn lock_tier1(&self) -> std::sync::MutexGuard<'_, LruCache<String, CacheEntry>> {
        match self.tier1.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn hit_outcome(entry: CacheEntry) -> CacheOutcome {
    CacheOutcome {
        key: entry.key,
        payload: entry.payload,
        model: entry.model,
        usage: entry.usage,
        cache_hit: true,
    }
}

//! Structured cache key construction.
//!
//! Keys have the shape `"{type}:{entity_id}:{context_hash}"` where the
//! context hash is position-independent: JSON objects are canonicalized
//! (keys sorted recursively) before hashing, so two contexts that differ
//! only in key order produce the same key.

use serde_json::Value;
use sha2::{Digest, Sha256};
use trainloop_types::cache::CacheType;

/// Hex characters kept from the SHA-256 context digest.
const HASH_LEN: usize = 16;

/// Build the cache key for a (type, entity, context) triple.
pub fn build_key(cache_type: CacheType, entity_id: &str, context: &Value) -> String {
    format!(
        "{}:{}:{}",
        cache_type.as_str(),
        entity_id,
        context_hash(context)
    )
}

/// Key prefix covering every entry of one type for one entity.
///
/// The trailing colon stops `entity_id = "user-1"` from also matching
/// `"user-10"` entries.
pub fn entity_prefix(cache_type: CacheType, entity_id: &str) -> String {
    format!("{}:{}:", cache_type.as_str(), entity_id)
}

/// Truncated hex SHA-256 of the canonical JSON rendering of `context`.
pub fn context_hash(context: &Value) -> String {
    let canonical = canonical_json(context);
    let digest = Sha256::digest(canonical.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    hex[..HASH_LEN].to_string()
}

/// Render JSON with object keys sorted recursively.
///
/// Array order is preserved: `[a, b]` and `[b, a]` are different contexts.
fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let fields: Vec<String> = keys
                .into_iter()
                .map(|k| {
                    format!(
                        "{}:{}",
                        serde_json::to_string(k).unwrap_or_default(),
                        canonical_json(&map[k])
                    )
                })
                .collect();
            format!("{{{}}}", fields.join(","))
        }
        Value::Array(items) => {
            let rendered: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", rendered.join(","))
        }
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

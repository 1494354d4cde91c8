//! Progress snapshot refresh.
//!
//! Triggered by `GoalUpdated` row changes with a 30-second debounce: an
//! import or a burst of edits to the same user's goals collapses into one
//! recompute of the snapshot, which is stored in the durable cache under
//! the Snapshot TTL.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{Value, json};
use trainloop_engine::cache::ResponseCache;
use trainloop_engine::repository::cache::CacheStore;
use trainloop_engine::workflow::definition::{Step, Workflow};
use trainloop_types::cache::{CacheType, TokenUsage};
use trainloop_types::error::StepError;
use trainloop_types::event::{EventName, RowChange};
use trainloop_types::workflow::{PolicyConfig, WorkflowDefinition};

/// Quiet period before a snapshot recompute starts.
const DEBOUNCE_SECS: u64 = 30;

pub struct SnapshotWorkflow<S> {
    definition: WorkflowDefinition,
    cache: Arc<ResponseCache<S>>,
}

impl<S: CacheStore + 'static> SnapshotWorkflow<S> {
    pub fn new(cache: Arc<ResponseCache<S>>) -> Self {
        Self {
            definition: WorkflowDefinition::on_event("progress-snapshot", EventName::GoalUpdated)
                .with_description("Recompute a user's progress snapshot after goal changes")
                .with_policy(PolicyConfig::default().with_debounce(DEBOUNCE_SECS)),
            cache,
        }
    }
}

impl<S: CacheStore + 'static> Workflow for SnapshotWorkflow<S> {
    fn definition(&self) -> &WorkflowDefinition {
        &self.definition
    }

    fn steps(&self) -> Vec<Step> {
        let cache = self.cache.clone();
        vec![
            Step::compute("recompute-snapshot", |ctx| async move {
                let change = ctx.event.as_row_change().ok_or_else(|| {
                    StepError::Invalid("goal_updated payload is not a row change".into())
                })?;
                compute_snapshot(&change)
            }),
            Step::compute("store-snapshot", move |ctx| {
                let cache = cache.clone();
                async move {
                    let snapshot = ctx.require_output("recompute-snapshot")?.clone();
                    let goal_id = snapshot["goal_id"].clone();
                    let key = cache.set(
                        CacheType::Snapshot,
                        &ctx.event.entity_id,
                        &json!({"goal_id": goal_id}),
                        snapshot,
                        None,
                        TokenUsage::default(),
                    );
                    Ok(json!({"cache_key": key}))
                }
            }),
        ]
    }
}

/// Derive the stored snapshot from a goal row change.
///
/// Deletes produce a tombstone snapshot so a stale cached one cannot keep
/// reporting progress against a goal that no longer exists.
fn compute_snapshot(change: &RowChange) -> Result<Value, StepError> {
    let refreshed_at = Utc::now().to_rfc3339();

    let Some(row) = change.after.as_ref().or(change.before.as_ref()) else {
        return Err(StepError::Invalid("row change carries no row".into()));
    };
    let goal_id = row["goal_id"]
        .as_str()
        .ok_or_else(|| StepError::Invalid("goal row has no goal_id".into()))?;

    if change.after.is_none() {
        return Ok(json!({
            "goal_id": goal_id,
            "deleted": true,
            "refreshed_at": refreshed_at,
        }));
    }

    let target = row["target"].as_f64().unwrap_or(0.0);
    let current = row["current"].as_f64().unwrap_or(0.0);
    let percent = if target > 0.0 {
        ((current / target) * 100.0).clamp(0.0, 100.0)
    } else {
        0.0
    };

    Ok(json!({
        "goal_id": goal_id,
        "name": row["name"].as_str().unwrap_or(""),
        "target": target,
        "current": current,
        "percent_complete": percent,
        "completed": row["completed"].as_bool().unwrap_or(false),
        "deleted": false,
        "refreshed_at": refreshed_at,
    }))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Nightly maintenance.
//!
//! Cron-triggered housekeeping at 03:00: sweep expired cache entries,
//! reset quota counters whose period lapsed, and log cache statistics.
//! Concurrency 1 so an overrunning sweep and the next tick queue instead
//! of racing the same range deletes.

use std::sync::Arc;

use serde_json::json;
use trainloop_engine::cache::ResponseCache;
use trainloop_engine::pricing::format_cost;
use trainloop_engine::repository::cache::CacheStore;
use trainloop_engine::repository::quota::QuotaStore;
use trainloop_engine::usage::UsageTracker;
use trainloop_engine::workflow::definition::{Step, Workflow};
use trainloop_types::workflow::{PolicyConfig, WorkflowDefinition};

/// Fires at 03:00 every day.
pub const NIGHTLY_SCHEDULE: &str = "0 0 3 * * *";

pub struct MaintenanceWorkflow<S, Q> {
    definition: WorkflowDefinition,
    cache: Arc<ResponseCache<S>>,
    tracker: Arc<UsageTracker<Q>>,
}

impl<S, Q> MaintenanceWorkflow<S, Q>
where
    S: CacheStore + 'static,
    Q: QuotaStore + 'static,
{
    pub fn new(cache: Arc<ResponseCache<S>>, tracker: Arc<UsageTracker<Q>>) -> Self {
        Self {
            definition: WorkflowDefinition::cron("nightly-maintenance", NIGHTLY_SCHEDULE)
                .with_description("Cache sweep, quota period reset, stats")
                .with_policy(
                    PolicyConfig::default().with_max_attempts(2).with_concurrency(1),
                ),
            cache,
            tracker,
        }
    }
}

impl<S, Q> Workflow for MaintenanceWorkflow<S, Q>
where
    S: CacheStore + 'static,
    Q: QuotaStore + 'static,
{
    fn definition(&self) -> &WorkflowDefinition {
        &self.definition
    }

    fn steps(&self) -> Vec<Step> {
        let cache = self.cache.clone();
        let stats_cache = self.cache.clone();
        let tracker = self.tracker.clone();

        vec![
            Step::compute("sweep-cache", move |_ctx| {
                let cache = cache.clone();
                async move {
                    let swept = cache.sweep_expired().await;
                    tracing::info!(swept, "expired cache entries swept");
                    Ok(json!({"swept": swept}))
                }
            }),
            Step::compute("reset-quota-periods", move |_ctx| {
                let tracker = tracker.clone();
                async move {
                    let reset = tracker.reset_lapsed_counters().await;
                    tracing::info!(reset, "lapsed quota counters reset");
                    Ok(json!({"reset": reset}))
                }
            }),
            Step::compute("log-stats", move |_ctx| {
                let cache = stats_cache.clone();
                async move {
                    let stats = cache.stats();
                    tracing::info!(
                        hits = stats.hits,
                        misses = stats.misses,
                        cost_saved = %format_cost(stats.cost_saved),
                        "response cache statistics"
                    );
                    Ok(json!({
                        "hits": stats.hits,
                        "misses": stats.misses,
                        "cost_saved": stats.cost_saved,
                    }))
                }
            }),
        ]
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use trainloop_engine::event::EventBus;
    use trainloop_engine::pricing::PriceTable;
    use trainloop_engine::repository::memory::{
        InMemoryCacheStore, InMemoryQuotaStore, InMemoryRunRepository,
    };
    use trainloop_engine::workflow::executor::{NullSink, StepExecutor};
    use trainloop_engine::workflow::retry::RetryPolicy;
    use trainloop_types::config::CacheSettings;
    use trainloop_types::event::Event;
    use trainloop_types::workflow::{RunStatus, TriggerConfig};

    fn fixture() -> (
        MaintenanceWorkflow<InMemoryCacheStore, InMemoryQuotaStore>,
        StepExecutor<InMemoryRunRepository>,
    ) {
        let cache = Arc::new(ResponseCache::new(
            Arc::new(InMemoryCacheStore::new()),
            &CacheSettings::default(),
            PriceTable::default(),
        ));
        let tracker = Arc::new(UsageTracker::new(Arc::new(InMemoryQuotaStore::new()), 30));
        let workflow = MaintenanceWorkflow::new(cache, tracker);
        let executor = StepExecutor::new(
            Arc::new(InMemoryRunRepository::new()),
            EventBus::default(),
            RetryPolicy::default(),
            Arc::new(NullSink),
        );
        (workflow, executor)
    }

    #[test]
    fn definition_is_a_serialized_nightly_cron() {
        let (workflow, _) = fixture();
        let def = workflow.definition();
        assert!(matches!(
            &def.trigger,
            TriggerConfig::Cron { schedule } if schedule == NIGHTLY_SCHEDULE
        ));
        assert_eq!(def.policy.concurrency, Some(1));
        assert_eq!(def.policy.max_attempts, 2);
    }

    #[tokio::test]
    async fn tick_runs_all_housekeeping_steps() {
        let (workflow, executor) = fixture();
        let event = Event::cron_tick("nightly-maintenance", Utc::now());
        let outcome = executor.run(&workflow, event).await.unwrap();

        assert_eq!(outcome.status, RunStatus::Completed);
        assert_eq!(outcome.outputs["sweep-cache"]["swept"], 0);
        assert_eq!(outcome.outputs["reset-quota-periods"]["reset"], 0);
        assert_eq!(outcome.outputs["log-stats"]["hits"], 0);
    }
}

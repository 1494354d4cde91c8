//! Trial lifecycle.
//!
//! Triggered by `TrialStarted`. The run records the trial, arms a durable
//! timer until the trial's end, then flips the entitlement (by dropping the
//! user's cached session context so the next request rebuilds it) and sends
//! the expiry reminder. The timer survives restarts: a resumed run sleeps
//! only the remainder.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use trainloop_engine::cache::ResponseCache;
use trainloop_engine::repository::cache::CacheStore;
use trainloop_engine::workflow::definition::{Step, Workflow};
use trainloop_types::cache::CacheType;
use trainloop_types::error::StepError;
use trainloop_types::event::EventName;
use trainloop_types::workflow::WorkflowDefinition;

use crate::collaborators::{Notification, Notifier};

pub struct BillingWorkflow<S, N> {
    definition: WorkflowDefinition,
    cache: Arc<ResponseCache<S>>,
    notifier: Arc<N>,
}

impl<S, N> BillingWorkflow<S, N>
where
    S: CacheStore + 'static,
    N: Notifier + 'static,
{
    pub fn new(cache: Arc<ResponseCache<S>>, notifier: Arc<N>) -> Self {
        Self {
            definition: WorkflowDefinition::on_event("trial-lifecycle", EventName::TrialStarted)
                .with_description("Expire a trial entitlement when the trial period ends"),
            cache,
            notifier,
        }
    }
}

impl<S, N> Workflow for BillingWorkflow<S, N>
where
    S: CacheStore + 'static,
    N: Notifier + 'static,
{
    fn definition(&self) -> &WorkflowDefinition {
        &self.definition
    }

    fn steps(&self) -> Vec<Step> {
        let cache = self.cache.clone();
        let notifier = self.notifier.clone();

        vec![
            Step::compute("record-trial", |ctx| async move {
                let payload = &ctx.event.payload;
                let user_id = payload["user_id"]
                    .as_str()
                    .unwrap_or(&ctx.event.entity_id)
                    .to_string();
                if user_id.is_empty() {
                    return Err(StepError::Invalid("trial_started has no user identity".into()));
                }
                let trial_ends_at = parse_trial_end(payload)?;
                Ok(json!({
                    "user_id": user_id,
                    "trial_ends_at": trial_ends_at.to_rfc3339(),
                }))
            }),
            Step::sleep_until("await-trial-end", |ctx| {
                let recorded = ctx.require_output("record-trial")?;
                parse_trial_end(recorded)
            }),
            Step::compute("expire-entitlement", move |ctx| {
                let cache = cache.clone();
                async move {
                    let recorded = ctx.require_output("record-trial")?;
                    let user_id = recorded["user_id"]
                        .as_str()
                        .ok_or_else(|| StepError::Invalid("trial record lost user_id".into()))?;
                    let invalidated = cache
                        .invalidate_entity(CacheType::SessionContext, user_id)
                        .await;
                    tracing::info!(user = %user_id, invalidated, "trial entitlement expired");
                    Ok(json!({
                        "user_id": user_id,
                        "entitlement": "free",
                        "invalidated": invalidated,
                    }))
                }
            }),
            Step::compute("send-reminder", move |ctx| {
                let notifier = notifier.clone();
                async move {
                    let recorded = ctx.require_output("record-trial")?;
                    let user_id = recorded["user_id"]
                        .as_str()
                        .ok_or_else(|| StepError::Invalid("trial record lost user_id".into()))?;
                    let notification = Notification::new(
                        user_id,
                        "Your trial has ended",
                        "Your coaching trial is over. Upgrade to keep your plan updating weekly.",
                    );
                    notifier.notify(&notification).await?;
                    Ok(json!({"sent": true}))
                }
            }),
        ]
    }
}

/// Pull `trial_ends_at` out of a payload or step output.
fn parse_trial_end(value: &serde_json::Value) -> Result<DateTime<Utc>, StepError> {
    let raw = value["trial_ends_at"]
        .as_str()
        .ok_or_else(|| StepError::Invalid("trial_started has no trial_ends_at".into()))?;
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StepError::Invalid(format!("trial_ends_at is not a timestamp: {e}")))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use trainloop_engine::event::EventBus;
    use trainloop_engine::pricing::PriceTable;
    use trainloop_engine::repository::memory::{InMemoryCacheStore, InMemoryRunRepository};
    use trainloop_engine::workflow::executor::{NullSink, StepExecutor};
    use trainloop_engine::workflow::retry::RetryPolicy;
    use trainloop_types::cache::TokenUsage;
    use trainloop_types::config::CacheSettings;
    use trainloop_types::event::Event;
    use trainloop_types::workflow::RunStatus;

    use crate::collaborators::LogNotifier;

    fn cache() -> Arc<ResponseCache<InMemoryCacheStore>> {
        Arc::new(ResponseCache::new(
            Arc::new(InMemoryCacheStore::new()),
            &CacheSettings::default(),
            PriceTable::default(),
        ))
    }

    fn executor() -> StepExecutor<InMemoryRunRepository> {
        StepExecutor::new(
            Arc::new(InMemoryRunRepository::new()),
            EventBus::default(),
            RetryPolicy::default(),
            Arc::new(NullSink),
        )
    }

    fn trial_event(user_id: &str, ends_at: DateTime<Utc>) -> Event {
        Event::new(
            EventName::TrialStarted,
            user_id,
            json!({
                "user_id": user_id,
                "trial_ends_at": ends_at.to_rfc3339(),
            }),
        )
    }

    #[test]
    fn parse_trial_end_rejects_garbage() {
        assert!(parse_trial_end(&json!({"trial_ends_at": "soon"})).is_err());
        assert!(parse_trial_end(&json!({})).is_err());
        let parsed = parse_trial_end(&json!({
            "trial_ends_at": "2026-09-15T00:00:00Z",
        }))
        .unwrap();
        assert_eq!(parsed.to_rfc3339(), "2026-09-15T00:00:00+00:00");
    }

    #[tokio::test]
    async fn elapsed_trial_expires_and_invalidates_session_context() {
        let cache = cache();
        // Seed a cached session context that must disappear on expiry.
        cache.set(
            CacheType::SessionContext,
            "user-3",
            &json!({"session": 1}),
            json!({"entitlement": "trial"}),
            None,
            TokenUsage::default(),
        );
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let workflow = BillingWorkflow::new(cache.clone(), Arc::new(LogNotifier));
        let ends_at = Utc::now() - Duration::seconds(1);
        let outcome = executor()
            .run(&workflow, trial_event("user-3", ends_at))
            .await
            .unwrap();

        assert_eq!(outcome.status, RunStatus::Completed);
        assert_eq!(outcome.outputs["expire-entitlement"]["entitlement"], "free");
        assert_eq!(outcome.outputs["expire-entitlement"]["invalidated"], 1);
        assert_eq!(outcome.outputs["send-reminder"]["sent"], true);
    }

    #[tokio::test]
    async fn missing_deadline_fails_fatally_without_sleeping() {
        let workflow = BillingWorkflow::new(cache(), Arc::new(LogNotifier));
        let event = Event::new(EventName::TrialStarted, "user-4", json!({"user_id": "user-4"}));
        let outcome = executor().run(&workflow, event).await.unwrap();

        assert_eq!(outcome.status, RunStatus::Failed);
        assert_eq!(outcome.attempts, 1);
        let error = outcome.error.unwrap();
        assert!(error.contains("trial_ends_at"));
    }

    #[tokio::test(start_paused = true)]
    async fn timer_holds_the_run_until_the_deadline() {
        let workflow = Arc::new(BillingWorkflow::new(cache(), Arc::new(LogNotifier)));
        let executor = Arc::new(executor());
        let ends_at = Utc::now() + Duration::seconds(30);

        let handle = {
            let workflow = workflow.clone();
            let executor = executor.clone();
            tokio::spawn(async move {
                executor
                    .run(workflow.as_ref(), trial_event("user-5", ends_at))
                    .await
            })
        };

        // Not yet done while the timer is armed.
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        assert!(!handle.is_finished());

        tokio::time::sleep(std::time::Duration::from_secs(35)).await;
        let outcome = handle.await.unwrap().unwrap();
        assert_eq!(outcome.status, RunStatus::Completed);
        assert_eq!(outcome.outputs["await-trial-end"], json!({"slept": true}));
    }
}

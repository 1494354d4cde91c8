//! Plan generation pipeline.
//!
//! Triggered by `PlanRequested`. Three steps: assemble the prompt context
//! from the client's training history (prescribed weights, recovery state),
//! generate the plan through the response cache, and announce the result.
//! The generation step records a usage sample whether the plan came from
//! the cache or the model; tracking failures never fail the run.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use trainloop_engine::cache::ResponseCache;
use trainloop_engine::generate::{Generator, StructuredPrompt};
use trainloop_engine::pricing::PriceTable;
use trainloop_engine::repository::cache::CacheStore;
use trainloop_engine::repository::quota::QuotaStore;
use trainloop_engine::usage::UsageTracker;
use trainloop_engine::workflow::definition::{Step, Workflow};
use trainloop_types::cache::CacheType;
use trainloop_types::error::StepError;
use trainloop_types::event::{Event, EventName};
use trainloop_types::quota::{UsageKind, UsageSample};
use trainloop_types::workflow::{PolicyConfig, WorkflowDefinition};

use crate::domain::{MuscleGroup, PrSample, RecoveryWindow, prescribe};

/// Training intensity applied when the request does not specify one.
const DEFAULT_INTENSITY: f64 = 0.8;

/// Sessions per week when the request does not specify.
const DEFAULT_SESSIONS: u64 = 3;

pub struct PlanWorkflow<S, Q, G> {
    definition: WorkflowDefinition,
    cache: Arc<ResponseCache<S>>,
    tracker: Arc<UsageTracker<Q>>,
    pricing: PriceTable,
    generator: Arc<G>,
}

impl<S, Q, G> PlanWorkflow<S, Q, G>
where
    S: CacheStore + 'static,
    Q: QuotaStore + 'static,
    G: Generator + 'static,
{
    pub fn new(
        cache: Arc<ResponseCache<S>>,
        tracker: Arc<UsageTracker<Q>>,
        pricing: PriceTable,
        generator: Arc<G>,
    ) -> Self {
        Self {
            definition: WorkflowDefinition::on_event("plan-generation", EventName::PlanRequested)
                .with_description("Generate a weekly training plan from logged history")
                .with_policy(PolicyConfig::default().with_max_attempts(3).with_concurrency(4)),
            cache,
            tracker,
            pricing,
            generator,
        }
    }
}

impl<S, Q, G> Workflow for PlanWorkflow<S, Q, G>
where
    S: CacheStore + 'static,
    Q: QuotaStore + 'static,
    G: Generator + 'static,
{
    fn definition(&self) -> &WorkflowDefinition {
        &self.definition
    }

    fn steps(&self) -> Vec<Step> {
        let cache = self.cache.clone();
        let tracker = self.tracker.clone();
        let pricing = self.pricing.clone();
        let generator = self.generator.clone();

        vec![
            Step::compute("build-context", |ctx| async move {
                build_plan_context(&ctx.event.payload, &ctx.event.entity_id, Utc::now())
            }),
            Step::compute("generate-plan", move |ctx| {
                let cache = cache.clone();
                let tracker = tracker.clone();
                let pricing = pricing.clone();
                let generator = generator.clone();
                async move {
                    let context = ctx.require_output("build-context")?.clone();
                    let user_id = context["user_id"]
                        .as_str()
                        .ok_or_else(|| StepError::Invalid("plan context lost user_id".into()))?
                        .to_string();

                    let prompt = StructuredPrompt::new(
                        "Produce a weekly training plan honoring the prescribed \
                         working weights and recovery state.",
                        context,
                    );

                    let started = Instant::now();
                    let outcome = cache
                        .get_or_generate(CacheType::Plan, &user_id, &prompt, generator.as_ref())
                        .await?;
                    let duration_ms = started.elapsed().as_millis() as u64;

                    let model = outcome.model.clone().unwrap_or_default();
                    let estimated_cost = if outcome.cache_hit {
                        0.0
                    } else {
                        pricing.estimate_cost(&model, &outcome.usage)
                    };
                    tracker
                        .record(
                            &user_id,
                            UsageSample {
                                kind: UsageKind::Generation,
                                model: model.clone(),
                                usage: outcome.usage,
                                estimated_cost,
                                duration_ms,
                                cache_hit: outcome.cache_hit,
                            },
                        )
                        .await;

                    Ok(json!({
                        "user_id": user_id,
                        "plan": outcome.payload,
                        "model": model,
                        "cache_hit": outcome.cache_hit,
                        "cache_key": outcome.key,
                    }))
                }
            }),
            Step::emit("publish-plan", |ctx| {
                let generated = ctx.require_output("generate-plan")?;
                let user_id = generated["user_id"]
                    .as_str()
                    .ok_or_else(|| StepError::Invalid("generated plan lost user_id".into()))?;
                Ok(vec![Event::new(
                    EventName::PlanGenerated,
                    user_id,
                    json!({
                        "user_id": user_id,
                        "plan": generated["plan"],
                        "cache_hit": generated["cache_hit"],
                    }),
                )])
            }),
        ]
    }
}

/// Build the generation context from a `PlanRequested` payload.
///
/// The payload carries the client's logged history:
/// `{user_id, focus, sessions_per_week, intensity,
///   history: [{exercise, muscle_group, weight_kg, reps, logged_at}]}`.
/// Unknown muscle groups and malformed history entries are skipped rather
/// than failing the run; a plan from partial history beats no plan.
fn build_plan_context(
    payload: &Value,
    entity_id: &str,
    now: DateTime<Utc>,
) -> Result<Value, StepError> {
    let user_id = payload["user_id"].as_str().unwrap_or(entity_id);
    if user_id.is_empty() {
        return Err(StepError::Invalid("plan request has no user identity".into()));
    }

    let intensity = payload["intensity"].as_f64().unwrap_or(DEFAULT_INTENSITY);
    let sessions_per_week = payload["sessions_per_week"]
        .as_u64()
        .unwrap_or(DEFAULT_SESSIONS);

    let mut samples: std::collections::BTreeMap<String, Vec<PrSample>> = Default::default();
    let mut last_worked: std::collections::BTreeMap<MuscleGroup, DateTime<Utc>> = Default::default();

    for entry in payload["history"].as_array().into_iter().flatten() {
        let Some(exercise) = entry["exercise"].as_str() else {
            continue;
        };
        if let (Some(weight_kg), Some(reps)) =
            (entry["weight_kg"].as_f64(), entry["reps"].as_u64())
        {
            samples.entry(exercise.to_string()).or_default().push(PrSample {
                weight_kg,
                reps: reps as u32,
            });
        }

        let group = entry["muscle_group"]
            .as_str()
            .and_then(|raw| raw.parse::<MuscleGroup>().ok());
        let logged_at = entry["logged_at"]
            .as_str()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|t| t.with_timezone(&Utc));
        if let (Some(group), Some(logged_at)) = (group, logged_at) {
            let latest = last_worked.entry(group).or_insert(logged_at);
            if logged_at > *latest {
                *latest = logged_at;
            }
        }
    }

    let mut working_weights = serde_json::Map::new();
    for (exercise, prs) in &samples {
        if let Some(rx) = prescribe(prs, intensity) {
            working_weights.insert(exercise.clone(), json!(rx));
        }
    }

    let mut recovered = Vec::new();
    let mut unrecovered = Vec::new();
    for (group, worked_at) in &last_worked {
        let window = RecoveryWindow::new(*group, *worked_at);
        if window.is_recovered(now) {
            recovered.push(group.as_str());
        } else {
            unrecovered.push(group.as_str());
        }
    }

    Ok(json!({
        "user_id": user_id,
        "focus": payload["focus"].as_str().unwrap_or("general"),
        "sessions_per_week": sessions_per_week,
        "intensity": intensity,
        "working_weights": working_weights,
        "recovered_groups": recovered,
        "unrecovered_groups": unrecovered,
    }))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

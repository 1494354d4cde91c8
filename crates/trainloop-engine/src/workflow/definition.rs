//! Code-defined workflows: the `Workflow` trait and its steps.
//!
//! A workflow is a declarative `WorkflowDefinition` (name, trigger, policy)
//! plus an ordered list of named `Step`s. Step bodies are async closures
//! over the accumulated `RunContext`; the executor memoizes each step's
//! output in the durable ledger, so bodies must be deterministic given
//! their inputs or idempotent in their side effects.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use trainloop_types::error::StepError;
use trainloop_types::event::Event;
use trainloop_types::workflow::WorkflowDefinition;

use super::context::RunContext;

/// Default per-step timeout.
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(300);

/// Boxed async step body.
pub type StepFn =
    Arc<dyn Fn(RunContext) -> BoxFuture<'static, Result<serde_json::Value, StepError>> + Send + Sync>;

/// Synchronous derivation of a wake instant from the run context.
pub type WakeFn = Arc<dyn Fn(&RunContext) -> Result<DateTime<Utc>, StepError> + Send + Sync>;

/// Synchronous derivation of events to emit from the run context.
pub type EmitFn = Arc<dyn Fn(&RunContext) -> Result<Vec<Event>, StepError> + Send + Sync>;

/// What a step does when executed.
#[derive(Clone)]
pub enum StepKind {
    /// Run an async body and memoize its JSON output.
    Compute { body: StepFn, timeout: Duration },
    /// Arm a durable timer: the run sleeps until the derived instant and
    /// survives restarts in between.
    Sleep { until: WakeFn },
    /// Derive events and hand them to the engine's event sink.
    Emit { events: EmitFn },
}

/// A named step within a workflow. Names must be unique per workflow; the
/// memoization ledger keys on `(run_id, step_name)`.
#[derive(Clone)]
pub struct Step {
    pub name: String,
    pub kind: StepKind,
}

impl Step {
    /// A compute step with the default timeout.
    pub fn compute<F, Fut>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(RunContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<serde_json::Value, StepError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            kind: StepKind::Compute {
                body: Arc::new(move |ctx| Box::pin(body(ctx))),
                timeout: DEFAULT_STEP_TIMEOUT,
            },
        }
    }

    /// Override the timeout of a compute step. No-op for other kinds.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        if let StepKind::Compute { timeout: t, .. } = &mut self.kind {
            *t = timeout;
        }
        self
    }

    /// A durable timer step.
    pub fn sleep_until<F>(name: impl Into<String>, until: F) -> Self
    where
        F: Fn(&RunContext) -> Result<DateTime<Utc>, StepError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            kind: StepKind::Sleep {
                until: Arc::new(until),
            },
        }
    }

    /// An event-emitting step.
    pub fn emit<F>(name: impl Into<String>, events: F) -> Self
    where
        F: Fn(&RunContext) -> Result<Vec<Event>, StepError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            kind: StepKind::Emit {
                events: Arc::new(events),
            },
        }
    }
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &self.kind {
            StepKind::Compute { timeout, .. } => format!("Compute(timeout={timeout:?})"),
            StepKind::Sleep { .. } => "Sleep".to_string(),
            StepKind::Emit { .. } => "Emit".to_string(),
        };
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("kind", &kind)
            .finish()
    }
}

/// A registered workflow: declarative shape plus executable steps.
///
/// Object-safe so the router can hold heterogeneous workflows behind
/// `Arc<dyn Workflow>`.
pub trait Workflow: Send + Sync {
    /// The declarative definition (identity, trigger, policy).
    fn definition(&self) -> &WorkflowDefinition;

    /// The ordered steps of one run.
    fn steps(&self) -> Vec<Step>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use trainloop_types::event::EventName;
    use uuid::Uuid;

    struct TwoStep {
        definition: WorkflowDefinition,
    }

    impl Workflow for TwoStep {
        fn definition(&self) -> &WorkflowDefinition {
            &self.definition
        }

        fn steps(&self) -> Vec<Step> {
            vec![
                Step::compute("first", |_ctx| async { Ok(json!({"n": 1})) }),
                Step::compute("second", |ctx| async move {
                    let first = ctx.require_output("first")?;
                    Ok(json!({"n": first["n"].as_i64().unwrap_or(0) + 1}))
                }),
            ]
        }
    }

    #[tokio::test]
    async fn compute_step_body_runs() {
        let wf = TwoStep {
            definition: WorkflowDefinition::on_event("two-step", EventName::PlanRequested),
        };
        let steps = wf.steps();
        assert_eq!(steps.len(), 2);

        let ctx = RunContext::new(
            Uuid::now_v7(),
            "two-step".to_string(),
            Event::new(EventName::PlanRequested, "user-1", json!({})),
        );
        let StepKind::Compute { body, timeout } = &steps[0].kind else {
            panic!("expected compute step");
        };
        assert_eq!(*timeout, DEFAULT_STEP_TIMEOUT);
        let output = body(ctx).await.unwrap();
        assert_eq!(output["n"], 1);
    }

    #[test]
    fn with_timeout_overrides_compute() {
        let step = Step::compute("s", |_ctx| async { Ok(json!(null)) })
            .with_timeout(Duration::from_secs(30));
        let StepKind::Compute { timeout, .. } = step.kind else {
            panic!("expected compute step");
        };
        assert_eq!(timeout, Duration::from_secs(30));
    }

    #[test]
    fn sleep_step_derives_wake_instant() {
        let wake = Utc::now() + chrono::Duration::days(14);
        let step = Step::sleep_until("await-trial-end", move |_ctx| Ok(wake));
        let ctx = RunContext::new(
            Uuid::now_v7(),
            "billing".to_string(),
            Event::new(EventName::TrialStarted, "user-1", json!({})),
        );
        let StepKind::Sleep { until } = &step.kind else {
            panic!("expected sleep step");
        };
        assert_eq!(until(&ctx).unwrap(), wake);
    }

    #[test]
    fn debug_impl_names_kind() {
        let step = Step::emit("announce", |_ctx| Ok(vec![]));
        assert!(format!("{step:?}").contains("Emit"));
    }
}

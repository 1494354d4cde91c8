//! Durable step executor.
//!
//! Drives a workflow's steps in order against the memoization ledger. A run
//! is re-entrant: every walk starts at the first step and consults the
//! ledger, so completed steps replay their memoized output instead of
//! executing again. Retries re-enter the same run with a bumped attempt
//! counter; crash recovery resumes the persisted run the same way.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use trainloop_types::error::{RepositoryError, StepError};
use trainloop_types::event::{Event, FabricEvent};
use trainloop_types::workflow::{FailureKind, Run, RunStatus};
use uuid::Uuid;

use crate::event::EventBus;
use crate::repository::run::RunRepository;

use super::context::RunContext;
use super::definition::{Step, StepKind, Workflow};
use super::ledger::{LedgerError, StepLedger};
use super::retry::RetryPolicy;

// ---------------------------------------------------------------------------
// Event sink (emit steps)
// ---------------------------------------------------------------------------

/// Where emit steps hand their events.
///
/// Dispatch is fire-and-forget: routing happens outside the emitting run so
/// a triggered workflow can never deadlock its trigger.
pub trait EventSink: Send + Sync {
    fn dispatch(&self, event: Event);
}

/// Sink that discards events. For tests and standalone executors.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn dispatch(&self, _event: Event) {}
}

/// Sink backed by an unbounded channel; the runtime pumps the receiving end
/// into the router.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<Event>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl EventSink for ChannelSink {
    fn dispatch(&self, event: Event) {
        if self.sender.send(event).is_err() {
            tracing::warn!("event sink receiver dropped, emitted event lost");
        }
    }
}

// ---------------------------------------------------------------------------
// Errors and outcome
// ---------------------------------------------------------------------------

/// Infrastructure errors from the executor. Step failures are not errors;
/// they surface as a `Failed` outcome.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("run storage error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("run {0} not found")]
    RunNotFound(Uuid),

    #[error("run {0} is already terminal")]
    RunAlreadyTerminal(Uuid),

    #[error("run {run_id} has a corrupt record: {detail}")]
    CorruptRun { run_id: Uuid, detail: String },
}

/// Result of driving a run to a terminal status.
#[derive(Debug)]
pub struct RunOutcome {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub attempts: u32,
    /// Outputs of all completed steps, keyed by step name.
    pub outputs: HashMap<String, serde_json::Value>,
    pub error: Option<String>,
    pub failure: Option<FailureKind>,
}

/// Outcome of walking the step list once.
enum Walk {
    Complete(RunContext),
    StepFailed { step_name: String, error: StepError },
}

// ---------------------------------------------------------------------------
// StepExecutor
// ---------------------------------------------------------------------------

/// Executes workflow runs against the durable ledger.
pub struct StepExecutor<R: RunRepository> {
    repository: Arc<R>,
    ledger: StepLedger<R>,
    bus: EventBus,
    retry: RetryPolicy,
    sink: Arc<dyn EventSink>,
}

impl<R: RunRepository> StepExecutor<R> {
    pub fn new(
        repository: Arc<R>,
        bus: EventBus,
        retry: RetryPolicy,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            ledger: StepLedger::new(repository.clone()),
            repository,
            bus,
            retry,
            sink,
        }
    }

    /// Start a fresh run of `workflow` for `event` and drive it to a
    /// terminal status.
    pub async fn run(
        &self,
        workflow: &dyn Workflow,
        event: Event,
    ) -> Result<RunOutcome, ExecutorError> {
        let def = workflow.definition();
        let run = Run {
            id: Uuid::now_v7(),
            workflow_id: def.id,
            workflow_name: def.name.clone(),
            status: RunStatus::Queued,
            event_name: event.name.as_str().to_string(),
            entity_id: event.entity_id.clone(),
            payload: event.payload.clone(),
            attempt: 1,
            error: None,
            failure: None,
            wake_at: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };
        self.repository.create_run(&run).await?;
        self.bus.publish(FabricEvent::RunQueued {
            run_id: run.id,
            workflow_name: run.workflow_name.clone(),
        });

        self.drive(run, workflow, event).await
    }

    /// Resume a persisted, non-terminal run (crash recovery or a sleeping
    /// run whose wake instant arrived).
    pub async fn resume(
        &self,
        run_id: Uuid,
        workflow: &dyn Workflow,
    ) -> Result<RunOutcome, ExecutorError> {
        let run = self
            .repository
            .get_run(&run_id)
            .await?
            .ok_or(ExecutorError::RunNotFound(run_id))?;
        if run.status.is_terminal() {
            return Err(ExecutorError::RunAlreadyTerminal(run_id));
        }

        tracing::info!(
            %run_id,
            workflow = %run.workflow_name,
            attempt = run.attempt,
            "resuming interrupted run"
        );

        let event_name = run.event_name.parse().map_err(|_| ExecutorError::CorruptRun {
            run_id,
            detail: format!("unknown event name {:?}", run.event_name),
        })?;
        let event = Event {
            id: run.id,
            name: event_name,
            entity_id: run.entity_id.clone(),
            payload: run.payload.clone(),
            occurred_at: run.created_at,
        };
        self.drive(run, workflow, event).await
    }

    /// The attempt loop: walk the steps, retrying transient failures with
    /// backoff until success, a fatal error, or exhaustion.
    async fn drive(
        &self,
        run: Run,
        workflow: &dyn Workflow,
        event: Event,
    ) -> Result<RunOutcome, ExecutorError> {
        let def = workflow.definition();
        let max_attempts = def.policy.max_attempts.max(1);
        let mut attempt = run.attempt.max(1);

        loop {
            self.repository
                .update_run_status(&run.id, RunStatus::Running, None, None, None)
                .await?;
            self.bus.publish(FabricEvent::RunStarted {
                run_id: run.id,
                workflow_name: def.name.clone(),
                event_name: event.name.as_str().to_string(),
                attempt,
            });

            match self.walk(&run, workflow, &event, attempt).await? {
                Walk::Complete(ctx) => {
                    self.repository
                        .update_run_status(&run.id, RunStatus::Completed, None, None, None)
                        .await?;
                    self.bus.publish(FabricEvent::RunCompleted {
                        run_id: run.id,
                        workflow_name: def.name.clone(),
                        attempts: attempt,
                    });
                    tracing::info!(run_id = %run.id, workflow = %def.name, attempt, "run completed");
                    return Ok(RunOutcome {
                        run_id: run.id,
                        status: RunStatus::Completed,
                        attempts: attempt,
                        outputs: ctx.into_outputs(),
                        error: None,
                        failure: None,
                    });
                }
                Walk::StepFailed { step_name, error } => {
                    if self.retry.should_retry(&error, attempt, max_attempts) {
                        attempt += 1;
                        self.repository.update_run_attempt(&run.id, attempt).await?;
                        let delay = self.retry.backoff_delay(attempt);
                        self.bus.publish(FabricEvent::RunRetrying {
                            run_id: run.id,
                            workflow_name: def.name.clone(),
                            attempt,
                            delay_ms: delay.as_millis() as u64,
                        });
                        tracing::warn!(
                            run_id = %run.id,
                            workflow = %def.name,
                            step = %step_name,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %error,
                            "transient step failure, retrying run"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    let failure = if error.is_transient() {
                        FailureKind::Exhausted
                    } else {
                        FailureKind::Fatal
                    };
                    let message = format!("step '{step_name}': {error}");
                    self.repository
                        .update_run_status(
                            &run.id,
                            RunStatus::Failed,
                            Some(&message),
                            Some(failure),
                            None,
                        )
                        .await?;
                    self.bus.publish(FabricEvent::RunFailed {
                        run_id: run.id,
                        workflow_name: def.name.clone(),
                        error: message.clone(),
                        failure: failure.as_str().to_string(),
                    });
                    tracing::error!(
                        run_id = %run.id,
                        workflow = %def.name,
                        failure = failure.as_str(),
                        error = %message,
                        "run failed"
                    );
                    return Ok(RunOutcome {
                        run_id: run.id,
                        status: RunStatus::Failed,
                        attempts: attempt,
                        outputs: HashMap::new(),
                        error: Some(message),
                        failure: Some(failure),
                    });
                }
            }
        }
    }

    /// Walk the step list once, consulting the ledger before each step.
    async fn walk(
        &self,
        run: &Run,
        workflow: &dyn Workflow,
        event: &Event,
        attempt: u32,
    ) -> Result<Walk, ExecutorError> {
        let mut ctx = RunContext::new(run.id, run.workflow_name.clone(), event.clone());

        for step in workflow.steps() {
            // Memoized output wins over re-execution; an armed timer means
            // we crashed (or retried) mid-sleep and owe the remainder.
            if let Some(record) = self.ledger.get(run.id, &step.name).await? {
                match record.status {
                    trainloop_types::workflow::StepStatus::Completed => {
                        if let Some(output) = record.output {
                            ctx.set_output(&step.name, output);
                        }
                        self.bus.publish(FabricEvent::StepCompleted {
                            run_id: run.id,
                            step_name: step.name.clone(),
                            memoized: true,
                        });
                        continue;
                    }
                    trainloop_types::workflow::StepStatus::Waiting => {
                        let wake_at = record.wake_at.unwrap_or_else(Utc::now);
                        self.sleep_until(run, &step.name, wake_at).await?;
                        self.ledger.complete_timer(run.id, &step.name, attempt).await?;
                        ctx.set_output(&step.name, serde_json::json!({"slept": true}));
                        continue;
                    }
                    trainloop_types::workflow::StepStatus::Failed => {
                        // Fall through and re-execute.
                    }
                }
            }

            match self.execute_step(run, &step, &mut ctx, attempt).await? {
                Ok(()) => {}
                Err(error) => {
                    self.ledger
                        .record_failure(run.id, &step.name, &error.to_string(), attempt)
                        .await?;
                    self.bus.publish(FabricEvent::StepFailed {
                        run_id: run.id,
                        step_name: step.name.clone(),
                        error: error.to_string(),
                        transient: error.is_transient(),
                    });
                    return Ok(Walk::StepFailed {
                        step_name: step.name,
                        error,
                    });
                }
            }
        }

        Ok(Walk::Complete(ctx))
    }

    /// Execute one step body. The outer `Result` is infrastructure; the
    /// inner one is the step's own verdict.
    async fn execute_step(
        &self,
        run: &Run,
        step: &Step,
        ctx: &mut RunContext,
        attempt: u32,
    ) -> Result<Result<(), StepError>, ExecutorError> {
        self.bus.publish(FabricEvent::StepStarted {
            run_id: run.id,
            step_name: step.name.clone(),
            attempt,
        });
        tracing::debug!(run_id = %run.id, step = %step.name, attempt, "executing step");

        match &step.kind {
            StepKind::Compute { body, timeout } => {
                let result = match tokio::time::timeout(*timeout, body(ctx.clone())).await {
                    Ok(result) => result,
                    Err(_) => Err(StepError::Timeout(format!(
                        "step '{}' exceeded {}s",
                        step.name,
                        timeout.as_secs()
                    ))),
                };
                match result {
                    Ok(output) => {
                        let landed = self
                            .ledger
                            .record_success(run.id, &step.name, output.clone(), attempt)
                            .await?;
                        // If a racing attempt won, its stored output is the
                        // authoritative one.
                        let output = if landed {
                            output
                        } else {
                            self.ledger
                                .get(run.id, &step.name)
                                .await?
                                .and_then(|r| r.output)
                                .unwrap_or(output)
                        };
                        ctx.set_output(&step.name, output);
                        self.bus.publish(FabricEvent::StepCompleted {
                            run_id: run.id,
                            step_name: step.name.clone(),
                            memoized: false,
                        });
                        Ok(Ok(()))
                    }
                    Err(error) => Ok(Err(error)),
                }
            }
            StepKind::Sleep { until } => {
                let wake_at = match until(ctx) {
                    Ok(wake_at) => wake_at,
                    Err(error) => return Ok(Err(error)),
                };
                // Persist the timer before sleeping so a crash resumes the
                // remainder instead of restarting the wait.
                self.ledger
                    .arm_timer(run.id, &step.name, wake_at, attempt)
                    .await?;
                self.sleep_until(run, &step.name, wake_at).await?;
                self.ledger.complete_timer(run.id, &step.name, attempt).await?;
                ctx.set_output(&step.name, serde_json::json!({"slept": true}));
                self.bus.publish(FabricEvent::StepCompleted {
                    run_id: run.id,
                    step_name: step.name.clone(),
                    memoized: false,
                });
                Ok(Ok(()))
            }
            StepKind::Emit { events } => {
                let events = match events(ctx) {
                    Ok(events) => events,
                    Err(error) => return Ok(Err(error)),
                };
                let count = events.len();
                for event in events {
                    self.sink.dispatch(event);
                }
                self.ledger
                    .record_success(
                        run.id,
                        &step.name,
                        serde_json::json!({"emitted": count}),
                        attempt,
                    )
                    .await?;
                ctx.set_output(&step.name, serde_json::json!({"emitted": count}));
                self.bus.publish(FabricEvent::StepCompleted {
                    run_id: run.id,
                    step_name: step.name.clone(),
                    memoized: false,
                });
                Ok(Ok(()))
            }
        }
    }

    /// Park the run in `Sleeping` until `wake_at`, then mark it running.
    async fn sleep_until(
        &self,
        run: &Run,
        step_name: &str,
        wake_at: DateTime<Utc>,
    ) -> Result<(), ExecutorError> {
        self.repository
            .update_run_status(&run.id, RunStatus::Sleeping, None, None, Some(wake_at))
            .await?;
        self.bus.publish(FabricEvent::RunSleeping {
            run_id: run.id,
            step_name: step_name.to_string(),
            wake_at,
        });

        let remaining = wake_at - Utc::now();
        if let Ok(remaining) = remaining.to_std() {
            tracing::debug!(
                run_id = %run.id,
                step = %step_name,
                remaining_secs = remaining.as_secs(),
                "run sleeping"
            );
            tokio::time::sleep(remaining).await;
        }

        self.repository
            .update_run_status(&run.id, RunStatus::Running, None, None, None)
            .await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use serde_json::json;
    use trainloop_types::config::RetrySettings;
    use trainloop_types::event::EventName;
    use trainloop_types::workflow::{PolicyConfig, StepStatus, WorkflowDefinition};

    use crate::repository::memory::InMemoryRunRepository;

    fn executor(repo: Arc<InMemoryRunRepository>) -> StepExecutor<InMemoryRunRepository> {
        // Tight backoff keeps retry tests fast.
        let retry = RetryPolicy::new(RetrySettings {
            base_ms: 1,
            ceiling_ms: 5,
        });
        StepExecutor::new(repo, EventBus::new(64), retry, Arc::new(NullSink))
    }

    struct CountingWorkflow {
        definition: WorkflowDefinition,
        executions: Arc<AtomicU32>,
        /// Fail this many attempts of the flaky step before succeeding.
        fail_first: u32,
        fatal: bool,
    }

    impl CountingWorkflow {
        fn new(max_attempts: u32, fail_first: u32, fatal: bool) -> Self {
            Self {
                definition: WorkflowDefinition::on_event("counting", EventName::PlanRequested)
                    .with_policy(PolicyConfig::default().with_max_attempts(max_attempts)),
                executions: Arc::new(AtomicU32::new(0)),
                fail_first,
                fatal,
            }
        }
    }

    impl Workflow for CountingWorkflow {
        fn definition(&self) -> &WorkflowDefinition {
            &self.definition
        }

        fn steps(&self) -> Vec<Step> {
            let stable_runs = Arc::new(AtomicU32::new(0));
            let flaky_runs = self.executions.clone();
            let fail_first = self.fail_first;
            let fatal = self.fatal;
            vec![
                Step::compute("stable", move |_ctx| {
                    let runs = stable_runs.clone();
                    async move {
                        runs.fetch_add(1, Ordering::SeqCst);
                        Ok(json!({"stable": true}))
                    }
                }),
                Step::compute("flaky", move |_ctx| {
                    let runs = flaky_runs.clone();
                    async move {
                        let n = runs.fetch_add(1, Ordering::SeqCst) + 1;
                        if n <= fail_first {
                            if fatal {
                                Err(StepError::Invalid("bad input".into()))
                            } else {
                                Err(StepError::RateLimited(format!("attempt {n}")))
                            }
                        } else {
                            Ok(json!({"succeeded_on": n}))
                        }
                    }
                }),
            ]
        }
    }

    fn plan_event() -> Event {
        Event::new(EventName::PlanRequested, "user-1", json!({"user_id": "user-1"}))
    }

    #[tokio::test]
    async fn happy_path_completes_and_memoizes() {
        let repo = Arc::new(InMemoryRunRepository::new());
        let exec = executor(repo.clone());
        let wf = CountingWorkflow::new(3, 0, false);

        let outcome = exec.run(&wf, plan_event()).await.unwrap();
        assert_eq!(outcome.status, RunStatus::Completed);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.outputs["flaky"]["succeeded_on"], 1);

        let steps = repo.list_steps(&outcome.run_id).await.unwrap();
        assert_eq!(steps.len(), 2);
        assert!(steps.iter().all(|s| s.status == StepStatus::Completed));
    }

    #[tokio::test]
    async fn transient_failures_retry_and_succeed_on_third_attempt() {
        let repo = Arc::new(InMemoryRunRepository::new());
        let exec = executor(repo.clone());
        let wf = CountingWorkflow::new(3, 2, false);

        let outcome = exec.run(&wf, plan_event()).await.unwrap();
        assert_eq!(outcome.status, RunStatus::Completed);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(wf.executions.load(Ordering::SeqCst), 3);

        // Exactly one record per step despite three attempts; the flaky
        // step's record shows the successful attempt.
        let steps = repo.list_steps(&outcome.run_id).await.unwrap();
        assert_eq!(steps.len(), 2);
        let flaky = steps.iter().find(|s| s.step_name == "flaky").unwrap();
        assert_eq!(flaky.status, StepStatus::Completed);
        assert_eq!(flaky.attempt, 3);
    }

    #[tokio::test]
    async fn completed_steps_execute_at_most_once_across_retries() {
        let repo = Arc::new(InMemoryRunRepository::new());
        let exec = executor(repo.clone());
        let wf = CountingWorkflow::new(3, 1, false);

        let outcome = exec.run(&wf, plan_event()).await.unwrap();
        assert_eq!(outcome.status, RunStatus::Completed);

        // The stable step completed on attempt 1 and must not re-run on
        // attempt 2.
        let stable = repo.get_step(&outcome.run_id, "stable").await.unwrap().unwrap();
        assert_eq!(stable.attempt, 1);
    }

    #[tokio::test]
    async fn exhausted_transient_failures_fail_terminally() {
        let repo = Arc::new(InMemoryRunRepository::new());
        let exec = executor(repo.clone());
        let wf = CountingWorkflow::new(2, 10, false);

        let outcome = exec.run(&wf, plan_event()).await.unwrap();
        assert_eq!(outcome.status, RunStatus::Failed);
        assert_eq!(outcome.failure, Some(FailureKind::Exhausted));
        assert_eq!(outcome.attempts, 2);
        assert_eq!(wf.executions.load(Ordering::SeqCst), 2);

        let run = repo.get_run(&outcome.run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.error.unwrap().contains("flaky"));
    }

    #[tokio::test]
    async fn fatal_error_fails_without_retry() {
        let repo = Arc::new(InMemoryRunRepository::new());
        let exec = executor(repo.clone());
        let wf = CountingWorkflow::new(3, 10, true);

        let outcome = exec.run(&wf, plan_event()).await.unwrap();
        assert_eq!(outcome.status, RunStatus::Failed);
        assert_eq!(outcome.failure, Some(FailureKind::Fatal));
        assert_eq!(outcome.attempts, 1);
        assert_eq!(wf.executions.load(Ordering::SeqCst), 1);
    }

    // -------------------------------------------------------------------
    // Durable timers
    // -------------------------------------------------------------------

    struct TimerWorkflow {
        definition: WorkflowDefinition,
        wake_at: DateTime<Utc>,
        after_runs: Arc<AtomicU32>,
    }

    impl Workflow for TimerWorkflow {
        fn definition(&self) -> &WorkflowDefinition {
            &self.definition
        }

        fn steps(&self) -> Vec<Step> {
            let wake_at = self.wake_at;
            let after_runs = self.after_runs.clone();
            vec![
                Step::compute("before", |_ctx| async { Ok(json!({"ok": true})) }),
                Step::sleep_until("wait", move |_ctx| Ok(wake_at)),
                Step::compute("after", move |_ctx| {
                    let runs = after_runs.clone();
                    async move {
                        runs.fetch_add(1, Ordering::SeqCst);
                        Ok(json!({"done": true}))
                    }
                }),
            ]
        }
    }

    #[tokio::test]
    async fn timer_step_sleeps_then_continues() {
        let repo = Arc::new(InMemoryRunRepository::new());
        let exec = executor(repo.clone());
        let wf = TimerWorkflow {
            definition: WorkflowDefinition::on_event("timer", EventName::TrialStarted),
            wake_at: Utc::now() + chrono::Duration::milliseconds(50),
            after_runs: Arc::new(AtomicU32::new(0)),
        };

        let outcome = exec.run(&wf, plan_event()).await.unwrap();
        assert_eq!(outcome.status, RunStatus::Completed);
        assert_eq!(outcome.outputs["wait"]["slept"], true);
        assert_eq!(wf.after_runs.load(Ordering::SeqCst), 1);

        let wait = repo.get_step(&outcome.run_id, "wait").await.unwrap().unwrap();
        assert_eq!(wait.status, StepStatus::Completed);
    }

    #[tokio::test]
    async fn resume_fires_remainder_of_armed_timer() {
        let repo = Arc::new(InMemoryRunRepository::new());
        let exec = executor(repo.clone());
        let wf = TimerWorkflow {
            definition: WorkflowDefinition::on_event("timer", EventName::TrialStarted),
            wake_at: Utc::now() - chrono::Duration::seconds(1),
            after_runs: Arc::new(AtomicU32::new(0)),
        };

        // Simulate a crash mid-sleep: run persisted as Sleeping with the
        // first step memoized and the timer armed.
        let run = Run {
            id: Uuid::now_v7(),
            workflow_id: wf.definition.id,
            workflow_name: wf.definition.name.clone(),
            status: RunStatus::Sleeping,
            event_name: EventName::TrialStarted.as_str().to_string(),
            entity_id: "user-1".to_string(),
            payload: json!({"user_id": "user-1"}),
            attempt: 1,
            error: None,
            failure: None,
            wake_at: Some(wf.wake_at),
            created_at: Utc::now(),
            started_at: Some(Utc::now()),
            completed_at: None,
        };
        repo.create_run(&run).await.unwrap();
        repo.put_step(&trainloop_types::workflow::StepRecord::completed(
            run.id,
            "before",
            json!({"ok": true}),
            1,
        ))
        .await
        .unwrap();
        repo.put_step(&trainloop_types::workflow::StepRecord::waiting(
            run.id, "wait", wf.wake_at, 1,
        ))
        .await
        .unwrap();

        let outcome = exec.resume(run.id, &wf).await.unwrap();
        assert_eq!(outcome.status, RunStatus::Completed);
        // Only the post-timer step executed on resume.
        assert_eq!(wf.after_runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn resume_rejects_terminal_run() {
        let repo = Arc::new(InMemoryRunRepository::new());
        let exec = executor(repo.clone());
        let wf = CountingWorkflow::new(3, 0, false);

        let outcome = exec.run(&wf, plan_event()).await.unwrap();
        let err = exec.resume(outcome.run_id, &wf).await.unwrap_err();
        assert!(matches!(err, ExecutorError::RunAlreadyTerminal(_)));
    }

    #[tokio::test]
    async fn resume_reports_unparseable_event_name_as_corruption() {
        let repo = Arc::new(InMemoryRunRepository::new());
        let exec = executor(repo.clone());
        let wf = CountingWorkflow::new(3, 0, false);

        // The run exists; its stored event name does not map to any known
        // event. That is record corruption, not a missing run.
        let run = Run {
            id: Uuid::now_v7(),
            workflow_id: wf.definition.id,
            workflow_name: wf.definition.name.clone(),
            status: RunStatus::Running,
            event_name: "not_a_real_event".to_string(),
            entity_id: "user-1".to_string(),
            payload: json!({}),
            attempt: 1,
            error: None,
            failure: None,
            wake_at: None,
            created_at: Utc::now(),
            started_at: Some(Utc::now()),
            completed_at: None,
        };
        repo.create_run(&run).await.unwrap();

        let err = exec.resume(run.id, &wf).await.unwrap_err();
        match err {
            ExecutorError::CorruptRun { run_id, detail } => {
                assert_eq!(run_id, run.id);
                assert!(detail.contains("not_a_real_event"));
            }
            other => panic!("expected CorruptRun, got {other:?}"),
        }
    }

    // -------------------------------------------------------------------
    // Emit steps
    // -------------------------------------------------------------------

    struct RecordingSink {
        events: Mutex<Vec<Event>>,
    }

    impl EventSink for RecordingSink {
        fn dispatch(&self, event: Event) {
            self.events.lock().unwrap().push(event);
        }
    }

    struct EmittingWorkflow {
        definition: WorkflowDefinition,
    }

    impl Workflow for EmittingWorkflow {
        fn definition(&self) -> &WorkflowDefinition {
            &self.definition
        }

        fn steps(&self) -> Vec<Step> {
            vec![
                Step::compute("generate", |_ctx| async { Ok(json!({"plan": "4 weeks"})) }),
                Step::emit("announce", |ctx| {
                    let user = ctx.event.entity_id.clone();
                    Ok(vec![Event::new(
                        EventName::PlanGenerated,
                        user,
                        ctx.require_output("generate")?.clone(),
                    )])
                }),
            ]
        }
    }

    #[tokio::test]
    async fn emit_step_dispatches_to_sink() {
        let repo = Arc::new(InMemoryRunRepository::new());
        let sink = Arc::new(RecordingSink {
            events: Mutex::new(Vec::new()),
        });
        let exec = StepExecutor::new(
            repo,
            EventBus::new(64),
            RetryPolicy::default(),
            sink.clone(),
        );
        let wf = EmittingWorkflow {
            definition: WorkflowDefinition::on_event("emitter", EventName::PlanRequested),
        };

        let outcome = exec.run(&wf, plan_event()).await.unwrap();
        assert_eq!(outcome.status, RunStatus::Completed);
        assert_eq!(outcome.outputs["announce"]["emitted"], 1);

        let events = sink.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name, EventName::PlanGenerated);
        assert_eq!(events[0].payload["plan"], "4 weeks");
    }

    #[tokio::test]
    async fn bus_announces_lifecycle() {
        let repo = Arc::new(InMemoryRunRepository::new());
        let bus = EventBus::new(64);
        let mut rx = bus.subscribe();
        let exec = StepExecutor::new(repo, bus, RetryPolicy::default(), Arc::new(NullSink));
        let wf = CountingWorkflow::new(3, 0, false);

        exec.run(&wf, plan_event()).await.unwrap();

        let mut saw_completed = false;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, FabricEvent::RunCompleted { .. }) {
                saw_completed = true;
            }
        }
        assert!(saw_completed);
    }
}

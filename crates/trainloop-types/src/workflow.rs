//! Workflow domain types for Trainloop.
//!
//! Defines the declarative shape of a workflow (`WorkflowDefinition` with its
//! trigger and flow-control policy) and the durable execution records
//! (`Run`, `StepRecord`) the engine persists while driving one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::event::EventName;

// ---------------------------------------------------------------------------
// Workflow Definition
// ---------------------------------------------------------------------------

/// The declarative shape of a workflow: identity, trigger, and policy.
///
/// The step bodies themselves live in code (the `Workflow` trait in the
/// engine crate); this struct is what gets registered, logged, and matched
/// against incoming events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// UUIDv7 assigned when the workflow is constructed.
    pub id: Uuid,
    /// Unique workflow name (e.g. "plan-generation").
    pub name: String,
    /// Optional longer description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// What starts a run of this workflow.
    pub trigger: TriggerConfig,
    /// Retry and flow-control policy.
    #[serde(default)]
    pub policy: PolicyConfig,
}

impl WorkflowDefinition {
    /// A workflow fired on a cron schedule.
    pub fn cron(name: impl Into<String>, schedule: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            name: name.into(),
            description: None,
            trigger: TriggerConfig::Cron {
                schedule: schedule.into(),
            },
            policy: PolicyConfig::default(),
        }
    }

    /// A workflow subscribed to a named event.
    pub fn on_event(name: impl Into<String>, event: EventName) -> Self {
        Self {
            id: Uuid::now_v7(),
            name: name.into(),
            description: None,
            trigger: TriggerConfig::Event { name: event },
            policy: PolicyConfig::default(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_policy(mut self, policy: PolicyConfig) -> Self {
        self.policy = policy;
        self
    }
}

/// How a workflow gets started.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerConfig {
    /// Cron schedule trigger.
    Cron {
        /// Cron expression or human-readable schedule string.
        schedule: String,
    },
    /// Internal event bus trigger.
    Event {
        /// Event name to match.
        name: EventName,
    },
}

// ---------------------------------------------------------------------------
// Policy (retry + flow control)
// ---------------------------------------------------------------------------

/// Per-workflow retry and flow-control knobs.
///
/// The three flow-control settings are independent: a workflow may combine
/// a concurrency cap with debounce, throttle, neither, or both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Maximum run attempts, including the first (default 3).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Maximum concurrent runs of this workflow (None = unlimited).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<u32>,
    /// Quiet-period debounce applied per entity before a run starts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debounce: Option<DebounceConfig>,
    /// Rolling-window throttle applied per entity at admission.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub throttle: Option<ThrottleConfig>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            concurrency: None,
            debounce: None,
            throttle: None,
        }
    }
}

impl PolicyConfig {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_concurrency(mut self, limit: u32) -> Self {
        self.concurrency = Some(limit);
        self
    }

    pub fn with_debounce(mut self, period_secs: u64) -> Self {
        self.debounce = Some(DebounceConfig { period_secs });
        self
    }

    pub fn with_throttle(mut self, limit: u32, period_secs: u64) -> Self {
        self.throttle = Some(ThrottleConfig { limit, period_secs });
        self
    }
}

fn default_max_attempts() -> u32 {
    3
}

/// Debounce: wait for a quiet period, last event wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebounceConfig {
    /// Quiet period in seconds. A newer event for the same entity inside
    /// this window supersedes the pending one.
    pub period_secs: u64,
}

/// Throttle: at most `limit` admissions per rolling window, excess dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrottleConfig {
    pub limit: u32,
    pub period_secs: u64,
}

// ---------------------------------------------------------------------------
// Run (durable execution record)
// ---------------------------------------------------------------------------

/// Overall status of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Running,
    Sleeping,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::Running => "running",
            RunStatus::Sleeping => "sleeping",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    /// Terminal statuses never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}

/// Why a failed run is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// A fatal error: retrying would not help.
    Fatal,
    /// Transient errors persisted through every allowed attempt.
    Exhausted,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Fatal => "fatal",
            FailureKind::Exhausted => "exhausted",
        }
    }
}

/// A single execution instance of a workflow.
///
/// Persisted from the moment the run is admitted; interrupted runs are found
/// and resumed on startup by scanning for non-terminal statuses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    /// UUIDv7 run ID.
    pub id: Uuid,
    /// ID of the workflow definition being executed.
    pub workflow_id: Uuid,
    /// Name of the workflow (denormalized for display and log lines).
    pub workflow_name: String,
    /// Current run status.
    pub status: RunStatus,
    /// Name of the event that triggered this run ("cron_tick" for schedules).
    pub event_name: String,
    /// Entity the triggering event concerned.
    pub entity_id: String,
    /// JSON payload of the triggering event.
    pub payload: serde_json::Value,
    /// Current attempt number (1-based, bumped on retry).
    pub attempt: u32,
    /// Error message if the run failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Failure classification if the run failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    /// When a sleeping run should wake (set while status is `Sleeping`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wake_at: Option<DateTime<Utc>>,
    /// When the run was admitted.
    pub created_at: DateTime<Utc>,
    /// When execution started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the run reached a terminal status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Step Record (memoization ledger)
// ---------------------------------------------------------------------------

/// Status of a recorded step within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Step finished and its output is memoized.
    Completed,
    /// Step raised an error on its most recent attempt.
    Failed,
    /// Durable timer armed; the run sleeps until `wake_at`.
    Waiting,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
            StepStatus::Waiting => "waiting",
        }
    }
}

/// Durable record of one named step within a run, keyed `(run_id, step_name)`.
///
/// A `Completed` record is final: replaying the run returns the memoized
/// output instead of re-executing the body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    /// Parent run ID.
    pub run_id: Uuid,
    /// Step name, unique within the workflow.
    pub step_name: String,
    /// Step status.
    pub status: StepStatus,
    /// Memoized JSON output (present when completed).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    /// Error message from the most recent failed attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Attempt number that produced this record.
    pub attempt: u32,
    /// Wake instant for a durable timer step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wake_at: Option<DateTime<Utc>>,
    /// When the record was written.
    pub recorded_at: DateTime<Utc>,
}

impl StepRecord {
    pub fn completed(
        run_id: Uuid,
        step_name: impl Into<String>,
        output: serde_json::Value,
        attempt: u32,
    ) -> Self {
        Self {
            run_id,
            step_name: step_name.into(),
            status: StepStatus::Completed,
            output: Some(output),
            error: None,
            attempt,
            wake_at: None,
            recorded_at: Utc::now(),
        }
    }

    pub fn failed(
        run_id: Uuid,
        step_name: impl Into<String>,
        error: impl Into<String>,
        attempt: u32,
    ) -> Self {
        Self {
            run_id,
            step_name: step_name.into(),
            status: StepStatus::Failed,
            output: None,
            error: Some(error.into()),
            attempt,
            wake_at: None,
            recorded_at: Utc::now(),
        }
    }

    pub fn waiting(
        run_id: Uuid,
        step_name: impl Into<String>,
        wake_at: DateTime<Utc>,
        attempt: u32,
    ) -> Self {
        Self {
            run_id,
            step_name: step_name.into(),
            status: StepStatus::Waiting,
            output: None,
            error: None,
            attempt,
            wake_at: Some(wake_at),
            recorded_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_workflow_definition_json_roundtrip() {
        let def = WorkflowDefinition::on_event("plan-generation", EventName::PlanRequested)
            .with_description("Generate a weekly training plan")
            .with_policy(PolicyConfig::default().with_max_attempts(3).with_concurrency(4));

        let json_str = serde_json::to_string_pretty(&def).expect("serialize to JSON");
        let parsed: WorkflowDefinition = serde_json::from_str(&json_str).expect("deserialize");
        assert_eq!(parsed.name, "plan-generation");
        assert_eq!(parsed.policy.max_attempts, 3);
        assert_eq!(parsed.policy.concurrency, Some(4));
        assert!(matches!(
            parsed.trigger,
            TriggerConfig::Event {
                name: EventName::PlanRequested
            }
        ));
    }

    #[test]
    fn test_trigger_config_cron_serde() {
        let trigger = TriggerConfig::Cron {
            schedule: "0 0 3 * * *".to_string(),
        };
        let json = serde_json::to_string(&trigger).unwrap();
        assert!(json.contains("\"type\":\"cron\""));
        let parsed: TriggerConfig = serde_json::from_str(&json).unwrap();
        assert!(matches!(parsed, TriggerConfig::Cron { .. }));
    }

    #[test]
    fn test_policy_config_defaults() {
        let policy: PolicyConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(policy.max_attempts, 3);
        assert!(policy.concurrency.is_none());
        assert!(policy.debounce.is_none());
        assert!(policy.throttle.is_none());
    }

    #[test]
    fn test_policy_config_builders_are_independent() {
        let policy = PolicyConfig::default()
            .with_debounce(30)
            .with_throttle(3, 3600);
        assert_eq!(policy.debounce, Some(DebounceConfig { period_secs: 30 }));
        assert_eq!(
            policy.throttle,
            Some(ThrottleConfig {
                limit: 3,
                period_secs: 3600
            })
        );
        assert!(policy.concurrency.is_none());
    }

    #[test]
    fn test_run_status_serde() {
        for status in [
            RunStatus::Queued,
            RunStatus::Running,
            RunStatus::Sleeping,
            RunStatus::Completed,
            RunStatus::Failed,
        ] {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json.trim_matches('"'), status.as_str());
            let parsed: RunStatus = serde_json::from_str(&json).unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn test_run_status_terminal() {
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(!RunStatus::Queued.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(!RunStatus::Sleeping.is_terminal());
    }

    #[test]
    fn test_run_json_roundtrip() {
        let run = Run {
            id: Uuid::now_v7(),
            workflow_id: Uuid::now_v7(),
            workflow_name: "billing-lifecycle".to_string(),
            status: RunStatus::Sleeping,
            event_name: "trial_started".to_string(),
            entity_id: "user-42".to_string(),
            payload: json!({"user_id": "user-42"}),
            attempt: 1,
            error: None,
            failure: None,
            wake_at: Some(Utc::now()),
            created_at: Utc::now(),
            started_at: Some(Utc::now()),
            completed_at: None,
        };
        let json_str = serde_json::to_string(&run).unwrap();
        let parsed: Run = serde_json::from_str(&json_str).unwrap();
        assert_eq!(parsed.workflow_name, "billing-lifecycle");
        assert_eq!(parsed.status, RunStatus::Sleeping);
        assert!(parsed.wake_at.is_some());
    }

    #[test]
    fn test_failed_run_carries_failure_kind() {
        let mut run = Run {
            id: Uuid::now_v7(),
            workflow_id: Uuid::now_v7(),
            workflow_name: "plan-generation".to_string(),
            status: RunStatus::Failed,
            event_name: "plan_requested".to_string(),
            entity_id: "user-1".to_string(),
            payload: json!({}),
            attempt: 3,
            error: Some("rate limited".to_string()),
            failure: Some(FailureKind::Exhausted),
            wake_at: None,
            created_at: Utc::now(),
            started_at: Some(Utc::now()),
            completed_at: Some(Utc::now()),
        };
        let json_str = serde_json::to_string(&run).unwrap();
        assert!(json_str.contains("\"exhausted\""));

        run.failure = Some(FailureKind::Fatal);
        let json_str = serde_json::to_string(&run).unwrap();
        assert!(json_str.contains("\"fatal\""));
    }

    #[test]
    fn test_step_record_constructors() {
        let run_id = Uuid::now_v7();

        let done = StepRecord::completed(run_id, "generate-plan", json!({"plan": []}), 2);
        assert_eq!(done.status, StepStatus::Completed);
        assert_eq!(done.attempt, 2);
        assert!(done.output.is_some());
        assert!(done.error.is_none());

        let failed = StepRecord::failed(run_id, "generate-plan", "timeout", 1);
        assert_eq!(failed.status, StepStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("timeout"));

        let waiting = StepRecord::waiting(run_id, "await-trial-end", Utc::now(), 1);
        assert_eq!(waiting.status, StepStatus::Waiting);
        assert!(waiting.wake_at.is_some());
    }

    #[test]
    fn test_step_record_json_roundtrip() {
        let record = StepRecord::completed(
            Uuid::now_v7(),
            "build-context",
            json!({"working_weights": {"squat": 102.5}}),
            1,
        );
        let json_str = serde_json::to_string(&record).unwrap();
        let parsed: StepRecord = serde_json::from_str(&json_str).unwrap();
        assert_eq!(parsed.step_name, "build-context");
        assert_eq!(parsed.status, StepStatus::Completed);
    }
}

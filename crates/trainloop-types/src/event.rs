//! Event types for Trainloop.
//!
//! Two layers of events exist. `Event` is the domain event routed to
//! workflows: schedule ticks, user actions, and CDC-style row changes from
//! the application database. `FabricEvent` is the internal broadcast stream
//! the engine publishes for observers (log tails, test assertions).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Event names (closed set)
// ---------------------------------------------------------------------------

/// The closed set of routable event names.
///
/// Workflows subscribe to variants of this enum; an event that no workflow
/// subscribes to is a routing error, caught in tests rather than silently
/// dropped in production.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventName {
    /// Synthetic event emitted by the scheduler; `entity_id` carries the
    /// workflow name being ticked.
    CronTick,
    /// A client asked for a new training plan.
    PlanRequested,
    /// A plan finished generating (emitted by the plan workflow itself).
    PlanGenerated,
    /// Row change on the goals table.
    GoalUpdated,
    /// A workout session was logged.
    WorkoutLogged,
    /// A subscription trial began.
    TrialStarted,
}

impl EventName {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventName::CronTick => "cron_tick",
            EventName::PlanRequested => "plan_requested",
            EventName::PlanGenerated => "plan_generated",
            EventName::GoalUpdated => "goal_updated",
            EventName::WorkoutLogged => "workout_logged",
            EventName::TrialStarted => "trial_started",
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventName {
    type Err = UnknownEventName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cron_tick" => Ok(EventName::CronTick),
            "plan_requested" => Ok(EventName::PlanRequested),
            "plan_generated" => Ok(EventName::PlanGenerated),
            "goal_updated" => Ok(EventName::GoalUpdated),
            "workout_logged" => Ok(EventName::WorkoutLogged),
            "trial_started" => Ok(EventName::TrialStarted),
            other => Err(UnknownEventName(other.to_string())),
        }
    }
}

/// Error for event names outside the closed set.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown event name: {0}")]
pub struct UnknownEventName(pub String);

// ---------------------------------------------------------------------------
// Domain event
// ---------------------------------------------------------------------------

/// A domain event submitted to the router.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// UUIDv7 event ID.
    pub id: Uuid,
    /// Which event this is.
    pub name: EventName,
    /// The entity the event concerns (user ID, goal ID, workflow name for
    /// cron ticks). Debounce and throttle key on this.
    pub entity_id: String,
    /// JSON payload. For row-change events this is a serialized `RowChange`.
    pub payload: serde_json::Value,
    /// When the event occurred at its source.
    pub occurred_at: DateTime<Utc>,
}

impl Event {
    pub fn new(name: EventName, entity_id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::now_v7(),
            name,
            entity_id: entity_id.into(),
            payload,
            occurred_at: Utc::now(),
        }
    }

    /// The synthetic event a schedule fire produces.
    pub fn cron_tick(workflow_name: impl Into<String>, fired_at: DateTime<Utc>) -> Self {
        let workflow_name = workflow_name.into();
        Self {
            id: Uuid::now_v7(),
            name: EventName::CronTick,
            payload: serde_json::json!({
                "workflow": workflow_name,
                "fired_at": fired_at.to_rfc3339(),
            }),
            entity_id: workflow_name,
            occurred_at: fired_at,
        }
    }

    /// A CDC-style row change event.
    pub fn row_change(name: EventName, entity_id: impl Into<String>, change: &RowChange) -> Self {
        Self::new(
            name,
            entity_id,
            serde_json::to_value(change).unwrap_or(serde_json::Value::Null),
        )
    }

    /// Parse the payload as a `RowChange`, if it is one.
    pub fn as_row_change(&self) -> Option<RowChange> {
        serde_json::from_value(self.payload.clone()).ok()
    }
}

/// Before/after snapshot of a changed row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowChange {
    /// Row state before the change (None for inserts).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<serde_json::Value>,
    /// Row state after the change (None for deletes).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<serde_json::Value>,
}

impl RowChange {
    pub fn insert(after: serde_json::Value) -> Self {
        Self {
            before: None,
            after: Some(after),
        }
    }

    pub fn update(before: serde_json::Value, after: serde_json::Value) -> Self {
        Self {
            before: Some(before),
            after: Some(after),
        }
    }

    pub fn delete(before: serde_json::Value) -> Self {
        Self {
            before: Some(before),
            after: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Fabric events (internal broadcast stream)
// ---------------------------------------------------------------------------

/// Internal lifecycle events broadcast by the engine.
///
/// Serialized with an adjacent `type` tag so log consumers can match on the
/// wire without knowing the full enum.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FabricEvent {
    RunQueued {
        run_id: Uuid,
        workflow_name: String,
    },
    RunStarted {
        run_id: Uuid,
        workflow_name: String,
        event_name: String,
        attempt: u32,
    },
    RunSleeping {
        run_id: Uuid,
        step_name: String,
        wake_at: DateTime<Utc>,
    },
    RunRetrying {
        run_id: Uuid,
        workflow_name: String,
        attempt: u32,
        delay_ms: u64,
    },
    RunCompleted {
        run_id: Uuid,
        workflow_name: String,
        attempts: u32,
    },
    RunFailed {
        run_id: Uuid,
        workflow_name: String,
        error: String,
        failure: String,
    },
    StepStarted {
        run_id: Uuid,
        step_name: String,
        attempt: u32,
    },
    StepCompleted {
        run_id: Uuid,
        step_name: String,
        memoized: bool,
    },
    StepFailed {
        run_id: Uuid,
        step_name: String,
        error: String,
        transient: bool,
    },
    ScheduleFired {
        workflow_name: String,
        fired_at: DateTime<Utc>,
    },
    EventDropped {
        workflow_name: String,
        event_name: String,
        reason: DropReason,
    },
}

/// Why the router declined to run a workflow for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// A newer event for the same entity arrived inside the debounce window.
    Superseded,
    /// The rolling throttle window was full.
    Throttled,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_name_roundtrip() {
        for name in [
            EventName::CronTick,
            EventName::PlanRequested,
            EventName::PlanGenerated,
            EventName::GoalUpdated,
            EventName::WorkoutLogged,
            EventName::TrialStarted,
        ] {
            let parsed: EventName = name.as_str().parse().unwrap();
            assert_eq!(parsed, name);
            let json = serde_json::to_string(&name).unwrap();
            assert_eq!(json.trim_matches('"'), name.as_str());
        }
    }

    #[test]
    fn test_event_name_rejects_unknown() {
        let err = "profile_viewed".parse::<EventName>().unwrap_err();
        assert!(err.to_string().contains("profile_viewed"));
    }

    #[test]
    fn test_cron_tick_carries_workflow_name_as_entity() {
        let event = Event::cron_tick("nightly-maintenance", Utc::now());
        assert_eq!(event.name, EventName::CronTick);
        assert_eq!(event.entity_id, "nightly-maintenance");
        assert_eq!(event.payload["workflow"], "nightly-maintenance");
    }

    #[test]
    fn test_row_change_event_roundtrip() {
        let change = RowChange::update(
            json!({"goal_id": "g-1", "completed": false}),
            json!({"goal_id": "g-1", "completed": true}),
        );
        let event = Event::row_change(EventName::GoalUpdated, "user-7", &change);
        assert_eq!(event.entity_id, "user-7");

        let parsed = event.as_row_change().expect("payload is a RowChange");
        assert_eq!(parsed, change);
        assert_eq!(parsed.after.unwrap()["completed"], true);
    }

    #[test]
    fn test_row_change_insert_and_delete_shapes() {
        let insert = RowChange::insert(json!({"id": 1}));
        assert!(insert.before.is_none());
        assert!(insert.after.is_some());

        let delete = RowChange::delete(json!({"id": 1}));
        assert!(delete.before.is_some());
        assert!(delete.after.is_none());
    }

    #[test]
    fn test_fabric_event_tagged_serde() {
        let event = FabricEvent::StepFailed {
            run_id: Uuid::now_v7(),
            step_name: "generate-plan".to_string(),
            error: "429 rate limited".to_string(),
            transient: true,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"step_failed\""));
        let parsed: FabricEvent = serde_json::from_str(&json).unwrap();
        assert!(matches!(parsed, FabricEvent::StepFailed { transient: true, .. }));
    }

    #[test]
    fn test_drop_reason_serde() {
        let event = FabricEvent::EventDropped {
            workflow_name: "goal-notify".to_string(),
            event_name: "goal_updated".to_string(),
            reason: DropReason::Throttled,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"reason\":\"throttled\""));
    }
}

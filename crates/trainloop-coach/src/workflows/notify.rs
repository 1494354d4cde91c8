//! Goal-completion notification.
//!
//! Triggered by `GoalUpdated` row changes, throttled per user so an import
//! touching many goals cannot flood someone's inbox. The notifier call is
//! the terminal step: a delivery failure is retried through the normal
//! step machinery, never rolling back anything.

use std::sync::Arc;

use serde_json::{Value, json};
use trainloop_engine::workflow::definition::{Step, Workflow};
use trainloop_types::error::StepError;
use trainloop_types::event::{EventName, RowChange};
use trainloop_types::workflow::{PolicyConfig, WorkflowDefinition};

use crate::collaborators::{Notification, Notifier};

/// At most this many notifications per user per window.
const THROTTLE_LIMIT: u32 = 3;
const THROTTLE_WINDOW_SECS: u64 = 3600;

pub struct GoalNotifyWorkflow<N> {
    definition: WorkflowDefinition,
    notifier: Arc<N>,
}

impl<N: Notifier + 'static> GoalNotifyWorkflow<N> {
    pub fn new(notifier: Arc<N>) -> Self {
        Self {
            definition: WorkflowDefinition::on_event("goal-notify", EventName::GoalUpdated)
                .with_description("Congratulate a user when a goal flips to completed")
                .with_policy(
                    PolicyConfig::default().with_throttle(THROTTLE_LIMIT, THROTTLE_WINDOW_SECS),
                ),
            notifier,
        }
    }
}

impl<N: Notifier + 'static> Workflow for GoalNotifyWorkflow<N> {
    fn definition(&self) -> &WorkflowDefinition {
        &self.definition
    }

    fn steps(&self) -> Vec<Step> {
        let notifier = self.notifier.clone();
        vec![
            Step::compute("detect-completion", |ctx| async move {
                let change = ctx.event.as_row_change().ok_or_else(|| {
                    StepError::Invalid("goal_updated payload is not a row change".into())
                })?;
                Ok(detect_completion(&change))
            }),
            Step::compute("send-congratulations", move |ctx| {
                let notifier = notifier.clone();
                async move {
                    let detected = ctx.require_output("detect-completion")?;
                    if detected["completed"] != true {
                        return Ok(json!({"sent": false}));
                    }
                    let name = detected["name"].as_str().unwrap_or("your goal");
                    let notification = Notification::new(
                        ctx.event.entity_id.clone(),
                        "Goal reached!",
                        format!("You just completed {name}. Time to set the next one."),
                    );
                    notifier.notify(&notification).await?;
                    Ok(json!({"sent": true}))
                }
            }),
        ]
    }
}

/// A completion is a row change where `completed` flips false-to-true.
///
/// Inserts that arrive already completed do not count; neither do edits to
/// a goal that was completed before.
fn detect_completion(change: &RowChange) -> Value {
    let after_completed = change
        .after
        .as_ref()
        .and_then(|row| row["completed"].as_bool())
        .unwrap_or(false);
    let before_completed = change
        .before
        .as_ref()
        .and_then(|row| row["completed"].as_bool())
        .unwrap_or(false);

    let completed = after_completed && !before_completed && change.before.is_some();
    let row = change.after.as_ref().or(change.before.as_ref());
    json!({
        "completed": completed,
        "goal_id": row.and_then(|r| r["goal_id"].as_str()),
        "name": row.and_then(|r| r["name"].as_str()),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

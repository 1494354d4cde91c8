//! Accumulated run state passed to step bodies.
//!
//! The context carries the triggering event plus the memoized outputs of
//! every step completed so far. It is cloned into each step body, so step
//! code owns an immutable snapshot; only the executor mutates the original
//! between steps.

use std::collections::HashMap;

use trainloop_types::error::StepError;
use trainloop_types::event::Event;
use uuid::Uuid;

/// Maximum serialized size of a single step output (1 MB). Larger outputs
/// are replaced with a truncation marker rather than bloating the ledger.
pub const MAX_STEP_OUTPUT_SIZE: usize = 1024 * 1024;

/// Snapshot of run state visible to a step body.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// The run being executed.
    pub run_id: Uuid,
    /// Name of the workflow (for log lines).
    pub workflow_name: String,
    /// The event that triggered this run.
    pub event: Event,
    /// Outputs of completed steps, keyed by step name.
    step_outputs: HashMap<String, serde_json::Value>,
}

impl RunContext {
    pub fn new(run_id: Uuid, workflow_name: String, event: Event) -> Self {
        Self {
            run_id,
            workflow_name,
            event,
            step_outputs: HashMap::new(),
        }
    }

    /// Record a step output, truncating oversized values.
    pub fn set_output(&mut self, step_name: impl Into<String>, output: serde_json::Value) {
        let step_name = step_name.into();
        let size = output.to_string().len();
        if size > MAX_STEP_OUTPUT_SIZE {
            tracing::warn!(
                step = %step_name,
                size,
                limit = MAX_STEP_OUTPUT_SIZE,
                "step output exceeds size limit, truncating"
            );
            self.step_outputs.insert(
                step_name,
                serde_json::json!({
                    "truncated": true,
                    "original_size": size,
                }),
            );
        } else {
            self.step_outputs.insert(step_name, output);
        }
    }

    /// Output of a previously completed step, if any.
    pub fn output(&self, step_name: &str) -> Option<&serde_json::Value> {
        self.step_outputs.get(step_name)
    }

    /// Output of a previously completed step, or a fatal error.
    ///
    /// Step order is fixed per workflow, so a missing upstream output is a
    /// programming error, not a transient condition.
    pub fn require_output(&self, step_name: &str) -> Result<&serde_json::Value, StepError> {
        self.step_outputs
            .get(step_name)
            .ok_or_else(|| StepError::Invalid(format!("no output recorded for step '{step_name}'")))
    }

    /// Number of step outputs recorded so far.
    pub fn completed_steps(&self) -> usize {
        self.step_outputs.len()
    }

    /// All step outputs (for the run outcome).
    pub fn into_outputs(self) -> HashMap<String, serde_json::Value> {
        self.step_outputs
    }
}

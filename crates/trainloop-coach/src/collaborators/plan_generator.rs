//! Template-based plan generator.
//!
//! Deterministic stand-in for an LLM behind the engine's `Generator` seam:
//! it assembles a weekly plan directly from the prepared context (working
//! weights and recovered muscle groups) and reports synthetic token usage
//! so the cache, pricing, and quota paths all exercise end to end. The
//! daemon runs this until a hosted model integration is configured.

use serde_json::{Value, json};
use trainloop_engine::generate::{GenerateError, Generated, Generator, StructuredPrompt};
use trainloop_types::cache::TokenUsage;

/// Model name reported in usage samples and cache entries.
pub const STATIC_MODEL: &str = "static-template-1";

/// Exercises prescribed per session when no weight history narrows them.
const SESSION_SLOTS: usize = 4;

#[derive(Debug, Clone, Copy, Default)]
pub struct StaticPlanGenerator;

impl Generator for StaticPlanGenerator {
    async fn generate(&self, prompt: &StructuredPrompt) -> Result<Generated, GenerateError> {
        let context = &prompt.context;
        let sessions_per_week = context["sessions_per_week"].as_u64().unwrap_or(3).max(1);

        let weights = context["working_weights"]
            .as_object()
            .cloned()
            .unwrap_or_default();
        let recovered: Vec<&str> = context["recovered_groups"]
            .as_array()
            .map(|groups| groups.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        let mut sessions = Vec::with_capacity(sessions_per_week as usize);
        for day in 0..sessions_per_week {
            let mut exercises = Vec::new();
            for (index, (exercise, weight)) in weights.iter().enumerate() {
                if index % sessions_per_week as usize == day as usize {
                    exercises.push(json!({
                        "exercise": exercise,
                        "weight_kg": weight,
                        "sets": 3,
                        "reps": 5,
                    }));
                }
            }
            exercises.truncate(SESSION_SLOTS);
            sessions.push(json!({
                "day": day + 1,
                "focus": context["focus"].as_str().unwrap_or("general"),
                "exercises": exercises,
            }));
        }

        let plan = json!({
            "sessions": sessions,
            "avoid_groups": context["unrecovered_groups"].clone(),
            "emphasize_groups": recovered,
        });

        // Synthetic but stable counts so cost estimates are reproducible.
        let input_tokens = (context.to_string().len() / 4) as u32;
        let output_tokens = (plan.to_string().len() / 4) as u32;

        Ok(Generated {
            result: plan,
            usage: TokenUsage::new(input_tokens, output_tokens),
            model: STATIC_MODEL.to_string(),
        })
    }
}

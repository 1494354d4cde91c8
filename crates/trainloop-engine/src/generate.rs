//! Structured-generation collaborator trait.
//!
//! The engine never talks to a model provider directly. Workflows that need
//! generated content depend on the `Generator` trait; the binary wires in a
//! real implementation, tests wire in deterministic ones.

use serde_json::Value;
use trainloop_types::cache::TokenUsage;
use trainloop_types::error::StepError;

/// A prompt for structured (JSON) generation.
#[derive(Debug, Clone)]
pub struct StructuredPrompt {
    /// System/instruction text.
    pub instructions: String,
    /// The input context serialized for the model.
    pub context: Value,
    /// JSON schema the result must conform to, when the caller has one.
    pub schema: Option<Value>,
}

impl StructuredPrompt {
    pub fn new(instructions: impl Into<String>, context: Value) -> Self {
        Self {
            instructions: instructions.into(),
            context,
            schema: None,
        }
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.schema = Some(schema);
        self
    }
}

/// A completed generation: the structured result plus accounting metadata.
#[derive(Debug, Clone)]
pub struct Generated {
    /// The structured result payload.
    pub result: Value,
    /// Token usage reported by the provider.
    pub usage: TokenUsage,
    /// The model that produced the result.
    pub model: String,
}

/// Errors a generator implementation can surface.
#[derive(Debug, thiserror::Error)]
pub enum GenerateError {
    /// Provider rate limit. Transient.
    #[error("generation rate limited: {0}")]
    RateLimited(String),

    /// Request timed out. Transient.
    #[error("generation timed out after {0}ms")]
    Timeout(u64),

    /// Transport-level failure. Transient.
    #[error("generation connection failed: {0}")]
    Connection(String),

    /// The provider returned something that does not parse or match the
    /// schema. Retrying the same prompt will not help.
    #[error("invalid generation response: {0}")]
    InvalidResponse(String),
}

impl From<GenerateError> for StepError {
    fn from(err: GenerateError) -> Self {
        match err {
            GenerateError::RateLimited(msg) => StepError::RateLimited(msg),
            GenerateError::Timeout(ms) => StepError::Timeout(format!("{ms}ms")),
            GenerateError::Connection(msg) => StepError::Connection(msg),
            GenerateError::InvalidResponse(msg) => StepError::Invalid(msg),
        }
    }
}

/// Structured-generation interface the plan and chat workflows depend on.
pub trait Generator: Send + Sync {
    /// Generate a structured result for the prompt.
    fn generate(
        &self,
        prompt: &StructuredPrompt,
    ) -> impl std::future::Future<Output = Result<Generated, GenerateError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;
    use trainloop_types::error::ErrorClass;

    #[test]
    fn test_transient_generate_errors_stay_transient_as_step_errors() {
        let cases = [
            GenerateError::RateLimited("429".into()),
            GenerateError::Timeout(30_000),
            GenerateError::Connection("reset".into()),
        ];
        for err in cases {
            let step: StepError = err.into();
            assert_eq!(step.class(), ErrorClass::Transient);
        }
    }

    #[test]
    fn test_invalid_response_is_fatal() {
        let step: StepError = GenerateError::InvalidResponse("not json".into()).into();
        assert_eq!(step.class(), ErrorClass::Fatal);
    }
}

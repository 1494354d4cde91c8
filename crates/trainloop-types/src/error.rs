//! Error types shared across the fabric.
//!
//! `StepError` is the error surface of workflow step bodies; its
//! classification into transient/fatal drives the retry policy.

use thiserror::Error;

/// Whether an error is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Likely to succeed on a later attempt (timeouts, rate limits,
    /// connection resets, provider 5xx).
    Transient,
    /// Retrying would not help (bad input, schema violations, 4xx other
    /// than 429).
    Fatal,
}

/// Error raised by a workflow step body.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("timed out: {0}")]
    Timeout(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("upstream returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("invalid input: {0}")]
    Invalid(String),

    #[error("{0}")]
    Other(String),
}

impl StepError {
    /// Classify for the retry policy.
    ///
    /// HTTP 429 and 5xx are transient; any other status is fatal. Unknown
    /// errors are treated as fatal so a bug cannot spin the retry loop.
    pub fn class(&self) -> ErrorClass {
        match self {
            StepError::Timeout(_) | StepError::RateLimited(_) | StepError::Connection(_) => {
                ErrorClass::Transient
            }
            StepError::Status { status, .. } => {
                if *status == 429 || (500..600).contains(status) {
                    ErrorClass::Transient
                } else {
                    ErrorClass::Fatal
                }
            }
            StepError::Invalid(_) | StepError::Other(_) => ErrorClass::Fatal,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}

/// Errors from repository operations (used by trait definitions in
/// trainloop-engine).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}

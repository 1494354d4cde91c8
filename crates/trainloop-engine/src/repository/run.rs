//! Run repository trait definition.
//!
//! Defines the storage interface for workflow runs and their step records.
//! The infrastructure layer (trainloop-infra) implements this trait with
//! SQLite persistence.

use chrono::{DateTime, Utc};
use trainloop_types::error::RepositoryError;
use trainloop_types::workflow::{FailureKind, Run, RunStatus, StepRecord};
use uuid::Uuid;

/// Repository trait for run persistence.
///
/// Covers two entity families:
/// - **Runs:** Create/update/query workflow execution instances.
/// - **Steps:** The memoization ledger, keyed `(run_id, step_name)`.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait RunRepository: Send + Sync {
    // -----------------------------------------------------------------------
    // Runs
    // -----------------------------------------------------------------------

    /// Create a new run record.
    fn create_run(
        &self,
        run: &Run,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Update a run's status, error, failure kind, and wake instant.
    ///
    /// Also stamps `started_at` on the transition to `Running` and
    /// `completed_at` on terminal statuses.
    fn update_run_status(
        &self,
        run_id: &Uuid,
        status: RunStatus,
        error: Option<&str>,
        failure: Option<FailureKind>,
        wake_at: Option<DateTime<Utc>>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Bump a run's attempt counter before a retry.
    fn update_run_attempt(
        &self,
        run_id: &Uuid,
        attempt: u32,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Get a run by its UUID.
    fn get_run(
        &self,
        run_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Run>, RepositoryError>> + Send;

    /// List runs for a workflow, newest first.
    ///
    /// Keyed by the stable workflow name: definition IDs are minted per
    /// process, so they cannot address runs persisted by earlier processes.
    fn list_runs(
        &self,
        workflow_name: &str,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<Run>, RepositoryError>> + Send;

    /// List runs that were interrupted mid-flight (non-terminal status).
    ///
    /// Used on startup to resume runs the previous process left behind.
    fn list_interrupted_runs(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<Run>, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Step records (memoization ledger)
    // -----------------------------------------------------------------------

    /// Upsert a step record.
    ///
    /// A `Completed` record is final: the upsert must not overwrite one.
    /// Returns `true` if the write landed, `false` if a completed record
    /// already held the slot.
    fn put_step(
        &self,
        record: &StepRecord,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// Get a step record by its composite key.
    fn get_step(
        &self,
        run_id: &Uuid,
        step_name: &str,
    ) -> impl std::future::Future<Output = Result<Option<StepRecord>, RepositoryError>> + Send;

    /// List all step records for a run, in insertion order.
    fn list_steps(
        &self,
        run_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<StepRecord>, RepositoryError>> + Send;
}

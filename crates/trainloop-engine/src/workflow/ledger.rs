//! Durable step ledger: memoization records over the run repository.
//!
//! The ledger is the crash-safety mechanism. Each named step writes exactly
//! one record per run; on resume, completed records short-circuit their
//! steps and the run re-enters at the first step without one.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use trainloop_types::error::RepositoryError;
use trainloop_types::workflow::{StepRecord, StepStatus};
use uuid::Uuid;

use crate::repository::run::RunRepository;

/// Errors from ledger operations.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("ledger storage error: {0}")]
    Storage(#[from] RepositoryError),
}

/// Writes and reads step records for the executor.
pub struct StepLedger<R: RunRepository> {
    repository: Arc<R>,
}

impl<R: RunRepository> StepLedger<R> {
    pub fn new(repository: Arc<R>) -> Self {
        Self { repository }
    }

    /// Memoize a successful step output.
    ///
    /// Returns `false` when a completed record already held the slot (a
    /// racing attempt won); the caller should treat the stored output as
    /// authoritative.
    pub async fn record_success(
        &self,
        run_id: Uuid,
        step_name: &str,
        output: serde_json::Value,
        attempt: u32,
    ) -> Result<bool, LedgerError> {
        let record = StepRecord::completed(run_id, step_name, output, attempt);
        let landed = self.repository.put_step(&record).await?;
        if !landed {
            tracing::debug!(%run_id, step = %step_name, "step already memoized, keeping first result");
        }
        Ok(landed)
    }

    /// Record a failed attempt. Informational: a later attempt overwrites it.
    pub async fn record_failure(
        &self,
        run_id: Uuid,
        step_name: &str,
        error: &str,
        attempt: u32,
    ) -> Result<(), LedgerError> {
        let record = StepRecord::failed(run_id, step_name, error, attempt);
        self.repository.put_step(&record).await?;
        Ok(())
    }

    /// Arm a durable timer: persist the wake instant before sleeping.
    pub async fn arm_timer(
        &self,
        run_id: Uuid,
        step_name: &str,
        wake_at: DateTime<Utc>,
        attempt: u32,
    ) -> Result<(), LedgerError> {
        let record = StepRecord::waiting(run_id, step_name, wake_at, attempt);
        self.repository.put_step(&record).await?;
        Ok(())
    }

    /// Mark an armed timer as elapsed.
    pub async fn complete_timer(
        &self,
        run_id: Uuid,
        step_name: &str,
        attempt: u32,
    ) -> Result<(), LedgerError> {
        let output = serde_json::json!({"slept": true});
        let record = StepRecord::completed(run_id, step_name, output, attempt);
        self.repository.put_step(&record).await?;
        Ok(())
    }

    /// The stored record for a step, if any.
    pub async fn get(
        &self,
        run_id: Uuid,
        step_name: &str,
    ) -> Result<Option<StepRecord>, LedgerError> {
        Ok(self.repository.get_step(&run_id, step_name).await?)
    }

    /// Names of steps already completed in this run.
    pub async fn completed_step_names(&self, run_id: Uuid) -> Result<Vec<String>, LedgerError> {
        let steps = self.repository.list_steps(&run_id).await?;
        Ok(steps
            .into_iter()
            .filter(|s| s.status == StepStatus::Completed)
            .map(|s| s.step_name)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use trainloop_types::event::EventName;
    use trainloop_types::workflow::{Run, RunStatus};

    use crate::repository::memory::InMemoryRunRepository;

    async fn ledger_with_run() -> (StepLedger<InMemoryRunRepository>, Uuid) {
        let repo = Arc::new(InMemoryRunRepository::new());
        let run = Run {
            id: Uuid::now_v7(),
            workflow_id: Uuid::now_v7(),
            workflow_name: "test".to_string(),
            status: RunStatus::Running,
            event_name: EventName::PlanRequested.as_str().to_string(),
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
        (StepLedger::new(repo), run.id)
    }

    #[tokio::test]
    async fn success_is_memoized_once() {
        let (ledger, run_id) = ledger_with_run().await;

        assert!(ledger
            .record_success(run_id, "generate", json!({"v": 1}), 1)
            .await
            .unwrap());
        // Second success for the same slot loses the race.
        assert!(!ledger
            .record_success(run_id, "generate", json!({"v": 2}), 2)
            .await
            .unwrap());

        let record = ledger.get(run_id, "generate").await.unwrap().unwrap();
        assert_eq!(record.output.unwrap()["v"], 1);
        assert_eq!(record.attempt, 1);
    }

    #[tokio::test]
    async fn failure_then_success_overwrites() {
        let (ledger, run_id) = ledger_with_run().await;

        ledger
            .record_failure(run_id, "generate", "rate limited", 1)
            .await
            .unwrap();
        let record = ledger.get(run_id, "generate").await.unwrap().unwrap();
        assert_eq!(record.status, StepStatus::Failed);

        assert!(ledger
            .record_success(run_id, "generate", json!({"ok": true}), 2)
            .await
            .unwrap());
        let record = ledger.get(run_id, "generate").await.unwrap().unwrap();
        assert_eq!(record.status, StepStatus::Completed);
    }

    #[tokio::test]
    async fn timer_arms_then_completes() {
        let (ledger, run_id) = ledger_with_run().await;
        let wake = Utc::now() + chrono::Duration::seconds(30);

        ledger.arm_timer(run_id, "await", wake, 1).await.unwrap();
        let record = ledger.get(run_id, "await").await.unwrap().unwrap();
        assert_eq!(record.status, StepStatus::Waiting);
        assert_eq!(record.wake_at, Some(wake));

        ledger.complete_timer(run_id, "await", 1).await.unwrap();
        let record = ledger.get(run_id, "await").await.unwrap().unwrap();
        assert_eq!(record.status, StepStatus::Completed);
    }

    #[tokio::test]
    async fn completed_step_names_skips_failures() {
        let (ledger, run_id) = ledger_with_run().await;

        ledger
            .record_success(run_id, "a", json!(1), 1)
            .await
            .unwrap();
        ledger.record_failure(run_id, "b", "boom", 1).await.unwrap();

        let names = ledger.completed_step_names(run_id).await.unwrap();
        assert_eq!(names, vec!["a".to_string()]);
    }
}

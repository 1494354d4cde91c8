//! In-memory repository implementations.
//!
//! Used by engine tests and available for local development where no SQLite
//! file is wanted. Semantics mirror the SQLite implementations, including
//! the completed-step-records-are-final rule.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use trainloop_types::cache::CacheEntry;
use trainloop_types::error::RepositoryError;
use trainloop_types::quota::{QuotaCounter, UsageEvent, UsageKind, UsageSample};
use trainloop_types::workflow::{FailureKind, Run, RunStatus, StepRecord, StepStatus};
use uuid::Uuid;

use super::cache::CacheStore;
use super::quota::QuotaStore;
use super::run::RunRepository;

// ---------------------------------------------------------------------------
// Runs + steps
// ---------------------------------------------------------------------------

/// In-memory `RunRepository`.
#[derive(Default)]
pub struct InMemoryRunRepository {
    runs: DashMap<Uuid, Run>,
    // Step records per run, in insertion order.
    steps: Mutex<HashMap<Uuid, Vec<StepRecord>>>,
}

impl InMemoryRunRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RunRepository for InMemoryRunRepository {
    async fn create_run(&self, run: &Run) -> Result<(), RepositoryError> {
        self.runs.insert(run.id, run.clone());
        Ok(())
    }

    async fn update_run_status(
        &self,
        run_id: &Uuid,
        status: RunStatus,
        error: Option<&str>,
        failure: Option<FailureKind>,
        wake_at: Option<DateTime<Utc>>,
    ) -> Result<(), RepositoryError> {
        let mut run = self.runs.get_mut(run_id).ok_or(RepositoryError::NotFound)?;
        run.status = status;
        run.error = error.map(str::to_string);
        run.failure = failure;
        run.wake_at = wake_at;
        let now = Utc::now();
        if status == RunStatus::Running && run.started_at.is_none() {
            run.started_at = Some(now);
        }
        if status.is_terminal() {
            run.completed_at = Some(now);
        }
        Ok(())
    }

    async fn update_run_attempt(&self, run_id: &Uuid, attempt: u32) -> Result<(), RepositoryError> {
        let mut run = self.runs.get_mut(run_id).ok_or(RepositoryError::NotFound)?;
        run.attempt = attempt;
        Ok(())
    }

    async fn get_run(&self, run_id: &Uuid) -> Result<Option<Run>, RepositoryError> {
        Ok(self.runs.get(run_id).map(|r| r.clone()))
    }

    async fn list_runs(&self, workflow_name: &str, limit: u32) -> Result<Vec<Run>, RepositoryError> {
        let mut runs: Vec<Run> = self
            .runs
            .iter()
            .filter(|r| r.workflow_name == workflow_name)
            .map(|r| r.clone())
            .collect();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        runs.truncate(limit as usize);
        Ok(runs)
    }

    async fn list_interrupted_runs(&self) -> Result<Vec<Run>, RepositoryError> {
        let mut runs: Vec<Run> = self
            .runs
            .iter()
            .filter(|r| !r.status.is_terminal())
            .map(|r| r.clone())
            .collect();
        runs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(runs)
    }

    async fn put_step(&self, record: &StepRecord) -> Result<bool, RepositoryError> {
        let mut steps = self
            .steps
            .lock()
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        let entries = steps.entry(record.run_id).or_default();
        match entries
            .iter_mut()
            .find(|r| r.step_name == record.step_name)
        {
            Some(existing) if existing.status == StepStatus::Completed => Ok(false),
            Some(existing) => {
                *existing = record.clone();
                Ok(true)
            }
            None => {
                entries.push(record.clone());
                Ok(true)
            }
        }
    }

    async fn get_step(
        &self,
        run_id: &Uuid,
        step_name: &str,
    ) -> Result<Option<StepRecord>, RepositoryError> {
        let steps = self
            .steps
            .lock()
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        Ok(steps
            .get(run_id)
            .and_then(|entries| entries.iter().find(|r| r.step_name == step_name).cloned()))
    }

    async fn list_steps(&self, run_id: &Uuid) -> Result<Vec<StepRecord>, RepositoryError> {
        let steps = self
            .steps
            .lock()
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        Ok(steps.get(run_id).cloned().unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

/// In-memory `CacheStore`.
#[derive(Default)]
pub struct InMemoryCacheStore {
    entries: DashMap<String, CacheEntry>,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl CacheStore for InMemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, RepositoryError> {
        Ok(self.entries.get(key).map(|e| e.clone()))
    }

    async fn upsert(&self, entry: &CacheEntry) -> Result<(), RepositoryError> {
        self.entries.insert(entry.key.clone(), entry.clone());
        Ok(())
    }

    async fn record_hit(&self, key: &str) -> Result<(), RepositoryError> {
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.hit_count += 1;
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, RepositoryError> {
        Ok(self.entries.remove(key).is_some())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64, RepositoryError> {
        let keys: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| e.key().clone())
            .collect();
        let count = keys.len() as u64;
        for key in keys {
            self.entries.remove(&key);
        }
        Ok(count)
    }

    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let keys: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.value().is_expired(now))
            .map(|e| e.key().clone())
            .collect();
        let count = keys.len() as u64;
        for key in keys {
            self.entries.remove(&key);
        }
        Ok(count)
    }
}

// ---------------------------------------------------------------------------
// Quota
// ---------------------------------------------------------------------------

/// In-memory `QuotaStore`.
#[derive(Default)]
pub struct InMemoryQuotaStore {
    counters: DashMap<String, QuotaCounter>,
    events: Mutex<Vec<UsageEvent>>,
}

impl InMemoryQuotaStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl QuotaStore for InMemoryQuotaStore {
    async fn record_usage(
        &self,
        user_id: &str,
        sample: &UsageSample,
        period_start: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut counter = self
            .counters
            .entry(user_id.to_string())
            .or_insert_with(|| QuotaCounter::fresh(user_id, period_start));
        if counter.period_start < period_start {
            *counter = QuotaCounter::fresh(user_id, period_start);
        }
        match sample.kind {
            UsageKind::Generation => counter.generation_count += 1,
            UsageKind::Chat => counter.chat_count += 1,
        }
        counter.total_input_tokens += u64::from(sample.usage.input_tokens);
        counter.total_output_tokens += u64::from(sample.usage.output_tokens);
        counter.total_cost += sample.estimated_cost;
        drop(counter);

        let mut events = self
            .events
            .lock()
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        events.push(UsageEvent::new(user_id, sample.clone()));
        Ok(())
    }

    async fn get_counter(&self, user_id: &str) -> Result<Option<QuotaCounter>, RepositoryError> {
        Ok(self.counters.get(user_id).map(|c| c.clone()))
    }

    async fn list_usage_events(
        &self,
        user_id: &str,
        limit: u32,
    ) -> Result<Vec<UsageEvent>, RepositoryError> {
        let events = self
            .events
            .lock()
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        let mut matched: Vec<UsageEvent> = events
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect();
        matched.reverse();
        matched.truncate(limit as usize);
        Ok(matched)
    }

    async fn reset_expired_counters(
        &self,
        cutoff: DateTime<Utc>,
        new_period_start: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        let mut reset = 0u64;
        for mut counter in self.counters.iter_mut() {
            if counter.period_start < cutoff {
                let user_id = counter.user_id.clone();
                *counter = QuotaCounter::fresh(user_id, new_period_start);
                reset += 1;
            }
        }
        Ok(reset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use trainloop_types::cache::TokenUsage;

    fn sample_run() -> Run {
        Run {
            id: Uuid::now_v7(),
            workflow_id: Uuid::now_v7(),
            workflow_name: "plan-generation".to_string(),
            status: RunStatus::Queued,
            event_name: "plan_requested".to_string(),
            entity_id: "user-1".to_string(),
            payload: json!({"user_id": "user-1"}),
            attempt: 1,
            error: None,
            failure: None,
            wake_at: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    #[tokio::test]
    async fn completed_step_record_is_final() {
        let repo = InMemoryRunRepository::new();
        let run = sample_run();
        repo.create_run(&run).await.unwrap();

        let done = StepRecord::completed(run.id, "generate", json!({"v": 1}), 1);
        assert!(repo.put_step(&done).await.unwrap());

        // A later write (e.g. from a racing attempt) must not land.
        let overwrite = StepRecord::completed(run.id, "generate", json!({"v": 2}), 2);
        assert!(!repo.put_step(&overwrite).await.unwrap());

        let stored = repo.get_step(&run.id, "generate").await.unwrap().unwrap();
        assert_eq!(stored.output.unwrap()["v"], 1);
    }

    #[tokio::test]
    async fn failed_record_can_be_replaced_by_success() {
        let repo = InMemoryRunRepository::new();
        let run = sample_run();
        repo.create_run(&run).await.unwrap();

        let failed = StepRecord::failed(run.id, "generate", "timeout", 1);
        assert!(repo.put_step(&failed).await.unwrap());

        let done = StepRecord::completed(run.id, "generate", json!({"ok": true}), 2);
        assert!(repo.put_step(&done).await.unwrap());

        let stored = repo.get_step(&run.id, "generate").await.unwrap().unwrap();
        assert_eq!(stored.status, StepStatus::Completed);
        assert_eq!(stored.attempt, 2);
    }

    #[tokio::test]
    async fn interrupted_runs_exclude_terminal() {
        let repo = InMemoryRunRepository::new();
        let mut running = sample_run();
        running.status = RunStatus::Running;
        let mut done = sample_run();
        done.status = RunStatus::Completed;
        repo.create_run(&running).await.unwrap();
        repo.create_run(&done).await.unwrap();

        let interrupted = repo.list_interrupted_runs().await.unwrap();
        assert_eq!(interrupted.len(), 1);
        assert_eq!(interrupted[0].id, running.id);
    }

    #[tokio::test]
    async fn cache_prefix_delete_matches_entity() {
        let store = InMemoryCacheStore::new();
        for key in ["plan:user-1:aaaa", "plan:user-1:bbbb", "plan:user-2:cccc"] {
            let entry = CacheEntry {
                key: key.to_string(),
                cache_type: trainloop_types::cache::CacheType::Plan,
                entity_id: "user-1".to_string(),
                payload: json!({}),
                model: None,
                usage: TokenUsage::default(),
                hit_count: 0,
                created_at: Utc::now(),
                expires_at: Utc::now() + chrono::Duration::hours(1),
            };
            store.upsert(&entry).await.unwrap();
        }

        let removed = store.delete_prefix("plan:user-1:").await.unwrap();
        assert_eq!(removed, 2);
        assert!(store.get("plan:user-2:cccc").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn quota_rolls_over_to_new_period() {
        let store = InMemoryQuotaStore::new();
        let old_period = Utc::now() - chrono::Duration::days(40);
        let sample = UsageSample {
            kind: UsageKind::Generation,
            model: "coach-large".to_string(),
            usage: TokenUsage::new(100, 50),
            estimated_cost: 0.002,
            duration_ms: 1200,
            cache_hit: false,
        };
        store.record_usage("user-1", &sample, old_period).await.unwrap();
        store.record_usage("user-1", &sample, old_period).await.unwrap();
        assert_eq!(
            store.get_counter("user-1").await.unwrap().unwrap().generation_count,
            2
        );

        // A sample in a newer period resets the counter first.
        store.record_usage("user-1", &sample, Utc::now()).await.unwrap();
        let counter = store.get_counter("user-1").await.unwrap().unwrap();
        assert_eq!(counter.generation_count, 1);

        // Audit trail keeps everything.
        let events = store.list_usage_events("user-1", 10).await.unwrap();
        assert_eq!(events.len(), 3);
    }
}

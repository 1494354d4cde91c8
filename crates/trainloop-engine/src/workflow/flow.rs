//! Flow control: per-workflow concurrency limits, debounce, and throttle.
//!
//! Three independent knobs applied per `(workflow, entity)`:
//! - **Concurrency** bounds simultaneous runs; excess admissions queue FIFO
//!   on a fair semaphore.
//! - **Debounce** waits out a quiet period; a newer event for the same
//!   entity supersedes the pending one (last event wins).
//! - **Throttle** admits at most N events per rolling window and drops the
//!   rest outright.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use trainloop_types::workflow::WorkflowDefinition;
use uuid::Uuid;

/// Keyed flow-control state shared across the router.
#[derive(Default)]
pub struct FlowController {
    /// Per-workflow concurrency semaphores, created lazily.
    semaphores: DashMap<Uuid, Arc<Semaphore>>,
    /// Debounce generation counters per (workflow, entity). Each arrival
    /// bumps the counter; whoever still matches after the quiet period wins.
    debounce_generations: DashMap<(Uuid, String), u64>,
    /// Throttle admission timestamps per (workflow, entity).
    throttle_windows: DashMap<(Uuid, String), VecDeque<Instant>>,
}

impl FlowController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire a concurrency slot for the workflow, queueing FIFO when the
    /// limit is reached. Returns `None` when the workflow is unlimited.
    pub async fn acquire_slot(&self, def: &WorkflowDefinition) -> Option<OwnedSemaphorePermit> {
        let limit = def.policy.concurrency?;
        let semaphore = self
            .semaphores
            .entry(def.id)
            .or_insert_with(|| Arc::new(Semaphore::new(limit.max(1) as usize)))
            .clone();
        match semaphore.acquire_owned().await {
            Ok(permit) => Some(permit),
            // Closed semaphores only happen on shutdown races.
            Err(_) => {
                tracing::warn!(workflow = %def.name, "concurrency semaphore closed");
                None
            }
        }
    }

    /// Wait out the debounce quiet period for `(workflow, entity)`.
    ///
    /// Returns `true` if this event is still the latest after the period
    /// (it should run) and `false` if a newer arrival superseded it.
    /// Workflows without a debounce policy pass immediately.
    pub async fn debounce_gate(&self, def: &WorkflowDefinition, entity_id: &str) -> bool {
        let Some(debounce) = def.policy.debounce else {
            return true;
        };

        let key = (def.id, entity_id.to_string());
        let generation = {
            let mut entry = self.debounce_generations.entry(key.clone()).or_insert(0);
            *entry += 1;
            *entry
        };

        tokio::time::sleep(Duration::from_secs(debounce.period_secs)).await;

        // If no newer arrival bumped the counter, this event wins and the
        // entry is retired with it; idle entities leave no state behind.
        self.debounce_generations
            .remove_if(&key, |_, latest| *latest == generation)
            .is_some()
    }

    /// Throttle admission check for `(workflow, entity)`.
    ///
    /// Returns `true` when the rolling window has room; the admission is
    /// counted. Returns `false` when the window is full; the event should
    /// be dropped. Workflows without a throttle policy always admit.
    pub fn throttle_admit(&self, def: &WorkflowDefinition, entity_id: &str) -> bool {
        let Some(throttle) = def.policy.throttle else {
            return true;
        };

        let window = Duration::from_secs(throttle.period_secs);
        let now = Instant::now();

        // Retire this workflow's fully-expired windows so entities that went
        // quiet do not accumulate entries.
        self.throttle_windows.retain(|(workflow_id, _), timestamps| {
            *workflow_id != def.id
                || timestamps
                    .iter()
                    .any(|admitted| now.duration_since(*admitted) < window)
        });

        let key = (def.id, entity_id.to_string());
        let mut timestamps = self.throttle_windows.entry(key).or_default();

        while let Some(front) = timestamps.front() {
            if now.duration_since(*front) >= window {
                timestamps.pop_front();
            } else {
                break;
            }
        }

        if (timestamps.len() as u32) < throttle.limit {
            timestamps.push_back(now);
            true
        } else {
            false
        }
    }
}

impl std::fmt::Debug for FlowController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowController")
            .field("workflows_with_semaphores", &self.semaphores.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use trainloop_types::event::EventName;
    use trainloop_types::workflow::PolicyConfig;

    fn definition(policy: PolicyConfig) -> WorkflowDefinition {
        WorkflowDefinition::on_event("flow-test", EventName::GoalUpdated).with_policy(policy)
    }

    #[tokio::test]
    async fn unlimited_workflow_needs_no_permit() {
        let flow = FlowController::new();
        let def = definition(PolicyConfig::default());
        assert!(flow.acquire_slot(&def).await.is_none());
    }

    #[tokio::test]
    async fn concurrency_one_serializes_fifo() {
        let flow = Arc::new(FlowController::new());
        let def = Arc::new(definition(PolicyConfig::default().with_concurrency(1)));

        let running = Arc::new(AtomicU32::new(0));
        let peak = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let flow = flow.clone();
            let def = def.clone();
            let running = running.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                let _permit = flow.acquire_slot(&def).await;
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                running.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1, "two runs overlapped");
    }

    #[tokio::test(start_paused = true)]
    async fn debounce_last_event_wins() {
        let flow = Arc::new(FlowController::new());
        let def = Arc::new(definition(PolicyConfig::default().with_debounce(30)));

        let first = {
            let flow = flow.clone();
            let def = def.clone();
            tokio::spawn(async move { flow.debounce_gate(&def, "user-1").await })
        };
        // Let the first gate register before the second arrives.
        tokio::time::sleep(Duration::from_secs(5)).await;
        let second = {
            let flow = flow.clone();
            let def = def.clone();
            tokio::spawn(async move { flow.debounce_gate(&def, "user-1").await })
        };

        assert!(!first.await.unwrap(), "superseded event should not run");
        assert!(second.await.unwrap(), "latest event should run");
    }

    #[tokio::test(start_paused = true)]
    async fn debounce_keys_are_independent_per_entity() {
        let flow = Arc::new(FlowController::new());
        let def = Arc::new(definition(PolicyConfig::default().with_debounce(10)));

        let a = {
            let flow = flow.clone();
            let def = def.clone();
            tokio::spawn(async move { flow.debounce_gate(&def, "user-a").await })
        };
        let b = {
            let flow = flow.clone();
            let def = def.clone();
            tokio::spawn(async move { flow.debounce_gate(&def, "user-b").await })
        };

        assert!(a.await.unwrap());
        assert!(b.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn debounce_state_is_dropped_once_the_window_closes() {
        let flow = Arc::new(FlowController::new());
        let def = Arc::new(definition(PolicyConfig::default().with_debounce(10)));

        assert!(flow.debounce_gate(&def, "user-1").await);
        assert!(
            flow.debounce_generations.is_empty(),
            "a closed window should leave no generation entry behind"
        );

        // A superseded gate leaves the winner's bookkeeping in place until
        // the winner's own window closes, then everything is gone.
        let first = {
            let flow = flow.clone();
            let def = def.clone();
            tokio::spawn(async move { flow.debounce_gate(&def, "user-1").await })
        };
        tokio::time::sleep(Duration::from_secs(2)).await;
        let second = {
            let flow = flow.clone();
            let def = def.clone();
            tokio::spawn(async move { flow.debounce_gate(&def, "user-1").await })
        };
        assert!(!first.await.unwrap());
        assert!(second.await.unwrap());
        assert!(flow.debounce_generations.is_empty());
    }

    #[tokio::test]
    async fn no_debounce_passes_immediately() {
        let flow = FlowController::new();
        let def = definition(PolicyConfig::default());
        assert!(flow.debounce_gate(&def, "user-1").await);
    }

    #[tokio::test(start_paused = true)]
    async fn throttle_drops_excess_within_window() {
        let flow = FlowController::new();
        let def = definition(PolicyConfig::default().with_throttle(3, 3600));

        assert!(flow.throttle_admit(&def, "user-1"));
        assert!(flow.throttle_admit(&def, "user-1"));
        assert!(flow.throttle_admit(&def, "user-1"));
        assert!(!flow.throttle_admit(&def, "user-1"), "fourth within window");

        // Another entity has its own window.
        assert!(flow.throttle_admit(&def, "user-2"));

        // After the window rolls, admissions resume.
        tokio::time::sleep(Duration::from_secs(3601)).await;
        assert!(flow.throttle_admit(&def, "user-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn throttle_retires_windows_for_entities_that_went_quiet() {
        let flow = FlowController::new();
        let def = definition(PolicyConfig::default().with_throttle(3, 60));

        assert!(flow.throttle_admit(&def, "user-1"));
        assert!(flow.throttle_admit(&def, "user-2"));
        assert_eq!(flow.throttle_windows.len(), 2);

        // Only user-2 keeps sending; once user-1's admissions age out, its
        // window entry goes with them.
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(flow.throttle_admit(&def, "user-2"));
        assert_eq!(flow.throttle_windows.len(), 1);
        assert!(flow
            .throttle_windows
            .iter()
            .all(|entry| entry.key().1 == "user-2"));
    }
}

//! Cron scheduler wrapping `tokio-cron-scheduler` for workflow triggers.
//!
//! Provides:
//! - Standard cron expression parsing (6-field with seconds)
//! - Human-readable schedule normalization ("every 5 minutes" -> cron)
//! - At-most-once-per-minute dedup via a last-fired watermark
//! - Missed-run detection for catch-up on restart

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur during scheduling operations.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// Failed to create or manipulate a cron job.
    #[error("scheduler error: {0}")]
    JobError(String),

    /// Invalid cron expression or schedule string.
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    /// Workflow not found in the scheduler.
    #[error("workflow '{0}' not registered in scheduler")]
    WorkflowNotFound(String),
}

// ---------------------------------------------------------------------------
// Human-readable schedule normalization
// ---------------------------------------------------------------------------

/// Normalize a human-readable schedule string to a 6-field cron expression.
///
/// Supported patterns (case-insensitive):
/// - "every N minutes"     -> "0 */N * * * *"
/// - "every N hours"       -> "0 0 */N * * *"
/// - "every minute"        -> "0 * * * * *"
/// - "hourly"              -> "0 0 * * * *"
/// - "daily"               -> "0 0 0 * * *"
/// - "every day at HH:MM"  -> "0 MM HH * * *"
///
/// A 5-field cron expression gets "0" prepended for seconds; a 6-field
/// expression passes through unchanged.
pub fn normalize_schedule(input: &str) -> Result<String, SchedulerError> {
    let trimmed = input.trim();

    let parts: Vec<&str> = trimmed.split_whitespace().collect();
    if parts.len() == 5 {
        return Ok(format!("0 {trimmed}"));
    }
    if parts.len() == 6 {
        return Ok(trimmed.to_string());
    }

    let lower = trimmed.to_lowercase();

    if lower == "every minute" || lower == "minutely" {
        return Ok("0 * * * * *".to_string());
    }
    if lower == "every hour" || lower == "hourly" {
        return Ok("0 0 * * * *".to_string());
    }
    if lower == "every day" || lower == "daily" {
        return Ok("0 0 0 * * *".to_string());
    }

    if let Some(rest) = lower.strip_prefix("every ") {
        if let Some(at_part) = rest.strip_prefix("day at ") {
            let time_parts: Vec<&str> = at_part.split(':').collect();
            if time_parts.len() == 2 {
                let hour: u32 = time_parts[0]
                    .trim()
                    .parse()
                    .map_err(|_| SchedulerError::InvalidSchedule(input.to_string()))?;
                let minute: u32 = time_parts[1]
                    .trim()
                    .parse()
                    .map_err(|_| SchedulerError::InvalidSchedule(input.to_string()))?;
                if hour < 24 && minute < 60 {
                    return Ok(format!("0 {minute} {hour} * * *"));
                }
            }
            return Err(SchedulerError::InvalidSchedule(input.to_string()));
        }

        let words: Vec<&str> = rest.split_whitespace().collect();
        if words.len() == 2 {
            let n: u32 = words[0]
                .parse()
                .map_err(|_| SchedulerError::InvalidSchedule(input.to_string()))?;
            if n == 0 {
                return Err(SchedulerError::InvalidSchedule(
                    "interval must be > 0".to_string(),
                ));
            }
            let unit = words[1].trim_end_matches('s');
            return match unit {
                "minute" => Ok(format!("0 */{n} * * * *")),
                "hour" => Ok(format!("0 0 */{n} * * *")),
                _ => Err(SchedulerError::InvalidSchedule(input.to_string())),
            };
        }
    }

    Err(SchedulerError::InvalidSchedule(format!(
        "unrecognized schedule format: '{trimmed}'"
    )))
}

/// Truncate an instant to its minute (the dedup granularity).
fn minute_of(at: DateTime<Utc>) -> i64 {
    at.timestamp() / 60
}

// ---------------------------------------------------------------------------
// CronScheduler
// ---------------------------------------------------------------------------

/// Callback type invoked when a cron trigger fires. Receives the workflow
/// name and the fire instant.
pub type CronCallback = Arc<
    dyn Fn(String, DateTime<Utc>) -> futures_util::future::BoxFuture<'static, ()> + Send + Sync,
>;

/// Tracks a registered cron job for a workflow.
struct ScheduledWorkflow {
    /// The job UUID assigned by tokio-cron-scheduler.
    job_id: Uuid,
    /// The normalized cron expression.
    cron_expr: String,
    /// Minute of the last delivered fire, for at-most-once-per-minute dedup.
    last_fired_minute: Option<i64>,
    /// Timestamp of the last delivered fire.
    last_fired: Option<DateTime<Utc>>,
}

/// Cron scheduler that wraps `tokio-cron-scheduler::JobScheduler`.
///
/// A schedule fires at most once per minute per workflow: duplicate ticks
/// inside the same minute (restart races, coarse schedules overlapping) are
/// suppressed by the watermark before the callback runs.
pub struct CronScheduler {
    /// The underlying tokio-cron-scheduler instance.
    inner: Arc<RwLock<Option<JobScheduler>>>,
    /// Registered workflows: name -> job metadata.
    workflows: Arc<RwLock<HashMap<String, ScheduledWorkflow>>>,
}

impl CronScheduler {
    /// Create a new cron scheduler (not yet started).
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(None)),
            workflows: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Start the scheduler. Must be called before scheduling workflows.
    pub async fn start(&self) -> Result<(), SchedulerError> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| SchedulerError::JobError(e.to_string()))?;

        scheduler
            .start()
            .await
            .map_err(|e| SchedulerError::JobError(e.to_string()))?;

        let mut inner = self.inner.write().await;
        *inner = Some(scheduler);

        tracing::info!("cron scheduler started");
        Ok(())
    }

    /// Stop the scheduler and remove all jobs.
    pub async fn stop(&self) -> Result<(), SchedulerError> {
        let mut inner = self.inner.write().await;
        if let Some(mut scheduler) = inner.take() {
            scheduler
                .shutdown()
                .await
                .map_err(|e| SchedulerError::JobError(e.to_string()))?;
            tracing::info!("cron scheduler stopped");
        }
        let mut workflows = self.workflows.write().await;
        workflows.clear();
        Ok(())
    }

    /// Schedule a workflow by name.
    ///
    /// The `schedule` can be a standard cron expression or a human-readable
    /// string (see `normalize_schedule`). The `callback` is invoked on each
    /// non-duplicate fire.
    pub async fn schedule_workflow(
        &self,
        workflow_name: &str,
        schedule: &str,
        callback: CronCallback,
    ) -> Result<(), SchedulerError> {
        let cron_expr = normalize_schedule(schedule)?;

        let inner = self.inner.read().await;
        let scheduler = inner
            .as_ref()
            .ok_or_else(|| SchedulerError::JobError("scheduler not started".to_string()))?;

        let name = workflow_name.to_string();
        let workflows = self.workflows.clone();
        let job = Job::new_async(cron_expr.as_str(), move |_uuid, _lock| {
            let name = name.clone();
            let workflows = workflows.clone();
            let cb = callback.clone();
            Box::pin(async move {
                let now = Utc::now();
                {
                    let mut workflows = workflows.write().await;
                    let Some(entry) = workflows.get_mut(&name) else {
                        return;
                    };
                    if entry.last_fired_minute == Some(minute_of(now)) {
                        tracing::debug!(workflow = %name, %now, "duplicate fire suppressed");
                        return;
                    }
                    entry.last_fired_minute = Some(minute_of(now));
                    entry.last_fired = Some(now);
                }
                tracing::debug!(workflow = %name, %now, "cron trigger fired");
                cb(name, now).await;
            })
        })
        .map_err(|e| SchedulerError::InvalidSchedule(e.to_string()))?;

        let job_id = job.guid();
        scheduler
            .add(job)
            .await
            .map_err(|e| SchedulerError::JobError(e.to_string()))?;

        let mut workflows = self.workflows.write().await;
        workflows.insert(
            workflow_name.to_string(),
            ScheduledWorkflow {
                job_id,
                cron_expr,
                last_fired_minute: None,
                last_fired: None,
            },
        );

        tracing::info!(workflow = %workflow_name, %job_id, "workflow scheduled");
        Ok(())
    }

    /// Remove a workflow from the cron scheduler.
    pub async fn unschedule_workflow(&self, workflow_name: &str) -> Result<(), SchedulerError> {
        let mut workflows = self.workflows.write().await;
        let entry = workflows
            .remove(workflow_name)
            .ok_or_else(|| SchedulerError::WorkflowNotFound(workflow_name.to_string()))?;

        let inner = self.inner.read().await;
        if let Some(scheduler) = inner.as_ref() {
            scheduler
                .remove(&entry.job_id)
                .await
                .map_err(|e| SchedulerError::JobError(e.to_string()))?;
        }

        tracing::info!(workflow = %workflow_name, "workflow unscheduled");
        Ok(())
    }

    /// Last delivered fire instant for a workflow, if any.
    pub async fn last_fired(&self, workflow_name: &str) -> Option<DateTime<Utc>> {
        self.workflows
            .read()
            .await
            .get(workflow_name)
            .and_then(|e| e.last_fired)
    }

    /// Check for missed cron runs since each workflow's last known fire.
    ///
    /// Returns `(workflow_name, missed_timestamps)` for schedules that
    /// would have fired between their baseline and now. Used on restart to
    /// catch up workflows that should have run while the process was down.
    pub fn check_missed_runs(
        &self,
        schedules: &[(String, String, Option<DateTime<Utc>>)],
    ) -> Vec<(String, Vec<DateTime<Utc>>)> {
        let now = Utc::now();
        let mut missed = Vec::new();

        for (workflow_name, schedule, last_fired) in schedules {
            let cron_expr = match normalize_schedule(schedule) {
                Ok(expr) => expr,
                Err(_) => continue,
            };

            let cron = match cron_expr.parse::<croner::Cron>() {
                Ok(c) => c,
                Err(_) => continue,
            };

            let from = match last_fired {
                Some(t) => *t,
                None => continue, // No baseline, can't detect misses
            };

            let mut missed_times = Vec::new();
            for next in cron.iter_after(from) {
                if next >= now {
                    break;
                }
                missed_times.push(next);
            }

            if !missed_times.is_empty() {
                tracing::warn!(
                    workflow = %workflow_name,
                    count = missed_times.len(),
                    "detected missed cron runs"
                );
                missed.push((workflow_name.clone(), missed_times));
            }
        }

        missed
    }

    /// Number of registered workflows.
    pub async fn workflow_count(&self) -> usize {
        self.workflows.read().await.len()
    }
}

impl Default for CronScheduler {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! SQLite run repository implementation.
//!
//! Implements `RunRepository` from `trainloop-engine` using sqlx with split
//! read/write pools. Runs and step records track execution state for crash
//! recovery and step memoization.

use chrono::{DateTime, Utc};
use sqlx::Row;
use trainloop_engine::repository::RunRepository;
use trainloop_types::error::RepositoryError;
use trainloop_types::workflow::{FailureKind, Run, RunStatus, StepRecord, StepStatus};
use uuid::Uuid;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `RunRepository`.
pub struct SqliteRunRepository {
    pool: DatabasePool,
}

impl SqliteRunRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Internal row types
// ---------------------------------------------------------------------------

struct RunRow {
    id: String,
    workflow_id: String,
    workflow_name: String,
    status: String,
    event_name: String,
    entity_id: String,
    payload: String,
    attempt: i64,
    error: Option<String>,
    failure: Option<String>,
    wake_at: Option<String>,
    created_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
}

impl RunRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            workflow_id: row.try_get("workflow_id")?,
            workflow_name: row.try_get("workflow_name")?,
            status: row.try_get("status")?,
            event_name: row.try_get("event_name")?,
            entity_id: row.try_get("entity_id")?,
            payload: row.try_get("payload")?,
            attempt: row.try_get("attempt")?,
            error: row.try_get("error")?,
            failure: row.try_get("failure")?,
            wake_at: row.try_get("wake_at")?,
            created_at: row.try_get("created_at")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }

    fn into_run(self) -> Result<Run, RepositoryError> {
        let payload: serde_json::Value = serde_json::from_str(&self.payload)
            .map_err(|e| RepositoryError::Query(format!("invalid run payload: {e}")))?;

        Ok(Run {
            id: parse_uuid(&self.id)?,
            workflow_id: parse_uuid(&self.workflow_id)?,
            workflow_name: self.workflow_name,
            status: parse_run_status(&self.status)?,
            event_name: self.event_name,
            entity_id: self.entity_id,
            payload,
            attempt: self.attempt as u32,
            error: self.error,
            failure: self.failure.as_deref().map(parse_failure).transpose()?,
            wake_at: self.wake_at.as_deref().map(parse_datetime).transpose()?,
            created_at: parse_datetime(&self.created_at)?,
            started_at: self.started_at.as_deref().map(parse_datetime).transpose()?,
            completed_at: self
                .completed_at
                .as_deref()
                .map(parse_datetime)
                .transpose()?,
        })
    }
}

struct StepRow {
    run_id: String,
    step_name: String,
    status: String,
    output: Option<String>,
    error: Option<String>,
    attempt: i64,
    wake_at: Option<String>,
    recorded_at: String,
}

impl StepRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            run_id: row.try_get("run_id")?,
            step_name: row.try_get("step_name")?,
            status: row.try_get("status")?,
            output: row.try_get("output")?,
            error: row.try_get("error")?,
            attempt: row.try_get("attempt")?,
            wake_at: row.try_get("wake_at")?,
            recorded_at: row.try_get("recorded_at")?,
        })
    }

    fn into_record(self) -> Result<StepRecord, RepositoryError> {
        let output = self
            .output
            .as_deref()
            .map(|s| {
                serde_json::from_str(s)
                    .map_err(|e| RepositoryError::Query(format!("invalid step output: {e}")))
            })
            .transpose()?;

        Ok(StepRecord {
            run_id: parse_uuid(&self.run_id)?,
            step_name: self.step_name,
            status: parse_step_status(&self.status)?,
            output,
            error: self.error,
            attempt: self.attempt as u32,
            wake_at: self.wake_at.as_deref().map(parse_datetime).transpose()?,
            recorded_at: parse_datetime(&self.recorded_at)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_uuid(s: &str) -> Result<Uuid, RepositoryError> {
    s.parse::<Uuid>()
        .map_err(|e| RepositoryError::Query(format!("invalid UUID: {e}")))
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn parse_run_status(s: &str) -> Result<RunStatus, RepositoryError> {
    match s {
        "queued" => Ok(RunStatus::Queued),
        "running" => Ok(RunStatus::Running),
        "sleeping" => Ok(RunStatus::Sleeping),
        "completed" => Ok(RunStatus::Completed),
        "failed" => Ok(RunStatus::Failed),
        other => Err(RepositoryError::Query(format!("invalid run status: {other}"))),
    }
}

fn parse_step_status(s: &str) -> Result<StepStatus, RepositoryError> {
    match s {
        "completed" => Ok(StepStatus::Completed),
        "failed" => Ok(StepStatus::Failed),
        "waiting" => Ok(StepStatus::Waiting),
        other => Err(RepositoryError::Query(format!("invalid step status: {other}"))),
    }
}

fn parse_failure(s: &str) -> Result<FailureKind, RepositoryError> {
    match s {
        "fatal" => Ok(FailureKind::Fatal),
        "exhausted" => Ok(FailureKind::Exhausted),
        other => Err(RepositoryError::Query(format!("invalid failure kind: {other}"))),
    }
}

// ---------------------------------------------------------------------------
// RunRepository impl
// ---------------------------------------------------------------------------

impl RunRepository for SqliteRunRepository {
    async fn create_run(&self, run: &Run) -> Result<(), RepositoryError> {
        let payload = serde_json::to_string(&run.payload)
            .map_err(|e| RepositoryError::Query(format!("serialize payload: {e}")))?;

        sqlx::query(
            r#"INSERT INTO runs
               (id, workflow_id, workflow_name, status, event_name, entity_id,
                payload, attempt, error, failure, wake_at, created_at, started_at, completed_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(run.id.to_string())
        .bind(run.workflow_id.to_string())
        .bind(&run.workflow_name)
        .bind(run.status.as_str())
        .bind(&run.event_name)
        .bind(&run.entity_id)
        .bind(&payload)
        .bind(run.attempt as i64)
        .bind(&run.error)
        .bind(run.failure.map(|f| f.as_str()))
        .bind(run.wake_at.as_ref().map(format_datetime))
        .bind(format_datetime(&run.created_at))
        .bind(run.started_at.as_ref().map(format_datetime))
        .bind(run.completed_at.as_ref().map(format_datetime))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

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
        let now = format_datetime(&Utc::now());
        let started_at = if status == RunStatus::Running {
            Some(now.clone())
        } else {
            None
        };
        let completed_at = if status.is_terminal() {
            Some(now)
        } else {
            None
        };

        let result = sqlx::query(
            r#"UPDATE runs SET
                 status = ?,
                 error = ?,
                 failure = ?,
                 wake_at = ?,
                 started_at = COALESCE(started_at, ?),
                 completed_at = COALESCE(?, completed_at)
               WHERE id = ?"#,
        )
        .bind(status.as_str())
        .bind(error)
        .bind(failure.map(|f| f.as_str()))
        .bind(wake_at.as_ref().map(format_datetime))
        .bind(&started_at)
        .bind(&completed_at)
        .bind(run_id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }

        Ok(())
    }

    async fn update_run_attempt(&self, run_id: &Uuid, attempt: u32) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE runs SET attempt = ? WHERE id = ?")
            .bind(attempt as i64)
            .bind(run_id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }

        Ok(())
    }

    async fn get_run(&self, run_id: &Uuid) -> Result<Option<Run>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM runs WHERE id = ?")
            .bind(run_id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let r = RunRow::from_row(&row).map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(r.into_run()?))
            }
            None => Ok(None),
        }
    }

    async fn list_runs(&self, workflow_name: &str, limit: u32) -> Result<Vec<Run>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM runs WHERE workflow_name = ? ORDER BY created_at DESC LIMIT ?",
        )
        .bind(workflow_name)
        .bind(limit as i64)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut runs = Vec::with_capacity(rows.len());
        for row in &rows {
            let r = RunRow::from_row(row).map_err(|e| RepositoryError::Query(e.to_string()))?;
            runs.push(r.into_run()?);
        }
        Ok(runs)
    }

    async fn list_interrupted_runs(&self) -> Result<Vec<Run>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM runs WHERE status IN ('queued', 'running', 'sleeping') ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut runs = Vec::with_capacity(rows.len());
        for row in &rows {
            let r = RunRow::from_row(row).map_err(|e| RepositoryError::Query(e.to_string()))?;
            runs.push(r.into_run()?);
        }
        Ok(runs)
    }

    async fn put_step(&self, record: &StepRecord) -> Result<bool, RepositoryError> {
        let output = record
            .output
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| RepositoryError::Query(format!("serialize step output: {e}")))?;

        // A completed record is final: the conflict update is guarded so it
        // never overwrites one.
        let result = sqlx::query(
            r#"INSERT INTO step_records
               (run_id, step_name, status, output, error, attempt, wake_at, recorded_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(run_id, step_name) DO UPDATE SET
                 status = excluded.status,
                 output = excluded.output,
                 error = excluded.error,
                 attempt = excluded.attempt,
                 wake_at = excluded.wake_at,
                 recorded_at = excluded.recorded_at
               WHERE step_records.status != 'completed'"#,
        )
        .bind(record.run_id.to_string())
        .bind(&record.step_name)
        .bind(record.status.as_str())
        .bind(&output)
        .bind(&record.error)
        .bind(record.attempt as i64)
        .bind(record.wake_at.as_ref().map(format_datetime))
        .bind(format_datetime(&record.recorded_at))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_step(
        &self,
        run_id: &Uuid,
        step_name: &str,
    ) -> Result<Option<StepRecord>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM step_records WHERE run_id = ? AND step_name = ?")
            .bind(run_id.to_string())
            .bind(step_name)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let r = StepRow::from_row(&row).map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(r.into_record()?))
            }
            None => Ok(None),
        }
    }

    async fn list_steps(&self, run_id: &Uuid) -> Result<Vec<StepRecord>, RepositoryError> {
        // rowid preserves insertion order; conflict updates keep the
        // original rowid.
        let rows = sqlx::query("SELECT * FROM step_records WHERE run_id = ? ORDER BY rowid ASC")
            .bind(run_id.to_string())
            .fetch_all(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            let r = StepRow::from_row(row).map_err(|e| RepositoryError::Query(e.to_string()))?;
            records.push(r.into_record()?);
        }
        Ok(records)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::db::Database;

pub mod assemble;
pub mod clips;
pub mod composites;
pub mod planning;
pub mod processor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    PlanVideo,
    GenerateComposites,
    GenerateClips,
    AssembleVideo,
}

impl TaskKind {
    pub const ALL: [TaskKind; 4] = [
        TaskKind::PlanVideo,
        TaskKind::GenerateComposites,
        TaskKind::GenerateClips,
        TaskKind::AssembleVideo,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::PlanVideo => "plan_video",
            TaskKind::GenerateComposites => "generate_composites",
            TaskKind::GenerateClips => "generate_clips",
            TaskKind::AssembleVideo => "assemble_video",
        }
    }

    /// Retry and timeout settings per task kind. Clip generation is the
    /// slowest external call, so it gets the longest timeout and backoff.
    pub fn retry_policy(self) -> RetryPolicy {
        match self {
            TaskKind::PlanVideo => RetryPolicy {
                max_attempts: 3,
                backoff_factor: 2.0,
                min_timeout: Duration::from_secs(5),
                max_timeout: Duration::from_secs(60),
                execution_timeout: Duration::from_secs(5 * 60),
            },
            TaskKind::GenerateComposites => RetryPolicy {
                max_attempts: 3,
                backoff_factor: 2.0,
                min_timeout: Duration::from_secs(10),
                max_timeout: Duration::from_secs(120),
                execution_timeout: Duration::from_secs(10 * 60),
            },
            TaskKind::GenerateClips => RetryPolicy {
                max_attempts: 3,
                backoff_factor: 2.0,
                min_timeout: Duration::from_secs(30),
                max_timeout: Duration::from_secs(300),
                execution_timeout: Duration::from_secs(30 * 60),
            },
            TaskKind::AssembleVideo => RetryPolicy {
                max_attempts: 2,
                backoff_factor: 2.0,
                min_timeout: Duration::from_secs(10),
                max_timeout: Duration::from_secs(60),
                execution_timeout: Duration::from_secs(15 * 60),
            },
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("unknown task kind {:?}", s))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_factor: f64,
    pub min_timeout: Duration,
    pub max_timeout: Duration,
    /// Wall-clock limit for one attempt; exceeding it counts as a failure.
    pub execution_timeout: Duration,
}

impl RetryPolicy {
    /// Delay before the next attempt after `attempt` (1-based) failed:
    /// `min(max_timeout, min_timeout * factor^(attempt - 1))`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let secs = self.min_timeout.as_secs_f64() * self.backoff_factor.powi(exponent);
        if !secs.is_finite() || secs >= self.max_timeout.as_secs_f64() {
            self.max_timeout
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl FromStr for TaskStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(anyhow::anyhow!("unknown task status {:?}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub kind: TaskKind,
    pub payload: Value,
    pub status: TaskStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub run_after: DateTime<Utc>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn payload_id(&self, field: &str) -> Result<i64> {
        self.payload
            .get(field)
            .and_then(|v| v.as_i64())
            .ok_or_else(|| anyhow::anyhow!("task {} ({}) payload is missing {}", self.id, self.kind, field))
    }
}

/// Returned by `trigger`; the id is what callers persist onto their rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskHandle {
    pub id: String,
}

/// What happened to a task after a failed attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Retrying { attempt: u32, run_after: DateTime<Utc> },
    Exhausted { attempts: u32 },
}

/// Enqueues background work.
pub trait TaskTrigger: Send + Sync {
    fn trigger(&self, kind: TaskKind, payload: Value) -> Result<TaskHandle>;
}

fn text_column<T>(row: &Row, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = anyhow::Error>,
{
    let raw: String = row.get(idx)?;
    raw.parse::<T>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, e.into())
    })
}

fn time_column(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e)))
}

fn task_from_row(row: &Row) -> rusqlite::Result<Task> {
    let payload_str: String = row.get(2)?;
    let payload = serde_json::from_str(&payload_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(Task {
        id: row.get(0)?,
        kind: text_column(row, 1)?,
        payload,
        status: text_column(row, 3)?,
        attempts: row.get(4)?,
        max_attempts: row.get(5)?,
        run_after: time_column(row, 6)?,
        last_error: row.get(7)?,
        created_at: time_column(row, 8)?,
        updated_at: time_column(row, 9)?,
    })
}

/// Fixed-width UTC timestamps so `run_after` orders correctly as text.
fn timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

const TASK_COLUMNS: &str =
    "id, kind, payload_json, status, attempts, max_attempts, run_after, last_error, created_at, updated_at";

/// SQLite-backed task queue. Tasks survive restarts; a task left `running`
/// by a crash is handed back to the queue by `recover_interrupted`.
pub struct TaskManager {
    db: Arc<Database>,
}

impl TaskManager {
    pub fn new(db: Arc<Database>) -> Self {
        TaskManager { db }
    }

    pub fn get_task(&self, id: &str) -> Result<Option<Task>> {
        let conn = self.db.conn()?;
        let task = conn
            .query_row(
                &format!("SELECT {} FROM tasks WHERE id = ?1", TASK_COLUMNS),
                params![id],
                task_from_row,
            )
            .optional()?;
        Ok(task)
    }

    /// Tasks of `kind` still waiting or running whose payload names
    /// `field = id`.
    pub fn has_open_task(&self, kind: TaskKind, field: &str, id: i64) -> Result<bool> {
        let conn = self.db.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM tasks
             WHERE kind = ?1 AND status IN ('pending', 'running')
               AND json_extract(payload_json, '$.' || ?2) = ?3",
            params![kind.as_str(), field, id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Claims the oldest due task, bumping its attempt counter.
    pub fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<Task>> {
        let conn = self.db.conn()?;
        let id: Option<String> = conn
            .query_row(
                "SELECT id FROM tasks WHERE status = 'pending' AND run_after <= ?1
                 ORDER BY run_after ASC, created_at ASC LIMIT 1",
                params![timestamp(now)],
                |row| row.get(0),
            )
            .optional()?;
        let Some(id) = id else {
            return Ok(None);
        };

        let changed = conn.execute(
            "UPDATE tasks SET status = 'running', attempts = attempts + 1, updated_at = ?1
             WHERE id = ?2 AND status = 'pending'",
            params![timestamp(now), id],
        )?;
        if changed == 0 {
            return Ok(None);
        }

        let task = conn.query_row(
            &format!("SELECT {} FROM tasks WHERE id = ?1", TASK_COLUMNS),
            params![id],
            task_from_row,
        )?;
        Ok(Some(task))
    }

    pub fn complete(&self, id: &str) -> Result<()> {
        let conn = self.db.conn()?;
        conn.execute(
            "UPDATE tasks SET status = 'completed', last_error = NULL, updated_at = ?1 WHERE id = ?2",
            params![timestamp(Utc::now()), id],
        )?;
        Ok(())
    }

    /// Records a failed attempt and either reschedules the task with backoff
    /// or, once the attempt budget is spent, fails it for good.
    pub fn fail(&self, task: &Task, error: &str, now: DateTime<Utc>) -> Result<TaskOutcome> {
        let policy = task.kind.retry_policy();
        let conn = self.db.conn()?;

        if task.attempts >= task.max_attempts {
            conn.execute(
                "UPDATE tasks SET status = 'failed', last_error = ?1, updated_at = ?2 WHERE id = ?3",
                params![error, timestamp(now), task.id],
            )?;
            return Ok(TaskOutcome::Exhausted {
                attempts: task.attempts,
            });
        }

        let delay = chrono::Duration::from_std(policy.backoff_delay(task.attempts))?;
        let run_after = now + delay;
        conn.execute(
            "UPDATE tasks SET status = 'pending', last_error = ?1, run_after = ?2, updated_at = ?3 WHERE id = ?4",
            params![error, timestamp(run_after), timestamp(now), task.id],
        )?;
        Ok(TaskOutcome::Retrying {
            attempt: task.attempts,
            run_after,
        })
    }

    /// Puts tasks that were `running` when the process died back in the queue.
    pub fn recover_interrupted(&self) -> Result<usize> {
        let now = timestamp(Utc::now());
        let conn = self.db.conn()?;
        let n = conn.execute(
            "UPDATE tasks SET status = 'pending', run_after = ?1, updated_at = ?1 WHERE status = 'running'",
            params![now],
        )?;
        Ok(n)
    }
}

impl TaskTrigger for TaskManager {
    fn trigger(&self, kind: TaskKind, payload: Value) -> Result<TaskHandle> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = timestamp(Utc::now());
        let conn = self.db.conn()?;
        conn.execute(
            "INSERT INTO tasks (id, kind, payload_json, status, attempts, max_attempts, run_after, created_at, updated_at)
             VALUES (?1, ?2, ?3, 'pending', 0, ?4, ?5, ?5, ?5)",
            params![
                id,
                kind.as_str(),
                serde_json::to_string(&payload)?,
                kind.retry_policy().max_attempts,
                now
            ],
        )?;
        Ok(TaskHandle { id })
    }
}

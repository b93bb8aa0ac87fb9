use chrono::{DateTime, Utc};
use executors::{command::CommandKind, process::ProcessExit};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool, Type};
use strum_macros::Display;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, Display)]
#[sqlx(type_name = "job_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum JobStatus {
    Running,
    Success,
    Failed,
}

impl JobStatus {
    pub fn from_exit(exit: ProcessExit) -> Self {
        if exit.success() {
            JobStatus::Success
        } else {
            JobStatus::Failed
        }
    }
}

/// One execution attempt of a registered command.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: Uuid,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub kind: CommandKind,
    /// Rendered command line that was executed
    pub command: String,
    pub status: JobStatus,
    pub exit_code: Option<i64>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    /// A fresh job in the `running` state, started now.
    pub fn new_running(kind: CommandKind, command: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            command: command.into(),
            status: JobStatus::Running,
            exit_code: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub async fn create(pool: &SqlitePool, job: &Job) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"INSERT INTO jobs (id, type, command, status, exit_code, started_at, finished_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(job.id)
        .bind(job.kind)
        .bind(&job.command)
        .bind(job.status)
        .bind(job.exit_code)
        .bind(job.started_at)
        .bind(job.finished_at)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Job>(
            r#"SELECT id, type, command, status, exit_code, started_at, finished_at
               FROM jobs WHERE id = ?"#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    /// Most recently started jobs first.
    pub async fn list_recent(pool: &SqlitePool, limit: i64) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Job>(
            r#"SELECT id, type, command, status, exit_code, started_at, finished_at
               FROM jobs
               ORDER BY started_at DESC, rowid DESC
               LIMIT ?"#,
        )
        .bind(limit)
        .fetch_all(pool)
        .await
    }

    /// Move a running job to a terminal status.
    ///
    /// Returns `false` when the row was missing or already terminal; a
    /// terminal row is never rewritten.
    pub async fn update_status(
        pool: &SqlitePool,
        id: Uuid,
        status: JobStatus,
        exit_code: Option<i64>,
        finished_at: DateTime<Utc>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"UPDATE jobs
               SET status = ?, exit_code = ?, finished_at = ?
               WHERE id = ? AND status = 'running'"#,
        )
        .bind(status)
        .bind(exit_code)
        .bind(finished_at)
        .bind(id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Fail every job still marked running. Used at startup, when no process
    /// from a previous server run can finalize them anymore.
    pub async fn fail_running(
        pool: &SqlitePool,
        finished_at: DateTime<Utc>,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"UPDATE jobs
               SET status = 'failed', finished_at = ?
               WHERE status = 'running'"#,
        )
        .bind(finished_at)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }
}

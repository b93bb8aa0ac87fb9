use async_trait::async_trait;
use chrono::{DateTime, Utc};
use db::{
    DBService,
    models::{
        job::{Job, JobStatus},
        job_log::LogRecord,
    },
};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Durable storage for jobs and their log records.
///
/// Every operation is atomic per record. Callers log failures and carry on;
/// nothing here aborts a running job.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert_job(&self, job: &Job) -> Result<(), PersistenceError>;

    /// Returns `false` when the job was not in the running state.
    async fn update_job_status(
        &self,
        id: Uuid,
        status: JobStatus,
        exit_code: Option<i64>,
        finished_at: DateTime<Utc>,
    ) -> Result<bool, PersistenceError>;

    async fn append_log(&self, record: &LogRecord) -> Result<(), PersistenceError>;

    /// At most `limit` jobs, newest `started_at` first.
    async fn list_recent_jobs(&self, limit: i64) -> Result<Vec<Job>, PersistenceError>;

    async fn find_job(&self, id: Uuid) -> Result<Option<Job>, PersistenceError>;

    async fn job_logs(&self, id: Uuid) -> Result<Vec<LogRecord>, PersistenceError>;

    /// Mark every job still recorded as running as failed.
    async fn fail_running_jobs(&self, finished_at: DateTime<Utc>)
    -> Result<u64, PersistenceError>;
}

#[derive(Clone)]
pub struct SqliteJobStore {
    db: DBService,
}

impl SqliteJobStore {
    pub fn new(db: DBService) -> Self {
        Self { db }
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn insert_job(&self, job: &Job) -> Result<(), PersistenceError> {
        Job::create(&self.db.pool, job).await?;
        Ok(())
    }

    async fn update_job_status(
        &self,
        id: Uuid,
        status: JobStatus,
        exit_code: Option<i64>,
        finished_at: DateTime<Utc>,
    ) -> Result<bool, PersistenceError> {
        Ok(Job::update_status(&self.db.pool, id, status, exit_code, finished_at).await?)
    }

    async fn append_log(&self, record: &LogRecord) -> Result<(), PersistenceError> {
        LogRecord::append(&self.db.pool, record).await?;
        Ok(())
    }

    async fn list_recent_jobs(&self, limit: i64) -> Result<Vec<Job>, PersistenceError> {
        Ok(Job::list_recent(&self.db.pool, limit).await?)
    }

    async fn find_job(&self, id: Uuid) -> Result<Option<Job>, PersistenceError> {
        Ok(Job::find_by_id(&self.db.pool, id).await?)
    }

    async fn job_logs(&self, id: Uuid) -> Result<Vec<LogRecord>, PersistenceError> {
        Ok(LogRecord::find_by_job_id(&self.db.pool, id).await?)
    }

    async fn fail_running_jobs(
        &self,
        finished_at: DateTime<Utc>,
    ) -> Result<u64, PersistenceError> {
        Ok(Job::fail_running(&self.db.pool, finished_at).await?)
    }
}

#[cfg(test)]
mod tests {
    use executors::command::CommandKind;
    use sqlx::SqlitePool;
    use utils::log_msg::LogStream;

    use super::*;

    #[sqlx::test(migrations = "../db/migrations")]
    async fn round_trips_jobs_and_logs(pool: SqlitePool) {
        let store = SqliteJobStore::new(DBService::from_pool(pool));
        let job = Job::new_running(CommandKind::Local, "echo hi");
        store.insert_job(&job).await.unwrap();
        store
            .append_log(&LogRecord {
                job_id: job.id,
                timestamp: Utc::now(),
                stream: LogStream::Stdout,
                data: "hi\n".into(),
            })
            .await
            .unwrap();

        assert!(
            store
                .update_job_status(job.id, JobStatus::Success, Some(0), Utc::now())
                .await
                .unwrap()
        );

        let found = store.find_job(job.id).await.unwrap().unwrap();
        assert_eq!(found.status, JobStatus::Success);
        assert_eq!(store.job_logs(job.id).await.unwrap().len(), 1);
        assert_eq!(store.list_recent_jobs(10).await.unwrap().len(), 1);
    }
}

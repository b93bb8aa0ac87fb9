use std::sync::Arc;

use db::models::{job::Job, job_log::LogRecord};
use uuid::Uuid;

use super::store::{JobStore, PersistenceError};

pub const DEFAULT_RECENT_JOBS_LIMIT: i64 = 10;
pub const MAX_RECENT_JOBS_LIMIT: i64 = 100;

/// Read-only view over past and current jobs.
#[derive(Clone)]
pub struct JobHistory {
    store: Arc<dyn JobStore>,
}

impl JobHistory {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    /// Most recently started jobs first. A missing or non-positive limit
    /// means the default; larger ones are capped at `MAX_RECENT_JOBS_LIMIT`.
    pub async fn list_recent(&self, limit: Option<i64>) -> Result<Vec<Job>, PersistenceError> {
        let limit = match limit {
            Some(n) if n > 0 => n.min(MAX_RECENT_JOBS_LIMIT),
            _ => DEFAULT_RECENT_JOBS_LIMIT,
        };
        self.store.list_recent_jobs(limit).await
    }

    pub async fn find(&self, id: Uuid) -> Result<Option<Job>, PersistenceError> {
        self.store.find_job(id).await
    }

    pub async fn logs(&self, id: Uuid) -> Result<Vec<LogRecord>, PersistenceError> {
        self.store.job_logs(id).await
    }
}

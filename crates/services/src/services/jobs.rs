//! Job lifecycle: resolve a command, record the job, run it, finalize once.

use std::{collections::HashMap, sync::Arc, time::Duration};

use backon::{ExponentialBuilder, Retryable};
use chrono::Utc;
use db::models::job::{Job, JobStatus};
use executors::{
    command::CommandKind,
    process::{ProcessExecutor, ProcessExit, SpawnError},
    registry::{CommandRegistry, RegistryError},
};
use thiserror::Error;
use tokio::{sync::RwLock, task::JoinHandle};
use uuid::Uuid;

use super::{
    events::{EventSink, JobEvent},
    multiplexer::{DEFAULT_PERSIST_QUEUE, StreamMultiplexer},
    store::{JobStore, PersistenceError},
};

#[derive(Debug, Error)]
pub enum ExecuteError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("job {job_id} failed to start: {source}")]
    Spawn {
        job_id: Uuid,
        #[source]
        source: SpawnError,
    },
}

/// A job whose process is running. `completion` resolves with the final
/// status once output is drained and the job is finalized.
#[derive(Debug)]
pub struct StartedJob {
    pub job: Job,
    pub completion: JoinHandle<JobStatus>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FinalizeOutcome {
    /// The job moved to a terminal state. `recorded` is false when the store
    /// could not be updated even after retrying.
    Finalized { job: Job, recorded: bool },
    /// The job was not running; nothing changed.
    NotRunning,
}

#[derive(Debug, Clone, Copy)]
pub struct FinalizeRetry {
    pub retries: usize,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Default for FinalizeRetry {
    fn default() -> Self {
        Self {
            retries: 3,
            min_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(1),
        }
    }
}

#[derive(Clone)]
pub struct JobService {
    registry: Arc<CommandRegistry>,
    executor: Arc<dyn ProcessExecutor>,
    store: Arc<dyn JobStore>,
    running: Arc<RwLock<HashMap<Uuid, Job>>>,
    finalize_retry: FinalizeRetry,
    persist_queue: usize,
}

impl JobService {
    pub fn new(
        registry: Arc<CommandRegistry>,
        executor: Arc<dyn ProcessExecutor>,
        store: Arc<dyn JobStore>,
    ) -> Self {
        Self {
            registry,
            executor,
            store,
            running: Arc::new(RwLock::new(HashMap::new())),
            finalize_retry: FinalizeRetry::default(),
            persist_queue: DEFAULT_PERSIST_QUEUE,
        }
    }

    pub fn with_finalize_retry(mut self, retry: FinalizeRetry) -> Self {
        self.finalize_retry = retry;
        self
    }

    pub fn with_persist_queue(mut self, capacity: usize) -> Self {
        self.persist_queue = capacity;
        self
    }

    /// Run the command registered under `key`, reporting progress to `sink`.
    ///
    /// Unknown keys emit an `error` event and create no job. A spawn failure
    /// emits `job-started`, `error` and `job-finished` (failed), in that
    /// order, and returns [`ExecuteError::Spawn`].
    #[tracing::instrument(skip(self, sink))]
    pub async fn execute(
        &self,
        key: &str,
        sink: Arc<dyn EventSink>,
    ) -> Result<StartedJob, ExecuteError> {
        let spec = match self.registry.resolve(key) {
            Ok(spec) => spec.clone(),
            Err(error) => {
                tracing::warn!(%error, "rejected execute request");
                sink.emit(JobEvent::error(error.to_string()));
                return Err(error.into());
            }
        };

        let job = self.create_job(spec.kind, spec.command_line()).await;
        sink.emit(JobEvent::JobStarted {
            job_id: job.id,
            command: job.command.clone(),
        });

        let handle = match self.executor.start(&spec).await {
            Ok(handle) => handle,
            Err(error) => {
                tracing::error!(job_id = %job.id, %error, "failed to start process");
                sink.emit(JobEvent::error(format!("Failed to start '{key}': {error}")));
                if let FinalizeOutcome::Finalized { job, .. } =
                    self.finalize_job(job.id, None).await
                {
                    sink.emit(finished_event(&job));
                }
                return Err(ExecuteError::Spawn {
                    job_id: job.id,
                    source: error,
                });
            }
        };

        let service = self.clone();
        let job_id = job.id;
        let completion = tokio::spawn(async move {
            let report = StreamMultiplexer::new(service.store.clone())
                .with_queue_capacity(service.persist_queue)
                .run(job_id, handle, sink.clone())
                .await;
            match service.finalize_job(job_id, Some(report.exit)).await {
                FinalizeOutcome::Finalized { job, .. } => {
                    sink.emit(finished_event(&job));
                    job.status
                }
                FinalizeOutcome::NotRunning => JobStatus::from_exit(report.exit),
            }
        });

        Ok(StartedJob { job, completion })
    }

    /// Register a new running job in memory and in the store.
    ///
    /// A store failure is logged; the job still runs.
    #[tracing::instrument(skip(self))]
    pub async fn create_job(&self, kind: CommandKind, command: String) -> Job {
        let job = Job::new_running(kind, command);
        self.running.write().await.insert(job.id, job.clone());

        if let Err(error) = self.store.insert_job(&job).await {
            tracing::error!(job_id = %job.id, ?error, "failed to persist new job");
        }
        tracing::info!(job_id = %job.id, command = %job.command, "job started");
        job
    }

    /// Move a running job to its terminal status.
    ///
    /// `exit` is `None` when the process never started. Only the first call
    /// for a job has any effect; later calls return
    /// [`FinalizeOutcome::NotRunning`].
    #[tracing::instrument(skip(self))]
    pub async fn finalize_job(&self, id: Uuid, exit: Option<ProcessExit>) -> FinalizeOutcome {
        let Some(mut job) = self.running.write().await.remove(&id) else {
            tracing::warn!(job_id = %id, "finalize requested for a job that is not running");
            return FinalizeOutcome::NotRunning;
        };

        job.status = exit.map_or(JobStatus::Failed, JobStatus::from_exit);
        job.exit_code = exit.and_then(|e| e.code()).map(i64::from);
        job.finished_at = Some(Utc::now());

        let recorded = self.record_finalized(&job).await;
        tracing::info!(
            job_id = %id,
            status = %job.status,
            exit_code = ?job.exit_code,
            "job finished"
        );
        FinalizeOutcome::Finalized { job, recorded }
    }

    async fn record_finalized(&self, job: &Job) -> bool {
        let store = &self.store;
        let finished_at = job.finished_at.unwrap_or_else(Utc::now);
        let (id, status, exit_code) = (job.id, job.status, job.exit_code);
        let retry = self.finalize_retry;

        let result = (|| async move {
            store
                .update_job_status(id, status, exit_code, finished_at)
                .await
        })
        .retry(
            ExponentialBuilder::default()
                .with_min_delay(retry.min_delay)
                .with_max_delay(retry.max_delay)
                .with_max_times(retry.retries),
        )
        .notify(|err: &PersistenceError, dur: Duration| {
            tracing::warn!(
                job_id = %job.id,
                "recording job status failed, retrying after {:.2}s: {}",
                dur.as_secs_f64(),
                err
            );
        })
        .await;

        match result {
            Ok(true) => true,
            Ok(false) => {
                tracing::warn!(
                    job_id = %job.id,
                    "stored job was not running, status left unchanged"
                );
                false
            }
            Err(error) => {
                tracing::error!(job_id = %job.id, ?error, "giving up on recording job status");
                false
            }
        }
    }

    /// Fail jobs left running by a previous server process.
    ///
    /// Call once at startup, before accepting requests.
    #[tracing::instrument(skip(self))]
    pub async fn reconcile_orphaned_jobs(&self) -> Result<u64, PersistenceError> {
        let failed = self.store.fail_running_jobs(Utc::now()).await?;
        if failed > 0 {
            tracing::warn!(failed, "marked jobs from a previous run as failed");
        }
        Ok(failed)
    }

    pub async fn is_running(&self, id: Uuid) -> bool {
        self.running.read().await.contains_key(&id)
    }
}

fn finished_event(job: &Job) -> JobEvent {
    JobEvent::JobFinished {
        job_id: job.id,
        status: job.status,
        exit_code: job.exit_code,
    }
}

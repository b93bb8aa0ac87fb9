//! Fans a process's output out to persistence and to the client.
//!
//! Each stream is read by its own task. A chunk becomes one [`LogRecord`],
//! which is queued for the job's writer before the matching `job-log` event is
//! emitted. The writer drains the queue in order, so records of one stream are
//! stored in the order they were read. A full queue makes the reader wait,
//! which in turn leaves data in the pipe and slows the process down instead of
//! losing output. Live events for that stream are held back with it, since a
//! fragment is never shown before it is queued. Emitting to the sink never
//! waits, so a slow client cannot hold up persistence.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use db::models::job_log::LogRecord;
use executors::process::{OutputStream, ProcessExit, ProcessHandle};
use futures::StreamExt;
use tokio::{sync::mpsc, task::JoinHandle};
use utils::{log_msg::LogStream, text::Utf8ChunkDecoder};
use uuid::Uuid;

use super::{
    events::{EventSink, JobEvent},
    store::JobStore,
};

pub const DEFAULT_PERSIST_QUEUE: usize = 1024;

/// What happened while a job's output was being relayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MultiplexReport {
    pub exit: ProcessExit,
    pub stdout_records: usize,
    pub stderr_records: usize,
    pub persisted: usize,
    pub persist_failures: usize,
}

pub struct StreamMultiplexer {
    store: Arc<dyn JobStore>,
    queue_capacity: usize,
}

impl StreamMultiplexer {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self {
            store,
            queue_capacity: DEFAULT_PERSIST_QUEUE,
        }
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Relay both streams of `handle` until the process has exited, both
    /// streams are exhausted, and every queued record was handed to the store.
    pub async fn run(
        &self,
        job_id: Uuid,
        handle: ProcessHandle,
        sink: Arc<dyn EventSink>,
    ) -> MultiplexReport {
        let ProcessHandle {
            stdout,
            stderr,
            completion,
        } = handle;

        let (queue, pending) = mpsc::channel(self.queue_capacity);
        let writer = tokio::spawn(write_records(self.store.clone(), pending));

        let stdout = tokio::spawn(
            StreamRelay::new(job_id, LogStream::Stdout, queue.clone(), sink.clone()).run(stdout),
        );
        let stderr =
            tokio::spawn(StreamRelay::new(job_id, LogStream::Stderr, queue, sink).run(stderr));

        let exit = completion.await;
        let stdout_records = join_relay(job_id, LogStream::Stdout, stdout).await;
        let stderr_records = join_relay(job_id, LogStream::Stderr, stderr).await;
        // Both relays dropped their queue senders, so the writer ends once drained.
        let (persisted, persist_failures) = match writer.await {
            Ok(counts) => counts,
            Err(error) => {
                tracing::error!(%job_id, ?error, "log writer task failed");
                (0, stdout_records + stderr_records)
            }
        };

        tracing::debug!(
            %job_id,
            ?exit,
            stdout_records,
            stderr_records,
            persist_failures,
            "output streams drained"
        );

        MultiplexReport {
            exit,
            stdout_records,
            stderr_records,
            persisted,
            persist_failures,
        }
    }
}

async fn join_relay(job_id: Uuid, stream: LogStream, relay: JoinHandle<usize>) -> usize {
    match relay.await {
        Ok(records) => records,
        Err(error) => {
            tracing::error!(%job_id, %stream, ?error, "output relay task failed");
            0
        }
    }
}

/// Persist records one at a time, in queue order.
async fn write_records(
    store: Arc<dyn JobStore>,
    mut pending: mpsc::Receiver<LogRecord>,
) -> (usize, usize) {
    let mut persisted = 0;
    let mut failures = 0;
    while let Some(record) = pending.recv().await {
        match store.append_log(&record).await {
            Ok(()) => persisted += 1,
            Err(error) => {
                failures += 1;
                tracing::error!(
                    job_id = %record.job_id,
                    stream = %record.stream,
                    ?error,
                    "failed to persist log record"
                );
            }
        }
    }
    (persisted, failures)
}

struct StreamRelay {
    job_id: Uuid,
    stream: LogStream,
    queue: mpsc::Sender<LogRecord>,
    sink: Arc<dyn EventSink>,
    decoder: Utf8ChunkDecoder,
    last_timestamp: Option<DateTime<Utc>>,
    records: usize,
}

impl StreamRelay {
    fn new(
        job_id: Uuid,
        stream: LogStream,
        queue: mpsc::Sender<LogRecord>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            job_id,
            stream,
            queue,
            sink,
            decoder: Utf8ChunkDecoder::new(),
            last_timestamp: None,
            records: 0,
        }
    }

    async fn run(mut self, mut output: OutputStream) -> usize {
        while let Some(chunk) = output.next().await {
            match chunk {
                Ok(bytes) => {
                    let text = self.decoder.decode(&bytes);
                    self.relay(text).await;
                }
                Err(error) => {
                    // A broken pipe ends this stream only; the other keeps going.
                    tracing::warn!(
                        job_id = %self.job_id,
                        stream = %self.stream,
                        ?error,
                        "error reading process output"
                    );
                    break;
                }
            }
        }
        if let Some(tail) = self.decoder.finish() {
            self.relay(tail).await;
        }
        self.records
    }

    /// Queue `data` for the writer, then emit it. Waits while the writer's
    /// queue is full.
    async fn relay(&mut self, data: String) {
        if data.is_empty() {
            return;
        }

        let now = Utc::now();
        let timestamp = match self.last_timestamp {
            Some(last) if last > now => last,
            _ => now,
        };
        self.last_timestamp = Some(timestamp);
        self.records += 1;

        let event = JobEvent::JobLog {
            job_id: self.job_id,
            stream: self.stream,
            data: data.clone(),
        };
        let record = LogRecord {
            job_id: self.job_id,
            timestamp,
            stream: self.stream,
            data,
        };

        if self.queue.send(record).await.is_err() {
            tracing::error!(
                job_id = %self.job_id,
                stream = %self.stream,
                "log writer is gone, record not persisted"
            );
        }
        self.sink.emit(event);
    }
}

#[cfg(test)]
mod tests {
    use std::{io, sync::Mutex, time::Duration};

    use async_trait::async_trait;
    use bytes::Bytes;
    use db::models::job::{Job, JobStatus};
    use futures::{FutureExt, stream};

    use super::*;
    use crate::services::store::PersistenceError;

    #[derive(Default)]
    struct MemoryStore {
        logs: Mutex<Vec<LogRecord>>,
        fail_appends: bool,
        append_delay: Option<Duration>,
    }

    #[async_trait]
    impl JobStore for MemoryStore {
        async fn insert_job(&self, _job: &Job) -> Result<(), PersistenceError> {
            Ok(())
        }

        async fn update_job_status(
            &self,
            _id: Uuid,
            _status: JobStatus,
            _exit_code: Option<i64>,
            _finished_at: DateTime<Utc>,
        ) -> Result<bool, PersistenceError> {
            Ok(true)
        }

        async fn append_log(&self, record: &LogRecord) -> Result<(), PersistenceError> {
            if let Some(delay) = self.append_delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail_appends {
                return Err(PersistenceError::Unavailable("disk full".into()));
            }
            self.logs.lock().unwrap().push(record.clone());
            Ok(())
        }

        async fn list_recent_jobs(&self, _limit: i64) -> Result<Vec<Job>, PersistenceError> {
            Ok(vec![])
        }

        async fn find_job(&self, _id: Uuid) -> Result<Option<Job>, PersistenceError> {
            Ok(None)
        }

        async fn job_logs(&self, _id: Uuid) -> Result<Vec<LogRecord>, PersistenceError> {
            Ok(self.logs.lock().unwrap().clone())
        }

        async fn fail_running_jobs(
            &self,
            _finished_at: DateTime<Utc>,
        ) -> Result<u64, PersistenceError> {
            Ok(0)
        }
    }

    #[derive(Default)]
    struct RecordingSink(Mutex<Vec<JobEvent>>);

    impl EventSink for RecordingSink {
        fn emit(&self, event: JobEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    fn chunks(parts: &[&[u8]]) -> OutputStream {
        let items: Vec<io::Result<Bytes>> = parts
            .iter()
            .map(|p| Ok(Bytes::copy_from_slice(p)))
            .collect();
        stream::iter(items).boxed()
    }

    fn handle(stdout: &[&[u8]], stderr: &[&[u8]], exit: ProcessExit) -> ProcessHandle {
        ProcessHandle {
            stdout: chunks(stdout),
            stderr: chunks(stderr),
            completion: futures::future::ready(exit).boxed(),
        }
    }

    fn logged(events: &[JobEvent], wanted: LogStream) -> String {
        events
            .iter()
            .filter_map(|e| match e {
                JobEvent::JobLog { stream, data, .. } if *stream == wanted => Some(data.as_str()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn every_chunk_is_stored_and_emitted() {
        let store = Arc::new(MemoryStore::default());
        let sink = Arc::new(RecordingSink::default());
        let job_id = Uuid::new_v4();

        let report = StreamMultiplexer::new(store.clone())
            .run(
                job_id,
                handle(&[b"a", b"b", b"c"], &[b"warn"], ProcessExit::Exited(0)),
                sink.clone(),
            )
            .await;

        assert_eq!(report.exit, ProcessExit::Exited(0));
        assert_eq!(report.stdout_records, 3);
        assert_eq!(report.stderr_records, 1);
        assert_eq!(report.persisted, 4);
        assert_eq!(report.persist_failures, 0);

        let logs = store.logs.lock().unwrap().clone();
        assert_eq!(db::models::job_log::concat_stream(&logs, LogStream::Stdout), "abc");
        assert_eq!(db::models::job_log::concat_stream(&logs, LogStream::Stderr), "warn");

        let events = sink.0.lock().unwrap().clone();
        assert_eq!(logged(&events, LogStream::Stdout), "abc");
        assert_eq!(logged(&events, LogStream::Stderr), "warn");
        assert!(events.iter().all(|e| e.job_id() == Some(job_id)));
    }

    #[tokio::test]
    async fn timestamps_never_go_backwards_within_a_stream() {
        let store = Arc::new(MemoryStore::default());
        let parts: Vec<&[u8]> = vec![&b"x"[..]; 50];
        StreamMultiplexer::new(store.clone())
            .run(
                Uuid::new_v4(),
                handle(&parts, &[], ProcessExit::Exited(0)),
                Arc::new(RecordingSink::default()),
            )
            .await;

        let logs = store.logs.lock().unwrap().clone();
        assert_eq!(logs.len(), 50);
        assert!(logs.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[tokio::test]
    async fn split_characters_are_reassembled() {
        let store = Arc::new(MemoryStore::default());
        let sink = Arc::new(RecordingSink::default());
        let snowman = "☃".as_bytes();
        StreamMultiplexer::new(store.clone())
            .run(
                Uuid::new_v4(),
                handle(&[&snowman[..1], &snowman[1..], b"!"], &[], ProcessExit::Exited(0)),
                sink.clone(),
            )
            .await;

        let events = sink.0.lock().unwrap().clone();
        assert_eq!(logged(&events, LogStream::Stdout), "☃!");
        assert!(events.iter().all(|e| match e {
            JobEvent::JobLog { data, .. } => !data.contains('\u{FFFD}'),
            _ => true,
        }));
    }

    #[tokio::test]
    async fn persistence_failures_do_not_stop_notifications() {
        let store = Arc::new(MemoryStore {
            fail_appends: true,
            ..Default::default()
        });
        let sink = Arc::new(RecordingSink::default());
        let report = StreamMultiplexer::new(store)
            .run(
                Uuid::new_v4(),
                handle(&[b"one", b"two"], &[b"three"], ProcessExit::Exited(1)),
                sink.clone(),
            )
            .await;

        assert_eq!(report.persisted, 0);
        assert_eq!(report.persist_failures, 3);
        assert_eq!(report.exit, ProcessExit::Exited(1));
        assert_eq!(logged(&sink.0.lock().unwrap(), LogStream::Stdout), "onetwo");
    }

    #[tokio::test]
    async fn slow_store_applies_backpressure_without_losing_records() {
        let store = Arc::new(MemoryStore {
            append_delay: Some(Duration::from_millis(2)),
            ..Default::default()
        });
        let sink = Arc::new(RecordingSink::default());
        let parts: Vec<&[u8]> = vec![&b"line\n"[..]; 20];
        let report = StreamMultiplexer::new(store.clone())
            .with_queue_capacity(2)
            .run(
                Uuid::new_v4(),
                handle(&parts, &[&b"warn\n"[..]], ProcessExit::Exited(0)),
                sink.clone(),
            )
            .await;

        assert_eq!(report.persisted, 21);
        assert_eq!(store.logs.lock().unwrap().len(), 21);

        // Held-back events still arrive, in read order, once queued.
        let events = sink.0.lock().unwrap().clone();
        assert_eq!(logged(&events, LogStream::Stdout), "line\n".repeat(20));
        assert_eq!(logged(&events, LogStream::Stderr), "warn\n");
    }

    #[tokio::test]
    async fn read_error_ends_only_that_stream() {
        let store = Arc::new(MemoryStore::default());
        let stdout = stream::iter(vec![
            Ok(Bytes::from_static(b"before")),
            Err(io::Error::other("pipe broke")),
            Ok(Bytes::from_static(b"never")),
        ])
        .boxed();
        let report = StreamMultiplexer::new(store.clone())
            .run(
                Uuid::new_v4(),
                ProcessHandle {
                    stdout,
                    stderr: chunks(&[b"still here"]),
                    completion: futures::future::ready(ProcessExit::Exited(0)).boxed(),
                },
                Arc::new(RecordingSink::default()),
            )
            .await;

        assert_eq!(report.stdout_records, 1);
        assert_eq!(report.stderr_records, 1);
    }
}

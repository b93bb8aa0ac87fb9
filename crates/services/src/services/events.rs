//! Realtime events pushed to the client that triggered a job.

use db::models::job::JobStatus;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use utils::log_msg::LogStream;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum JobEvent {
    #[serde(rename = "job-started", rename_all = "camelCase")]
    JobStarted { job_id: Uuid, command: String },
    #[serde(rename = "job-log", rename_all = "camelCase")]
    JobLog {
        job_id: Uuid,
        stream: LogStream,
        data: String,
    },
    #[serde(rename = "job-finished", rename_all = "camelCase")]
    JobFinished {
        job_id: Uuid,
        status: JobStatus,
        exit_code: Option<i64>,
    },
    #[serde(rename = "error")]
    Error { message: String },
}

impl JobEvent {
    pub fn error(message: impl Into<String>) -> Self {
        JobEvent::Error {
            message: message.into(),
        }
    }

    pub fn job_id(&self) -> Option<Uuid> {
        match self {
            JobEvent::JobStarted { job_id, .. }
            | JobEvent::JobLog { job_id, .. }
            | JobEvent::JobFinished { job_id, .. } => Some(*job_id),
            JobEvent::Error { .. } => None,
        }
    }
}

/// Where job events go. Emitting never blocks and never fails the caller;
/// events for a connection that went away are discarded.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: JobEvent);
}

/// Sink bound to a single client connection.
///
/// Backed by an unbounded queue that the connection drains, so emitting
/// never waits on a slow client. Events are only discarded once the
/// connection has dropped its receiver.
#[derive(Debug, Clone)]
pub struct ConnectionNotifier {
    sender: mpsc::UnboundedSender<JobEvent>,
}

impl ConnectionNotifier {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<JobEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl EventSink for ConnectionNotifier {
    fn emit(&self, event: JobEvent) {
        if let Err(mpsc::error::SendError(event)) = self.sender.send(event) {
            tracing::debug!(job_id = ?event.job_id(), "connection closed, dropping event");
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn wire_format() {
        let id = Uuid::nil();
        let started = JobEvent::JobStarted {
            job_id: id,
            command: "ls -la".into(),
        };
        assert_eq!(
            serde_json::to_value(&started).unwrap(),
            json!({"type": "job-started", "data": {"jobId": id, "command": "ls -la"}})
        );

        let log = JobEvent::JobLog {
            job_id: id,
            stream: LogStream::Stderr,
            data: "oops\n".into(),
        };
        assert_eq!(
            serde_json::to_value(&log).unwrap(),
            json!({"type": "job-log", "data": {"jobId": id, "stream": "stderr", "data": "oops\n"}})
        );

        let finished = JobEvent::JobFinished {
            job_id: id,
            status: JobStatus::Failed,
            exit_code: None,
        };
        assert_eq!(
            serde_json::to_value(&finished).unwrap(),
            json!({
                "type": "job-finished",
                "data": {"jobId": id, "status": "failed", "exitCode": null}
            })
        );

        assert_eq!(
            serde_json::to_value(JobEvent::error("Unknown command: nope")).unwrap(),
            json!({"type": "error", "data": {"message": "Unknown command: nope"}})
        );
    }

    #[tokio::test]
    async fn keeps_every_event_for_a_slow_reader() {
        let (notifier, mut rx) = ConnectionNotifier::channel();
        for i in 0..5000 {
            notifier.emit(JobEvent::error(format!("event {i}")));
        }

        for i in 0..5000 {
            assert_eq!(rx.recv().await, Some(JobEvent::error(format!("event {i}"))));
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn emitting_after_close_is_harmless() {
        let (notifier, rx) = ConnectionNotifier::channel();
        drop(rx);
        notifier.emit(JobEvent::error("after close"));
    }
}

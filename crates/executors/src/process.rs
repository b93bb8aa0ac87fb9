use std::io;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{future::BoxFuture, stream::BoxStream};
use thiserror::Error;
use utils::log_msg::LogStream;

use crate::command::ExecutableSpec;

/// Lazily produced, finite sequence of raw output chunks.
pub type OutputStream = BoxStream<'static, io::Result<Bytes>>;

#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("program '{program}' not found")]
    NotFound { program: String },
    #[error("permission denied launching '{program}'")]
    PermissionDenied { program: String },
    #[error("failed to spawn '{command}': {source}")]
    Io {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("spawned process for '{command}' has no {stream} pipe")]
    MissingPipe { command: String, stream: LogStream },
}

impl SpawnError {
    pub fn from_io(program: &str, command: String, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::NotFound => SpawnError::NotFound {
                program: program.to_string(),
            },
            io::ErrorKind::PermissionDenied => SpawnError::PermissionDenied {
                program: program.to_string(),
            },
            _ => SpawnError::Io { command, source },
        }
    }
}

/// How a process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessExit {
    /// Exited on its own with this status code.
    Exited(i32),
    /// Killed by a signal or otherwise ended without a code.
    Abnormal,
}

impl ProcessExit {
    pub fn code(&self) -> Option<i32> {
        match self {
            ProcessExit::Exited(code) => Some(*code),
            ProcessExit::Abnormal => None,
        }
    }

    pub fn success(&self) -> bool {
        matches!(self, ProcessExit::Exited(0))
    }

    pub fn from_local(status: std::process::ExitStatus) -> Self {
        match status.code() {
            Some(code) => ProcessExit::Exited(code),
            None => ProcessExit::Abnormal,
        }
    }
}

/// A started process: two output streams and one completion signal.
///
/// Local and remote processes produce identical handles.
pub struct ProcessHandle {
    pub stdout: OutputStream,
    pub stderr: OutputStream,
    pub completion: BoxFuture<'static, ProcessExit>,
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle").finish_non_exhaustive()
    }
}

#[async_trait]
pub trait ProcessExecutor: Send + Sync {
    /// Start one process for `spec`. Never reuses a previous process.
    async fn start(&self, spec: &ExecutableSpec) -> Result<ProcessHandle, SpawnError>;
}

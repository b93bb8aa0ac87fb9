//! Spawns processes on this machine. Remote specs run through the local `ssh`
//! client, so both kinds end up here.

use std::{path::PathBuf, process::Stdio};

use async_trait::async_trait;
use command_group::AsyncCommandGroup;
use futures::StreamExt;
use tokio::process::Command;
use tokio_util::io::ReaderStream;
use utils::log_msg::LogStream;

use crate::{
    command::{ExecutableSpec, Invocation},
    process::{ProcessExecutor, ProcessExit, ProcessHandle, SpawnError},
};

#[derive(Debug, Clone, Default)]
pub struct LocalProcessExecutor {
    working_dir: Option<PathBuf>,
}

impl LocalProcessExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    fn spawn(&self, invocation: &Invocation) -> Result<ProcessHandle, SpawnError> {
        let command_line = invocation.command_line();

        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .kill_on_drop(true)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        let mut child = command
            .group_spawn()
            .map_err(|e| SpawnError::from_io(&invocation.program, command_line.clone(), e))?;

        // Take pipes once, before the child moves into the completion future.
        let stdout = child
            .inner()
            .stdout
            .take()
            .ok_or_else(|| SpawnError::MissingPipe {
                command: command_line.clone(),
                stream: LogStream::Stdout,
            })?;
        let stderr = child
            .inner()
            .stderr
            .take()
            .ok_or_else(|| SpawnError::MissingPipe {
                command: command_line.clone(),
                stream: LogStream::Stderr,
            })?;

        let pid = child.id();
        tracing::debug!(?pid, command = %command_line, "process spawned");

        let completion = async move {
            match child.wait().await {
                Ok(status) => ProcessExit::from_local(status),
                Err(error) => {
                    tracing::warn!(?pid, ?error, "failed to wait on child process");
                    ProcessExit::Abnormal
                }
            }
        };

        Ok(ProcessHandle {
            stdout: ReaderStream::new(stdout).boxed(),
            stderr: ReaderStream::new(stderr).boxed(),
            completion: Box::pin(completion),
        })
    }
}

#[async_trait]
impl ProcessExecutor for LocalProcessExecutor {
    async fn start(&self, spec: &ExecutableSpec) -> Result<ProcessHandle, SpawnError> {
        self.spawn(&spec.invocation())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use futures::TryStreamExt;

    use super::*;

    async fn collect(stream: crate::process::OutputStream) -> String {
        let chunks: Vec<_> = stream.try_collect().await.unwrap();
        chunks
            .iter()
            .map(|c| String::from_utf8_lossy(c).into_owned())
            .collect()
    }

    #[tokio::test]
    async fn captures_both_streams_and_exit_code() {
        let spec = ExecutableSpec::local(
            "sh",
            vec!["-c".into(), "printf out; printf err >&2; exit 3".into()],
        );
        let handle = LocalProcessExecutor::new().start(&spec).await.unwrap();

        let (stdout, stderr, exit) =
            tokio::join!(collect(handle.stdout), collect(handle.stderr), handle.completion);
        assert_eq!(stdout, "out");
        assert_eq!(stderr, "err");
        assert_eq!(exit, ProcessExit::Exited(3));
    }

    #[tokio::test]
    async fn signal_termination_is_abnormal() {
        let spec = ExecutableSpec::local("sh", vec!["-c".into(), "kill -9 $$".into()]);
        let handle = LocalProcessExecutor::new().start(&spec).await.unwrap();
        let (_, _, exit) =
            tokio::join!(collect(handle.stdout), collect(handle.stderr), handle.completion);
        assert_eq!(exit, ProcessExit::Abnormal);
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let spec = ExecutableSpec::local("definitely-not-a-real-binary-4242", vec![]);
        let err = LocalProcessExecutor::new().start(&spec).await.unwrap_err();
        assert!(matches!(err, SpawnError::NotFound { .. }));
    }

    #[tokio::test]
    async fn runs_in_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        let executor = LocalProcessExecutor::new().with_working_dir(dir.path());
        let spec = ExecutableSpec::local("pwd", vec![]);
        let handle = executor.start(&spec).await.unwrap();
        let (stdout, _, exit) =
            tokio::join!(collect(handle.stdout), collect(handle.stderr), handle.completion);
        assert!(exit.success());
        let expected = dir.path().canonicalize().unwrap();
        let actual = std::path::PathBuf::from(stdout.trim()).canonicalize().unwrap();
        assert_eq!(actual, expected);
    }
}

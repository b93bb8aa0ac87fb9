use serde::{Deserialize, Serialize};
use strum_macros::Display;
use utils::shell::render_command_line;

/// Program used to reach remote hosts.
pub const SSH_PROGRAM: &str = "ssh";

/// Where a registered command runs.
///
/// Remote commands are persisted and reported as `ssh`; configuration files
/// may spell them either `remote` or `ssh`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, Display,
)]
#[sqlx(type_name = "job_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    #[strum(to_string = "local")]
    Local,
    #[sqlx(rename = "ssh")]
    #[serde(rename = "ssh", alias = "remote")]
    #[strum(to_string = "ssh")]
    Remote,
}

/// Resolved description of what to run for a command key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutableSpec {
    pub kind: CommandKind,
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// `user@host` target, required for remote commands.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

/// A concrete program + argument vector handed to the OS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
}

impl Invocation {
    pub fn command_line(&self) -> String {
        render_command_line(&self.program, &self.args)
    }
}

impl ExecutableSpec {
    pub fn local(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            kind: CommandKind::Local,
            program: program.into(),
            args,
            host: None,
        }
    }

    pub fn remote(host: impl Into<String>, program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            kind: CommandKind::Remote,
            program: program.into(),
            args,
            host: Some(host.into()),
        }
    }

    /// The invocation actually spawned for this spec.
    ///
    /// Remote specs are wrapped in a non-interactive `ssh` call; the remote
    /// command line is quoted once so the remote shell sees the original
    /// argument boundaries.
    pub fn invocation(&self) -> Invocation {
        match (self.kind, &self.host) {
            (CommandKind::Remote, Some(host)) => Invocation {
                program: SSH_PROGRAM.to_string(),
                args: vec![
                    "-o".to_string(),
                    "BatchMode=yes".to_string(),
                    host.clone(),
                    "--".to_string(),
                    render_command_line(&self.program, &self.args),
                ],
            },
            _ => Invocation {
                program: self.program.clone(),
                args: self.args.clone(),
            },
        }
    }

    /// The fully rendered command line recorded on the job.
    pub fn command_line(&self) -> String {
        self.invocation().command_line()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_spec_runs_as_is() {
        let spec = ExecutableSpec::local("npm", vec!["run".into(), "build".into()]);
        let invocation = spec.invocation();
        assert_eq!(invocation.program, "npm");
        assert_eq!(invocation.args, vec!["run", "build"]);
        assert_eq!(spec.command_line(), "npm run build");
    }

    #[test]
    fn remote_spec_is_wrapped_in_ssh() {
        let spec = ExecutableSpec::remote(
            "deploy@web1",
            "systemctl",
            vec!["status".into(), "my app".into()],
        );
        let invocation = spec.invocation();
        assert_eq!(invocation.program, "ssh");
        assert_eq!(
            invocation.args,
            vec![
                "-o",
                "BatchMode=yes",
                "deploy@web1",
                "--",
                "systemctl status 'my app'"
            ]
        );
        assert_eq!(
            spec.command_line(),
            "ssh -o BatchMode=yes deploy@web1 -- 'systemctl status '\"'\"'my app'\"'\"''"
        );
    }

    #[test]
    fn kind_serializes_with_persisted_names() {
        assert_eq!(
            serde_json::to_string(&CommandKind::Remote).unwrap(),
            "\"ssh\""
        );
        assert_eq!(CommandKind::Local.to_string(), "local");
        let kind: CommandKind = serde_json::from_str("\"remote\"").unwrap();
        assert_eq!(kind, CommandKind::Remote);
    }
}

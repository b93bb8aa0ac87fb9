use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use serde::Deserialize;
use thiserror::Error;

use crate::command::{CommandKind, ExecutableSpec};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Unknown command: {0}")]
    UnknownCommand(String),
    #[error("failed to read command registry {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("command '{key}' is invalid: {reason}")]
    Invalid { key: String, reason: &'static str },
}

#[derive(Debug, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    commands: BTreeMap<String, ExecutableSpec>,
}

/// Immutable mapping from command key to what it executes.
///
/// Built once at startup and shared behind an `Arc`; lookups never mutate.
#[derive(Debug, Clone, Default)]
pub struct CommandRegistry {
    commands: BTreeMap<String, ExecutableSpec>,
}

impl CommandRegistry {
    pub fn new<I>(commands: I) -> Result<Self, RegistryError>
    where
        I: IntoIterator<Item = (String, ExecutableSpec)>,
    {
        let commands: BTreeMap<_, _> = commands.into_iter().collect();
        for (key, spec) in &commands {
            validate(key, spec)?;
        }
        Ok(Self { commands })
    }

    pub fn from_json(raw: &str) -> Result<Self, RegistryError> {
        let file: RegistryFile = serde_json::from_str(raw)?;
        Self::new(file.commands)
    }

    /// Load the registry from `path`. A missing file yields an empty registry.
    pub fn load(path: &Path) -> Result<Self, RegistryError> {
        match std::fs::read_to_string(path) {
            Ok(raw) => Self::from_json(&raw),
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    path = %path.display(),
                    "command registry not found, no commands available"
                );
                Ok(Self::default())
            }
            Err(source) => Err(RegistryError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub fn resolve(&self, key: &str) -> Result<&ExecutableSpec, RegistryError> {
        self.commands
            .get(key)
            .ok_or_else(|| RegistryError::UnknownCommand(key.to_string()))
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

fn validate(key: &str, spec: &ExecutableSpec) -> Result<(), RegistryError> {
    let invalid = |reason| RegistryError::Invalid {
        key: key.to_string(),
        reason,
    };
    if key.trim().is_empty() {
        return Err(invalid("key is empty"));
    }
    if spec.program.trim().is_empty() {
        return Err(invalid("program is empty"));
    }
    match (spec.kind, spec.host.as_deref()) {
        (CommandKind::Remote, None) => Err(invalid("remote commands need a host")),
        (CommandKind::Remote, Some(host)) if host.trim().is_empty() => {
            Err(invalid("remote commands need a host"))
        }
        (CommandKind::Local, Some(_)) => Err(invalid("local commands cannot set a host")),
        _ => Ok(()),
    }
}

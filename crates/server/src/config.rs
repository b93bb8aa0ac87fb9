use std::{env, path::PathBuf};

use thiserror::Error;
use utils::assets::asset_dir;

const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8080";
const DEFAULT_COMMANDS_PATH: &str = "commands.json";
// Log records queued per job ahead of the store before readers wait
const DEFAULT_PERSIST_QUEUE: usize = 1024;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub database_url: String,
    pub listen_addr: String,
    pub commands_path: PathBuf,
    pub persist_queue: usize,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("environment variable `{name}` has invalid value `{value}`")]
    InvalidVar { name: &'static str, value: String },
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build the config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("SERVER_DATABASE_URL")
            .or_else(|| lookup("DATABASE_URL"))
            .unwrap_or_else(default_database_url);

        let listen_addr =
            lookup("SERVER_LISTEN_ADDR").unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string());

        let commands_path = lookup("SERVER_COMMANDS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_COMMANDS_PATH));

        let persist_queue = match lookup("SERVER_PERSIST_QUEUE") {
            Some(value) => match value.parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(ConfigError::InvalidVar {
                        name: "SERVER_PERSIST_QUEUE",
                        value,
                    })
                }
            },
            None => DEFAULT_PERSIST_QUEUE,
        };

        Ok(Self {
            database_url,
            listen_addr,
            commands_path,
            persist_queue,
        })
    }
}

fn default_database_url() -> String {
    format!(
        "sqlite://{}",
        asset_dir().join("command-runner.sqlite").display()
    )
}

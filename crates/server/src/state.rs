use std::sync::Arc;

use services::services::{history::JobHistory, jobs::JobService};

use crate::config::ServerConfig;

#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    jobs: JobService,
    history: JobHistory,
    config: ServerConfig,
}

impl AppState {
    pub fn new(jobs: JobService, history: JobHistory, config: ServerConfig) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                jobs,
                history,
                config,
            }),
        }
    }

    pub fn jobs(&self) -> &JobService {
        &self.inner.jobs
    }

    pub fn history(&self) -> &JobHistory {
        &self.inner.history
    }

    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }
}

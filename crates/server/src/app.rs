use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use db::DBService;
use executors::{local::LocalProcessExecutor, registry::CommandRegistry};
use services::services::{
    history::JobHistory,
    jobs::JobService,
    store::{JobStore, SqliteJobStore},
};

use crate::{config::ServerConfig, routes, AppState};

pub struct Server;

impl Server {
    pub async fn run(config: ServerConfig) -> anyhow::Result<()> {
        let db = DBService::new(&config.database_url)
            .await
            .context("failed to open sqlite database")?;
        let store: Arc<dyn JobStore> = Arc::new(SqliteJobStore::new(db));

        let registry = CommandRegistry::load(&config.commands_path).with_context(|| {
            format!(
                "failed to load command registry from {}",
                config.commands_path.display()
            )
        })?;
        tracing::info!(
            commands = registry.len(),
            path = %config.commands_path.display(),
            "command registry loaded"
        );

        let jobs = JobService::new(
            Arc::new(registry),
            Arc::new(LocalProcessExecutor::new()),
            store.clone(),
        )
        .with_persist_queue(config.persist_queue);
        jobs.reconcile_orphaned_jobs()
            .await
            .context("failed to reconcile jobs left running")?;

        let state = AppState::new(jobs, JobHistory::new(store), config.clone());
        let router = routes::router(state);

        let addr: SocketAddr = config
            .listen_addr
            .parse()
            .context("listen address is invalid")?;
        let tcp_listener = tokio::net::TcpListener::bind(addr)
            .await
            .context("failed to bind tcp listener")?;

        tracing::info!(%addr, "command runner listening");

        axum::serve(tcp_listener, router.into_make_service())
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("command runner server failure")?;

        tracing::info!("command runner stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(?error, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}

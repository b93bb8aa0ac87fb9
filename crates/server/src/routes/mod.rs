use axum::{routing::get, Router};
use tower_http::cors::CorsLayer;

use crate::AppState;

pub mod jobs;

pub fn router(state: AppState) -> Router {
    let api = Router::<AppState>::new()
        .route("/health", get(health))
        .route("/jobs", get(jobs::list_jobs))
        .route("/jobs/{job_id}", get(jobs::get_job))
        .route("/jobs/{job_id}/logs", get(jobs::get_job_logs))
        .merge(crate::ws::router());

    Router::<AppState>::new()
        .nest("/api", api)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

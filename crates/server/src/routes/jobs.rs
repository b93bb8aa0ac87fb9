use axum::{
    extract::{rejection::QueryRejection, Path, Query, State},
    response::Json as ResponseJson,
};
use db::models::{job::Job, job_log::LogRecord};
use serde::Deserialize;
use utils::response::ApiResponse;
use uuid::Uuid;

use crate::{error::ApiError, AppState};

#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    pub limit: Option<i64>,
}

pub async fn list_jobs(
    State(state): State<AppState>,
    query: Result<Query<ListJobsQuery>, QueryRejection>,
) -> Result<ResponseJson<ApiResponse<Vec<Job>>>, ApiError> {
    let Query(query) = query?;
    let jobs = state.history().list_recent(query.limit).await?;
    Ok(ResponseJson(ApiResponse::success(jobs)))
}

pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<Job>>, ApiError> {
    let job = state
        .history()
        .find(job_id)
        .await?
        .ok_or(ApiError::JobNotFound(job_id))?;
    Ok(ResponseJson(ApiResponse::success(job)))
}

pub async fn get_job_logs(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<Vec<LogRecord>>>, ApiError> {
    if state.history().find(job_id).await?.is_none() {
        return Err(ApiError::JobNotFound(job_id));
    }
    let logs = state.history().logs(job_id).await?;
    Ok(ResponseJson(ApiResponse::success(logs)))
}

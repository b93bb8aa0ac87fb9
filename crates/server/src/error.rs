use axum::{
    extract::rejection::QueryRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use services::services::store::PersistenceError;
use thiserror::Error;
use utils::response::ApiResponse;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error("Job {0} not found")]
    JobNotFound(Uuid),
    #[error(transparent)]
    Query(#[from] QueryRejection),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status_code, error_type) = match &self {
            ApiError::Persistence(_) => (StatusCode::INTERNAL_SERVER_ERROR, "PersistenceError"),
            ApiError::JobNotFound(_) => (StatusCode::NOT_FOUND, "NotFound"),
            ApiError::Query(_) => (StatusCode::BAD_REQUEST, "BadRequest"),
        };

        let error_message = match &self {
            ApiError::JobNotFound(_) | ApiError::Query(_) => self.to_string(),
            ApiError::Persistence(error) => {
                tracing::error!(?error, "request failed on the job store");
                format!("{}: {}", error_type, self)
            }
        };
        let response = ApiResponse::<()>::error(&error_message);
        (status_code, Json(response)).into_response()
    }
}

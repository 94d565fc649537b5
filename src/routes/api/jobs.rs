use axum::Json;
use axum::extract::{Path, Query, State};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::job::{Job, JobFilters, JobStatus};
use crate::routes::AppState;

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 200;

pub async fn list(
    State(state): State<AppState>,
    Query(filters): Query<JobFilters>,
) -> Result<Json<Vec<Job>>, AppError> {
    let limit = filters.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let jobs = state.jobs.list_recent(limit).await?;
    Ok(Json(jobs))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Job>, AppError> {
    let job = state.jobs.get(id).await?;
    Ok(Json(job))
}

/// POST /api/v1/jobs
///
/// Queue a job. The body is the payload itself, or `{"job": {...}}`.
/// Payload fields are not checked here; a bad payload surfaces later as a
/// failed job.
pub async fn submit(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, AppError> {
    let payload = match body {
        Value::Object(mut map)
            if map.len() == 1 && map.get("job").is_some_and(Value::is_object) =>
        {
            map.remove("job").unwrap_or_default()
        }
        Value::Object(map) => Value::Object(map),
        _ => {
            return Err(AppError::BadRequest(
                "Job payload must be a JSON object".to_string(),
            ));
        }
    };

    let id = state.jobs.submit(payload).await?;
    tracing::info!("Queued job {id}");
    Ok(Json(json!({ "id": id, "status": JobStatus::Pending })))
}

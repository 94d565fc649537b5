use axum::Json;
use axum::extract::{Query, State};

use crate::error::AppError;
use crate::models::record::{Record, RecordFilters};
use crate::routes::AppState;

pub async fn list(
    State(state): State<AppState>,
    Query(filters): Query<RecordFilters>,
) -> Result<Json<Vec<Record>>, AppError> {
    let records = state.records.list(&filters).await?;
    Ok(Json(records))
}

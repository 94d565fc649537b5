pub mod jobs;
pub mod listings;

use axum::Router;
use axum::routing::get;

use crate::routes::AppState;

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/jobs", get(jobs::list).post(jobs::submit))
        .route("/jobs/{id}", get(jobs::get))
        .route("/listings", get(listings::list))
        .with_state(state);

    Router::new().nest("/api/v1", api)
}

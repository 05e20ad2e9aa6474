use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};

use super::{error_status, ApiState};
use crate::db::Generation;
use crate::jobs::Task;

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/tasks/:id", get(get_task))
        .route("/generations/:id", get(get_generation))
        .with_state(state)
}

async fn get_task(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<Task>, StatusCode> {
    let task = state
        .tasks
        .get_task(&id)
        .map_err(error_status)?
        .ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(task))
}

async fn get_generation(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> Result<Json<Generation>, StatusCode> {
    let generation = state
        .pipeline
        .db
        .get_generation(id)
        .map_err(error_status)?
        .ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(generation))
}

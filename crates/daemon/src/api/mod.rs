use anyhow::Error;
use axum::http::StatusCode;
use axum::Router;
use std::sync::Arc;
use tracing::error;

use crate::error::PipelineError;
use crate::jobs::TaskManager;
use crate::orchestrator::Pipeline;

pub mod jobs;
pub mod plans;
pub mod videos;

#[derive(Clone)]
pub struct ApiState {
    pub pipeline: Pipeline,
    pub tasks: Arc<TaskManager>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .nest("/plans", plans::router(state.clone()))
        .nest("/videos", videos::router(state.clone()))
        .merge(jobs::router(state))
}

/// Maps a service error onto a response status, logging the unexpected ones.
pub(crate) fn error_status(e: Error) -> StatusCode {
    match e.downcast_ref::<PipelineError>() {
        Some(PipelineError::NotFound { .. }) => StatusCode::NOT_FOUND,
        Some(PipelineError::InvalidPlan(_)) => StatusCode::UNPROCESSABLE_ENTITY,
        Some(PipelineError::StatusConflict { .. }) => StatusCode::CONFLICT,
        _ => {
            error!("[API] {:#}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

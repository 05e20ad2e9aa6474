use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{error_status, ApiState};
use crate::db::{CompositeImage, Generation, VeoClip, VideoJob};
use crate::error::PipelineError;
use crate::orchestrator::{self, PlanSubmission, VideoRequest};

#[derive(Deserialize)]
pub struct SubmitPlanRequest {
    request: VideoRequest,
    plan: Value,
}

#[derive(Serialize)]
pub struct JobStatusResponse {
    job: VideoJob,
    composites: Vec<CompositeImage>,
    clips: Vec<VeoClip>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/", post(start_generation))
        .route("/jobs", post(submit_plan))
        .route("/jobs/:id", get(get_job))
        .with_state(state)
}

async fn start_generation(
    State(state): State<ApiState>,
    Json(req): Json<VideoRequest>,
) -> Result<(StatusCode, Json<Generation>), StatusCode> {
    let generation = orchestrator::start_generation(&state.pipeline, &req).map_err(error_status)?;
    Ok((StatusCode::ACCEPTED, Json(generation)))
}

async fn submit_plan(
    State(state): State<ApiState>,
    Json(req): Json<SubmitPlanRequest>,
) -> Result<(StatusCode, Json<PlanSubmission>), StatusCode> {
    let submission =
        orchestrator::submit_plan(&state.pipeline, &req.request, req.plan).map_err(error_status)?;
    let status = if submission.job.is_some() {
        StatusCode::CREATED
    } else {
        StatusCode::UNPROCESSABLE_ENTITY
    };
    Ok((status, Json(submission)))
}

async fn get_job(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> Result<Json<JobStatusResponse>, StatusCode> {
    let db = &state.pipeline.db;
    let job = db
        .get_video_job(id)
        .map_err(error_status)?
        .ok_or_else(|| error_status(PipelineError::not_found("video job", id).into()))?;
    let composites = db.list_composites_for_job(id).map_err(error_status)?;
    let clips = db.list_veo_clips_for_job(id).map_err(error_status)?;

    Ok(Json(JobStatusResponse {
        job,
        composites,
        clips,
    }))
}

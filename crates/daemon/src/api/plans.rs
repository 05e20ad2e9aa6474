use axum::{extract::State, http::StatusCode, response::Json, routing::post, Router};
use engine::{validate_plan_json, ValidationReport};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{error_status, ApiState};
use crate::orchestrator::{build_director_input, VideoRequest};

#[derive(Deserialize)]
pub struct ValidateRequest {
    request: VideoRequest,
    plan: Value,
}

#[derive(Serialize)]
pub struct ValidateResponse {
    report: ValidationReport,
    normalizations: Vec<String>,
    /// The plan after normalization.
    plan: Value,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/validate", post(validate))
        .with_state(state)
}

async fn validate(
    State(state): State<ApiState>,
    Json(req): Json<ValidateRequest>,
) -> Result<Json<ValidateResponse>, StatusCode> {
    let input = build_director_input(&state.pipeline.db, &req.request).map_err(error_status)?;
    let mut plan = req.plan;
    let validated = validate_plan_json(&mut plan, &input);

    Ok(Json(ValidateResponse {
        report: validated.report,
        normalizations: validated.normalizations,
        plan,
    }))
}

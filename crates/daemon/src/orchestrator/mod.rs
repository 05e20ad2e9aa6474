//! Video job lifecycle: entry points, the stage runner, and recovery of jobs
//! left between stages.

use anyhow::Result;
use engine::{validate_plan_json, ValidationReport, VideoGenerationPlan};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

use crate::db::{Database, Generation, NewVideoJob, VideoJob};
use crate::error::PipelineError;
use crate::genai::{Director, ImageGenerator, VideoGenerator};
use crate::jobs::{TaskHandle, TaskKind, TaskTrigger};
use crate::media::MediaAssembler;
use crate::storage::{MediaFetcher, Storage};

pub mod ensure;
pub mod input;
pub mod stage;

pub use input::{build_director_input, VideoRequest};
pub use stage::{run_stage, Stage};

/// Everything a stage needs. Cheap to clone; every collaborator is shared.
#[derive(Clone)]
pub struct Pipeline {
    pub db: Arc<Database>,
    pub tasks: Arc<dyn TaskTrigger>,
    pub director: Arc<dyn Director>,
    pub images: Arc<dyn ImageGenerator>,
    pub videos: Arc<dyn VideoGenerator>,
    pub storage: Arc<dyn Storage>,
    pub fetcher: Arc<dyn MediaFetcher>,
    pub assembler: Arc<dyn MediaAssembler>,
}

/// Enqueues a follow-up task. The caller's row is already committed, so a
/// failure here is logged and swallowed; the row simply has no trigger id.
pub fn trigger_secondary(pipeline: &Pipeline, kind: TaskKind, payload: Value) -> Option<TaskHandle> {
    match pipeline.tasks.trigger(kind, payload.clone()) {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!("[ORCHESTRATOR] Failed to trigger {} task for {}: {:#}", kind, payload, e);
            None
        }
    }
}

/// Records a planning request and queues the director call.
pub fn start_generation(pipeline: &Pipeline, request: &VideoRequest) -> Result<Generation> {
    // Fail fast on unknown catalog ids rather than in the background.
    build_director_input(&pipeline.db, request)?;

    let generation_id = pipeline.db.create_generation(&serde_json::to_value(request)?)?;
    info!("[ORCHESTRATOR] Created generation {}", generation_id);

    if let Some(handle) = trigger_secondary(
        pipeline,
        TaskKind::PlanVideo,
        json!({ "generation_id": generation_id }),
    ) {
        if let Err(e) = pipeline.db.set_generation_trigger(generation_id, &handle.id) {
            warn!("[ORCHESTRATOR] Could not record trigger on generation {}: {:#}", generation_id, e);
        }
    }

    pipeline
        .db
        .get_generation(generation_id)?
        .ok_or_else(|| PipelineError::not_found("generation", generation_id).into())
}

/// Persists a job for an already validated plan in `pending` and queues
/// composite generation. `generation_id` is the planning generation, if any,
/// which gets linked to the job atomically.
pub fn create_video_job(
    pipeline: &Pipeline,
    request: &VideoRequest,
    plan: &VideoGenerationPlan,
    generation_id: Option<i64>,
) -> Result<VideoJob> {
    let job_id = pipeline.db.create_video_job(&NewVideoJob {
        product_id: request.product_id,
        avatar_id: request.avatar_id,
        demo_ids: &request.demo_ids,
        tone: request.tone.as_deref(),
        target_duration: request.target_duration,
        plan,
        generation_id,
    })?;
    info!(
        "[ORCHESTRATOR] Created video job {} ({}s, {} veo calls, {} composites)",
        job_id,
        plan.total_duration.seconds(),
        plan.veo_calls.len(),
        plan.image_generation.len()
    );

    if let Some(handle) = trigger_secondary(
        pipeline,
        TaskKind::GenerateComposites,
        json!({ "video_job_id": job_id }),
    ) {
        if let Err(e) = pipeline.db.set_video_job_trigger(job_id, &handle.id) {
            warn!("[ORCHESTRATOR] Could not record trigger on video job {}: {:#}", job_id, e);
        }
    }

    pipeline
        .db
        .get_video_job(job_id)?
        .ok_or_else(|| PipelineError::not_found("video job", job_id).into())
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanSubmission {
    pub report: ValidationReport,
    pub normalizations: Vec<String>,
    /// Only set when the plan was valid.
    pub job: Option<VideoJob>,
}

/// Validates a caller-supplied plan and, if it passes, starts a job for it.
pub fn submit_plan(pipeline: &Pipeline, request: &VideoRequest, mut raw: Value) -> Result<PlanSubmission> {
    let input = build_director_input(&pipeline.db, request)?;
    let validated = validate_plan_json(&mut raw, &input);

    let job = match validated.plan {
        Some(plan) if validated.report.valid => Some(create_video_job(pipeline, request, &plan, None)?),
        _ => None,
    };
    Ok(PlanSubmission {
        report: validated.report,
        normalizations: validated.normalizations,
        job,
    })
}

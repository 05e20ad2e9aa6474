use anyhow::{Context, Result};
use engine::{validate_plan_json, GenerationStatus};
use tracing::{error, info, warn};

use crate::db::Generation;
use crate::error::PipelineError;
use crate::orchestrator::{build_director_input, create_video_job, Pipeline, VideoRequest};

/// Asks the director for a plan, validates it and starts a video job for it.
/// The generation row tracks this task; the job it creates carries on from
/// there.
pub async fn process_plan_video(pipeline: &Pipeline, generation_id: i64) -> Result<()> {
    let generation = pipeline
        .db
        .get_generation(generation_id)?
        .ok_or_else(|| PipelineError::not_found("generation", generation_id))?;

    if generation.status == GenerationStatus::Completed {
        info!("[PLAN] Generation {} already completed", generation_id);
        return Ok(());
    }

    pipeline.db.transition_generation(
        generation_id,
        generation.status,
        GenerationStatus::Processing,
        None,
    )?;

    match plan_and_start_job(pipeline, &generation).await {
        Ok(job_id) => {
            pipeline.db.transition_generation(
                generation_id,
                GenerationStatus::Processing,
                GenerationStatus::Completed,
                None,
            )?;
            info!("[PLAN] Generation {} completed with video job {}", generation_id, job_id);
            Ok(())
        }
        Err(e) => {
            error!("[PLAN] Generation {} failed: {:#}", generation_id, e);
            if let Err(mark) = pipeline.db.transition_generation(
                generation_id,
                GenerationStatus::Processing,
                GenerationStatus::Failed,
                Some(&format!("{:#}", e)),
            ) {
                error!("[PLAN] Could not mark generation {} failed: {:#}", generation_id, mark);
            }
            Err(e)
        }
    }
}

async fn plan_and_start_job(pipeline: &Pipeline, generation: &Generation) -> Result<i64> {
    if let Some(job_id) = generation.video_job_id {
        info!("[PLAN] Generation {} already started job {}", generation.id, job_id);
        return Ok(job_id);
    }

    let request: VideoRequest = serde_json::from_value(generation.prompt.clone())
        .with_context(|| format!("generation {} has an unreadable request", generation.id))?;
    let input = build_director_input(&pipeline.db, &request)?;

    info!("[PLAN] Generation {} asking director for a plan", generation.id);
    let mut raw = pipeline.director.plan(&input).await?;
    let validated = validate_plan_json(&mut raw, &input);

    for note in &validated.normalizations {
        info!("[PLAN] Generation {} normalized {}", generation.id, note);
    }
    for warning in &validated.report.warnings {
        warn!("[PLAN] Generation {}: {}", generation.id, warning);
    }
    if !validated.report.valid {
        return Err(PipelineError::InvalidPlan(validated.report.errors).into());
    }
    let plan = validated
        .plan
        .ok_or_else(|| anyhow::anyhow!("validated plan for generation {} is missing", generation.id))?;

    let job = create_video_job(pipeline, &request, &plan, Some(generation.id))?;
    Ok(job.id)
}

use anyhow::Result;
use engine::{GenerationStatus, VideoJobStatus};
use serde_json::json;
use tracing::{info, warn};

use super::stage::mark_failed;
use super::{trigger_secondary, Pipeline};
use crate::jobs::{Task, TaskKind, TaskManager};

/// Which task moves a job out of a resting status.
fn pending_work(status: VideoJobStatus) -> Option<TaskKind> {
    match status {
        VideoJobStatus::Pending => Some(TaskKind::GenerateComposites),
        VideoJobStatus::CompositesCompleted => Some(TaskKind::GenerateClips),
        VideoJobStatus::ClipsCompleted => Some(TaskKind::AssembleVideo),
        _ => None,
    }
}

/// Re-queues jobs resting between stages with no task to move them on,
/// e.g. after a follow-up trigger failed. Returns how many were queued.
pub fn ensure_jobs_progress(pipeline: &Pipeline, tasks: &TaskManager) -> Result<usize> {
    let mut queued = 0;
    for status in [
        VideoJobStatus::Pending,
        VideoJobStatus::CompositesCompleted,
        VideoJobStatus::ClipsCompleted,
    ] {
        let Some(kind) = pending_work(status) else {
            continue;
        };
        for job in pipeline.db.list_video_jobs_with_status(status)? {
            if tasks.has_open_task(kind, "video_job_id", job.id)? {
                continue;
            }
            info!("[ORCHESTRATOR] Job {} is {} with no {} task, re-queueing", job.id, status, kind);
            if let Some(handle) = trigger_secondary(pipeline, kind, json!({ "video_job_id": job.id })) {
                pipeline.db.set_video_job_trigger(job.id, &handle.id)?;
                queued += 1;
            }
        }
    }
    Ok(queued)
}

/// A timed-out attempt was dropped mid-flight, so the stage never got to
/// record its own failure. Do it on its behalf.
pub fn record_abandoned_attempt(pipeline: &Pipeline, task: &Task, reason: &str) -> Result<()> {
    let cause = anyhow::anyhow!("{}", reason);
    match task.kind {
        TaskKind::PlanVideo => {
            let id = task.payload_id("generation_id")?;
            if let Some(generation) = pipeline.db.get_generation(id)? {
                if generation.status == GenerationStatus::Processing {
                    pipeline.db.transition_generation(
                        id,
                        GenerationStatus::Processing,
                        GenerationStatus::Failed,
                        Some(reason),
                    )?;
                }
            }
        }
        _ => {
            let id = task.payload_id("video_job_id")?;
            if let Some(job) = pipeline.db.get_video_job(id)? {
                if job.status.is_working() {
                    mark_failed(pipeline, id, job.status, &cause);
                } else {
                    warn!("[ORCHESTRATOR] Job {} is {} after an abandoned {} attempt", id, job.status, task.kind);
                }
            }
        }
    }
    Ok(())
}

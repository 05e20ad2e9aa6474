use anyhow::Result;
use engine::VideoJobStatus;
use serde_json::json;
use tracing::{error, info};

use super::{trigger_secondary, Pipeline};
use crate::db::VideoJob;
use crate::error::PipelineError;
use crate::jobs::{assemble, clips, composites, TaskKind};

/// One background stage of a video job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Composites,
    Clips,
    Assembly,
}

impl Stage {
    pub fn for_task(kind: TaskKind) -> Option<Stage> {
        match kind {
            TaskKind::GenerateComposites => Some(Stage::Composites),
            TaskKind::GenerateClips => Some(Stage::Clips),
            TaskKind::AssembleVideo => Some(Stage::Assembly),
            TaskKind::PlanVideo => None,
        }
    }

    pub fn working(self) -> VideoJobStatus {
        match self {
            Stage::Composites => VideoJobStatus::GeneratingComposites,
            Stage::Clips => VideoJobStatus::GeneratingClips,
            Stage::Assembly => VideoJobStatus::Assembling,
        }
    }

    pub fn done(self) -> VideoJobStatus {
        match self {
            Stage::Composites => VideoJobStatus::CompositesCompleted,
            Stage::Clips => VideoJobStatus::ClipsCompleted,
            Stage::Assembly => VideoJobStatus::Completed,
        }
    }

    /// The task that picks up after this stage.
    pub fn next_task(self) -> Option<TaskKind> {
        match self {
            Stage::Composites => Some(TaskKind::GenerateClips),
            Stage::Clips => Some(TaskKind::AssembleVideo),
            Stage::Assembly => None,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Stage::Composites => "COMPOSITES",
            Stage::Clips => "CLIPS",
            Stage::Assembly => "ASSEMBLY",
        }
    }
}

/// Position along the happy path; `failed` has none.
fn progress(status: VideoJobStatus) -> Option<usize> {
    if status == VideoJobStatus::Failed {
        return None;
    }
    VideoJobStatus::ALL.iter().position(|s| *s == status)
}

/// Runs `stage` for a job: claims the working state, does the work, then
/// moves to the stage's completed state and queues the next stage.
///
/// Any error marks the job `failed` and is returned so the task runner can
/// apply its retry policy. A rerun after the stage already finished is a
/// no-op.
pub async fn run_stage(pipeline: &Pipeline, job_id: i64, stage: Stage) -> Result<()> {
    let job = pipeline
        .db
        .get_video_job(job_id)?
        .ok_or_else(|| PipelineError::not_found("video job", job_id))?;

    if let (Some(at), Some(done)) = (progress(job.status), progress(stage.done())) {
        if at >= done {
            info!(
                "[{}] Job {} is already {}, nothing to do",
                stage.label(),
                job_id,
                job.status
            );
            return Ok(());
        }
    }

    pipeline
        .db
        .transition_video_job(job_id, job.status, stage.working())?;
    info!("[{}] Job {} {} -> {}", stage.label(), job_id, job.status, stage.working());

    match execute(pipeline, &job, stage).await {
        Ok(()) => {
            info!("[{}] Job {} -> {}", stage.label(), job_id, stage.done());
            if let Some(next) = stage.next_task() {
                if let Some(handle) = trigger_secondary(pipeline, next, json!({ "video_job_id": job_id })) {
                    if let Err(e) = pipeline.db.set_video_job_trigger(job_id, &handle.id) {
                        error!("[{}] Could not record trigger on job {}: {:#}", stage.label(), job_id, e);
                    }
                }
            }
            Ok(())
        }
        Err(e) => {
            error!("[{}] Job {} failed: {:#}", stage.label(), job_id, e);
            mark_failed(pipeline, job_id, stage.working(), &e);
            Err(e)
        }
    }
}

async fn execute(pipeline: &Pipeline, job: &VideoJob, stage: Stage) -> Result<()> {
    let plan = job.plan()?;
    match stage {
        Stage::Composites => composites::generate_composites(pipeline, job, &plan).await?,
        Stage::Clips => clips::generate_clips(pipeline, job, &plan).await?,
        Stage::Assembly => assemble::assemble_video(pipeline, job, &plan).await?,
    }
    pipeline
        .db
        .transition_video_job(job.id, stage.working(), stage.done())
}

/// Best effort: the original error is what the runner needs to see.
pub(crate) fn mark_failed(pipeline: &Pipeline, job_id: i64, from: VideoJobStatus, cause: &anyhow::Error) {
    if let Err(e) = pipeline
        .db
        .fail_video_job(job_id, from, &format!("{:#}", cause))
    {
        error!("[ORCHESTRATOR] Could not mark job {} failed: {:#}", job_id, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_chain_in_order() {
        assert_eq!(Stage::Composites.next_task(), Some(TaskKind::GenerateClips));
        assert_eq!(Stage::for_task(TaskKind::GenerateClips), Some(Stage::Clips));
        assert_eq!(Stage::Clips.next_task(), Some(TaskKind::AssembleVideo));
        assert_eq!(Stage::Assembly.next_task(), None);
        assert!(Stage::for_task(TaskKind::PlanVideo).is_none());
    }

    #[test]
    fn each_stage_claims_what_the_previous_one_completed() {
        assert!(Stage::Clips.working().can_transition_to(Stage::Clips.working()));
        assert!(Stage::Composites.done().can_transition_to(Stage::Clips.working()));
        assert!(Stage::Clips.done().can_transition_to(Stage::Assembly.working()));
        assert!(Stage::Assembly.working().can_transition_to(Stage::Assembly.done()));
    }

    #[test]
    fn progress_ignores_failed() {
        assert!(progress(VideoJobStatus::Failed).is_none());
        assert!(progress(VideoJobStatus::Completed) > progress(VideoJobStatus::ClipsCompleted));
    }
}

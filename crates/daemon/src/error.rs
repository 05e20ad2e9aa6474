use engine::{AssemblyError, TransitionError, VideoJobStatus};
use thiserror::Error;

/// Typed failures raised by the generation pipeline.
///
/// Service code carries these inside `anyhow::Error`; callers that need to
/// branch on the kind use `downcast_ref::<PipelineError>()`.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("generation failed: {0}")]
    GenerationFailure(String),

    #[error("video job {job_id} changed status concurrently: expected {expected}, found {found}")]
    StatusConflict {
        job_id: i64,
        expected: String,
        found: String,
    },

    #[error("plan is invalid: {}", .0.join("; "))]
    InvalidPlan(Vec<String>),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error(transparent)]
    Assembly(#[from] AssemblyError),
}

impl PipelineError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        PipelineError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn conflict(job_id: i64, expected: VideoJobStatus, found: &str) -> Self {
        PipelineError::StatusConflict {
            job_id,
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }
}

//! Lifecycle state machines for video jobs and planning generations.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("illegal {machine} transition {from} -> {to}")]
    Illegal {
        machine: &'static str,
        from: String,
        to: String,
    },
    #[error("unknown {machine} status {value:?}")]
    UnknownStatus { machine: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoJobStatus {
    Pending,
    GeneratingComposites,
    CompositesCompleted,
    GeneratingClips,
    ClipsCompleted,
    Assembling,
    Completed,
    Failed,
}

impl VideoJobStatus {
    pub const ALL: [VideoJobStatus; 8] = [
        VideoJobStatus::Pending,
        VideoJobStatus::GeneratingComposites,
        VideoJobStatus::CompositesCompleted,
        VideoJobStatus::GeneratingClips,
        VideoJobStatus::ClipsCompleted,
        VideoJobStatus::Assembling,
        VideoJobStatus::Completed,
        VideoJobStatus::Failed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            VideoJobStatus::Pending => "pending",
            VideoJobStatus::GeneratingComposites => "generating_composites",
            VideoJobStatus::CompositesCompleted => "composites_completed",
            VideoJobStatus::GeneratingClips => "generating_clips",
            VideoJobStatus::ClipsCompleted => "clips_completed",
            VideoJobStatus::Assembling => "assembling",
            VideoJobStatus::Completed => "completed",
            VideoJobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        self == VideoJobStatus::Completed
    }

    /// States in which a stage task is doing work.
    pub fn is_working(self) -> bool {
        matches!(
            self,
            VideoJobStatus::GeneratingComposites
                | VideoJobStatus::GeneratingClips
                | VideoJobStatus::Assembling
        )
    }

    /// The transition table.
    ///
    /// Besides the forward chain:
    /// - a working state may be re-entered by a retried run of its own task;
    /// - `failed` may move back into a working state when the task runner
    ///   retries that stage;
    /// - `failed` is reachable from every non-terminal state.
    pub fn can_transition_to(self, next: VideoJobStatus) -> bool {
        use VideoJobStatus::*;
        if next == Failed {
            return !self.is_terminal();
        }
        match (self, next) {
            (Pending, GeneratingComposites)
            | (GeneratingComposites, CompositesCompleted)
            | (CompositesCompleted, GeneratingClips)
            | (GeneratingClips, ClipsCompleted)
            | (ClipsCompleted, Assembling)
            | (Assembling, Completed) => true,
            (a, b) if a == b && a.is_working() => true,
            (Failed, b) => b.is_working(),
            _ => false,
        }
    }

    pub fn transition(self, next: VideoJobStatus) -> Result<VideoJobStatus, TransitionError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(TransitionError::Illegal {
                machine: "video job",
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }

    /// States a stage may be claimed from when it starts `working`.
    pub fn claimable_from(working: VideoJobStatus) -> Vec<VideoJobStatus> {
        Self::ALL
            .into_iter()
            .filter(|s| s.can_transition_to(working))
            .collect()
    }
}

impl fmt::Display for VideoJobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VideoJobStatus {
    type Err = TransitionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| TransitionError::UnknownStatus {
                machine: "video job",
                value: s.to_string(),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl GenerationStatus {
    pub const ALL: [GenerationStatus; 4] = [
        GenerationStatus::Pending,
        GenerationStatus::Processing,
        GenerationStatus::Completed,
        GenerationStatus::Failed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            GenerationStatus::Pending => "pending",
            GenerationStatus::Processing => "processing",
            GenerationStatus::Completed => "completed",
            GenerationStatus::Failed => "failed",
        }
    }

    pub fn can_transition_to(self, next: GenerationStatus) -> bool {
        use GenerationStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Processing, Processing)
                | (Failed, Processing)
                | (Processing, Completed)
                | (Pending, Failed)
                | (Processing, Failed)
        )
    }

    pub fn transition(self, next: GenerationStatus) -> Result<GenerationStatus, TransitionError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(TransitionError::Illegal {
                machine: "generation",
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }
}

impl fmt::Display for GenerationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GenerationStatus {
    type Err = TransitionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| TransitionError::UnknownStatus {
                machine: "generation",
                value: s.to_string(),
            })
    }
}

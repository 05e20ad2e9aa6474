//! Plan schema, validation, lifecycle state machines and assembly planning
//! for generated marketing videos. Pure and synchronous; all I/O lives in the
//! daemon.

pub mod assembly;
pub mod normalize;
pub mod plan;
pub mod render;
pub mod schema;
pub mod state;
pub mod validator;

pub use assembly::{compile_assembly, AssemblyError, AssemblyTimeline, AvailableSources, SourceKey, SourceKind};
pub use plan::*;
pub use state::{GenerationStatus, TransitionError, VideoJobStatus};
pub use validator::{validate, validate_plan_json, ValidatedPlan, ValidationReport};

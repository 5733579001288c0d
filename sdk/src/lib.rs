//! Montage SDK
//!
//! Shared library providing the pipeline tool trait, run request types and
//! error types. This crate is used by the engine and by stage implementations.

/// Pipeline tool trait
pub mod pipeline_tool;

/// Error types and handling
pub mod errors;

/// Run request and tool types
pub mod types;

// Re-export commonly used types
pub use errors::{EngineError, EngineErrorExt};
pub use pipeline_tool::PipelineTool;
pub use types::{
    CreativeBrief, GenerationTuning, QualityWeights, RunMode, RunRequest, ToolKind,
};

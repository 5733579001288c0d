//! Pipeline tool trait
//!
//! Every processing stage the engine drives implements `PipelineTool`. The
//! engine only calls `execute` and later inspects the files the stage left
//! behind; it never interprets what a stage does.

use async_trait::async_trait;

use crate::errors::EngineError;
use crate::types::RunRequest;

/// Trait that all pipeline stages must implement
#[async_trait]
pub trait PipelineTool: Send + Sync {
    /// Returns the registry name of the tool
    fn name(&self) -> &str;

    /// Run the stage for the given request.
    ///
    /// Success is signalled by returning `Ok(())`; produced files are
    /// discovered on disk by the evaluator. Timeouts are the responsibility
    /// of the implementation.
    async fn execute(&self, request: &RunRequest) -> Result<(), EngineError>;
}

pub mod external;

pub use external::ExternalTool;

use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::config::Config;
use sdk::{EngineError, PipelineTool, ToolKind};

/// Registry of pipeline tools dispatched by the orchestrator.
///
/// Maps tool names to implementations. Lookups of unregistered names fail
/// with `EngineError::ToolNotFound`.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn PipelineTool>>,
}

impl ToolRegistry {
    /// Create an empty registry with no tools registered.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Register one `ExternalTool` for every configured `[tools.<name>]` section.
    pub fn from_config(config: &Config) -> Self {
        let mut registry = Self::empty();
        for kind in ToolKind::ALL {
            if let Some(tool) = config.tool(kind) {
                registry.register(Arc::new(ExternalTool::from_config(kind, tool)));
            }
        }
        registry
    }

    /// Register a tool under its own name, replacing any previous entry.
    pub fn register(&mut self, tool: Arc<dyn PipelineTool>) {
        let name = tool.name().to_string();
        debug!("Registering tool '{}'", name);
        self.tools.insert(name, tool);
    }

    /// Resolve a tool by name.
    pub fn get(&self, name: &str) -> Result<Arc<dyn PipelineTool>, EngineError> {
        self.tools
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::ToolNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Whitelisted tools without an implementation
    pub fn missing(&self) -> Vec<ToolKind> {
        ToolKind::ALL
            .into_iter()
            .filter(|kind| !self.contains(kind.as_str()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

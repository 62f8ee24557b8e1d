use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use flowgraph_core::error::{FlowError, Result};
use flowgraph_core::traits::{Tool, ToolContext};
use flowgraph_core::types::{ToolDefinition, ToolResult};

use crate::validation::validate_arguments;

/// Validate `input` against the tool's advertised schema, then execute it
/// under the tool's timeout.
///
/// Arguments that fail validation never reach the tool.
pub async fn invoke(
    tool: &dyn Tool,
    input: serde_json::Value,
    ctx: ToolContext<'_>,
) -> Result<ToolResult> {
    let input = if input.is_null() {
        serde_json::json!({})
    } else {
        input
    };

    validate_arguments(&input, &tool.input_schema()).map_err(|message| {
        FlowError::ToolValidation {
            tool: tool.name().to_string(),
            message,
        }
    })?;

    debug!(tool = tool.name(), node = ctx.node, "Invoking tool");
    let timeout = Duration::from_secs(tool.timeout_secs());

    match tokio::time::timeout(timeout, tool.execute(input, ctx)).await {
        Ok(result) => result,
        Err(_) => Err(FlowError::ToolTimeout {
            tool: tool.name().to_string(),
            timeout_secs: tool.timeout_secs(),
        }),
    }
}

/// Registry of available tools.
#[derive(Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    /// Registration order, so definitions are stable across calls.
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Register a tool.
    pub fn register(&mut self, tool: impl Tool) {
        self.register_arc(Arc::new(tool));
    }

    /// Register a shared tool. A tool with the same name is replaced.
    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_none() {
            self.order.push(name);
        }
    }

    /// Unregister a tool by name.
    pub fn unregister(&mut self, name: &str) -> bool {
        self.order.retain(|n| n != name);
        self.tools.remove(name).is_some()
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// List all registered tools.
    pub fn list(&self) -> Vec<&str> {
        self.order.iter().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Get tool definitions for sending to the LLM.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|t| t.definition())
            .collect()
    }

    /// Execute a tool by name.
    pub async fn execute(
        &self,
        name: &str,
        input: serde_json::Value,
        ctx: ToolContext<'_>,
    ) -> Result<ToolResult> {
        let tool = self
            .get(name)
            .ok_or_else(|| FlowError::ToolNotFound(name.to_string()))?;
        invoke(tool.as_ref(), input, ctx).await
    }

    /// Registry holding the built-in plan tools.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(crate::builtin::plan::MarkStepDoneTool::default());
        registry.register(crate::builtin::plan::PlanStatusTool);
        registry
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.order)
            .finish()
    }
}

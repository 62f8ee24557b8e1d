use futures::future::BoxFuture;

use crate::error::Result;
use crate::memory::Memory;
use crate::types::*;

/// LLM capability: given a conversation, return a completion.
///
/// Provider clients live outside this workspace; anything that can turn a
/// [`CompletionRequest`] into a [`Completion`] can drive agents and routers.
pub trait LlmClient: Send + Sync + 'static {
    fn generate(&self, request: CompletionRequest) -> BoxFuture<'_, Result<Completion>>;
}

/// Context passed to tools during execution.
///
/// Tools run inside a graph run and may read the shared [`Memory`]. The plan
/// tools are the only built-ins that mutate it.
pub struct ToolContext<'a> {
    /// Name of the node invoking the tool.
    pub node: &'a str,
    pub memory: &'a mut Memory,
}

impl<'a> ToolContext<'a> {
    pub fn new(node: &'a str, memory: &'a mut Memory) -> Self {
        Self { node, memory }
    }

    /// Reborrow for a nested call.
    pub fn reborrow(&mut self) -> ToolContext<'_> {
        ToolContext {
            node: self.node,
            memory: self.memory,
        }
    }
}

impl std::fmt::Debug for ToolContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolContext")
            .field("node", &self.node)
            .field("memory_len", &self.memory.len())
            .finish()
    }
}

/// Tool: a named, schema-described callable.
pub trait Tool: Send + Sync + 'static {
    /// Tool name (used in LLM tool calls).
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str;

    /// JSON Schema for tool input.
    fn input_schema(&self) -> serde_json::Value;

    /// Execute the tool with validated input.
    fn execute<'a>(
        &'a self,
        input: serde_json::Value,
        ctx: ToolContext<'a>,
    ) -> BoxFuture<'a, Result<ToolResult>>;

    /// Timeout in seconds for this tool.
    fn timeout_secs(&self) -> u64 {
        30
    }

    /// How an agent treats failures of this tool.
    fn error_policy(&self) -> ToolErrorPolicy {
        ToolErrorPolicy::Observe
    }

    /// Definition advertised to the model.
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::info;

use flowgraph_core::error::Result;
use flowgraph_core::event::EventBus;
use flowgraph_core::memory::{Entry, Memory};
use flowgraph_core::traits::{Tool, ToolContext};
use flowgraph_core::types::extract_json;
use flowgraph_tools::invoke;

use crate::agent::Agent;

/// A node in the execution graph.
#[derive(Debug, Clone)]
pub enum Node {
    Agent(Agent),
    Tool(ToolNode),
}

impl Node {
    pub fn name(&self) -> &str {
        match self {
            Self::Agent(agent) => agent.name(),
            Self::Tool(tool) => &tool.name,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Agent(_) => "agent",
            Self::Tool(_) => "tool",
        }
    }

    /// Execute the node. It appends its own output entry to `memory`.
    pub async fn execute(&self, memory: &mut Memory, events: &EventBus) -> Result<String> {
        match self {
            Self::Agent(agent) => agent.execute(memory, events).await,
            Self::Tool(tool) => tool.execute(memory).await,
        }
    }
}

impl From<Agent> for Node {
    fn from(agent: Agent) -> Self {
        Self::Agent(agent)
    }
}

impl From<ToolNode> for Node {
    fn from(tool: ToolNode) -> Self {
        Self::Tool(tool)
    }
}

/// Where a tool node gets its arguments.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ToolArgs {
    /// Parse the latest output as a JSON object. Plain text is passed as the
    /// tool's only parameter.
    #[default]
    LastOutput,
    /// The same arguments on every call.
    Fixed(Value),
}

/// A tool invoked directly as a graph step.
#[derive(Clone)]
pub struct ToolNode {
    name: String,
    tool: Arc<dyn Tool>,
    args: ToolArgs,
}

impl ToolNode {
    /// Node named after the tool.
    pub fn new(tool: Arc<dyn Tool>) -> Self {
        Self {
            name: tool.name().to_string(),
            tool,
            args: ToolArgs::LastOutput,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_args(mut self, args: ToolArgs) -> Self {
        self.args = args;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tool(&self) -> &Arc<dyn Tool> {
        &self.tool
    }

    fn arguments(&self, memory: &Memory) -> Value {
        let text = match &self.args {
            ToolArgs::Fixed(value) => return value.clone(),
            ToolArgs::LastOutput => memory
                .last_output()
                .or_else(|| memory.last())
                .map(|e| e.content.as_str())
                .unwrap_or_default(),
        };

        if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(extract_json(text)) {
            return value;
        }

        let schema = self.tool.input_schema();
        let key = schema["properties"]
            .as_object()
            .filter(|props| props.len() == 1)
            .and_then(|props| props.keys().next().cloned())
            .unwrap_or_else(|| "input".to_string());
        let mut args = Map::new();
        args.insert(key, Value::String(text.to_string()));
        Value::Object(args)
    }

    async fn execute(&self, memory: &mut Memory) -> Result<String> {
        let args = self.arguments(memory);
        info!(node = %self.name, tool = %self.tool.name(), "Running tool node");
        let result = invoke(self.tool.as_ref(), args, ToolContext::new(&self.name, memory)).await?;
        memory.push(Entry::tool_output(
            &self.name,
            self.tool.name(),
            &result.content,
            result.is_error,
        ));
        Ok(result.content)
    }
}

impl std::fmt::Debug for ToolNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolNode")
            .field("name", &self.name)
            .field("tool", &self.tool.name())
            .field("args", &self.args)
            .finish()
    }
}

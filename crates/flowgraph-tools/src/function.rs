//! Closure-based tools.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;

use flowgraph_core::error::Result;
use flowgraph_core::traits::{Tool, ToolContext};
use flowgraph_core::types::{ToolErrorPolicy, ToolResult};

type Handler = dyn Fn(serde_json::Value) -> BoxFuture<'static, Result<ToolResult>> + Send + Sync;

/// A tool backed by an async closure over its JSON arguments.
#[derive(Clone)]
pub struct FunctionTool {
    name: String,
    description: String,
    schema: serde_json::Value,
    timeout_secs: u64,
    error_policy: ToolErrorPolicy,
    handler: Arc<Handler>,
}

impl FunctionTool {
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        schema: serde_json::Value,
        handler: F,
    ) -> Self
    where
        F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolResult>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            schema,
            timeout_secs: 30,
            error_policy: ToolErrorPolicy::Observe,
            handler: Arc::new(move |input| Box::pin(handler(input))),
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn with_error_policy(mut self, policy: ToolErrorPolicy) -> Self {
        self.error_policy = policy;
        self
    }
}

impl Tool for FunctionTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn input_schema(&self) -> serde_json::Value {
        self.schema.clone()
    }

    fn execute<'a>(
        &'a self,
        input: serde_json::Value,
        _ctx: ToolContext<'a>,
    ) -> BoxFuture<'a, Result<ToolResult>> {
        (self.handler)(input)
    }

    fn timeout_secs(&self) -> u64 {
        self.timeout_secs
    }

    fn error_policy(&self) -> ToolErrorPolicy {
        self.error_policy
    }
}

impl std::fmt::Debug for FunctionTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionTool")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowgraph_core::error::FlowError;
    use flowgraph_core::memory::Memory;
    use serde_json::json;

    use crate::registry::invoke;

    #[tokio::test]
    async fn test_closure_receives_arguments() {
        let tool = FunctionTool::new(
            "shout",
            "Uppercase text",
            json!({"type": "object", "properties": {"text": {"type": "string"}}, "required": ["text"]}),
            |input| async move {
                let text = input["text"].as_str().unwrap_or_default().to_uppercase();
                Ok(ToolResult::success(text))
            },
        );
        let mut memory = Memory::new();
        let result = invoke(&tool, json!({"text": "hi"}), ToolContext::new("n", &mut memory))
            .await
            .unwrap();
        assert_eq!(result.content, "HI");
        assert_eq!(tool.error_policy(), ToolErrorPolicy::Observe);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout() {
        let tool = FunctionTool::new("slow", "Sleeps", json!({"type": "object"}), |_| async {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            Ok(ToolResult::success("late"))
        })
        .with_timeout(1);
        let mut memory = Memory::new();
        let err = invoke(&tool, json!({}), ToolContext::new("n", &mut memory))
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::ToolTimeout { timeout_secs: 1, .. }));
    }
}

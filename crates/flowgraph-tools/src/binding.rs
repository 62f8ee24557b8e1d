//! Partially applied tools.
//!
//! A [`BoundTool`] fixes some of a tool's arguments up front. The model only
//! sees the remaining parameters, and any value it supplies for a bound key
//! is discarded before the call.

use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::{Map, Value};
use tracing::debug;

use flowgraph_core::error::{FlowError, Result};
use flowgraph_core::traits::{Tool, ToolContext};
use flowgraph_core::types::{ToolErrorPolicy, ToolResult};

use crate::validation::validate_arguments;

#[derive(Clone)]
pub struct BoundTool {
    inner: Arc<dyn Tool>,
    bound: Map<String, Value>,
    name: Option<String>,
    error_policy: Option<ToolErrorPolicy>,
}

impl BoundTool {
    pub fn new(inner: Arc<dyn Tool>, bound: Map<String, Value>) -> Self {
        Self {
            inner,
            bound,
            name: None,
            error_policy: None,
        }
    }

    /// Bind a single argument.
    pub fn bind(mut self, key: impl Into<String>, value: Value) -> Self {
        self.bound.insert(key.into(), value);
        self
    }

    /// Expose the bound tool under a different name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_error_policy(mut self, policy: ToolErrorPolicy) -> Self {
        self.error_policy = Some(policy);
        self
    }

    pub fn bound(&self) -> &Map<String, Value> {
        &self.bound
    }

    pub fn inner(&self) -> &Arc<dyn Tool> {
        &self.inner
    }
}

impl Tool for BoundTool {
    fn name(&self) -> &str {
        self.name.as_deref().unwrap_or_else(|| self.inner.name())
    }

    fn description(&self) -> &str {
        self.inner.description()
    }

    /// The inner schema minus every bound key.
    fn input_schema(&self) -> Value {
        let mut schema = self.inner.input_schema();
        if let Some(props) = schema.get_mut("properties").and_then(|p| p.as_object_mut()) {
            props.retain(|k, _| !self.bound.contains_key(k));
        }
        if let Some(required) = schema.get_mut("required").and_then(|r| r.as_array_mut()) {
            required.retain(|r| r.as_str().map_or(true, |k| !self.bound.contains_key(k)));
        }
        schema
    }

    fn execute<'a>(
        &'a self,
        input: Value,
        ctx: ToolContext<'a>,
    ) -> BoxFuture<'a, Result<ToolResult>> {
        Box::pin(async move {
            let mut args = match input {
                Value::Object(map) => map,
                Value::Null => Map::new(),
                other => {
                    return Err(FlowError::ToolValidation {
                        tool: self.name().to_string(),
                        message: format!("expected object arguments, got {}", other),
                    })
                }
            };

            for key in self.bound.keys() {
                if args.remove(key).is_some() {
                    debug!(tool = self.name(), key = %key, "Discarding argument for bound key");
                }
            }
            for (key, value) in &self.bound {
                args.insert(key.clone(), value.clone());
            }

            let merged = Value::Object(args);
            validate_arguments(&merged, &self.inner.input_schema()).map_err(|message| {
                FlowError::ToolValidation {
                    tool: self.name().to_string(),
                    message,
                }
            })?;
            self.inner.execute(merged, ctx).await
        })
    }

    fn timeout_secs(&self) -> u64 {
        self.inner.timeout_secs()
    }

    fn error_policy(&self) -> ToolErrorPolicy {
        self.error_policy
            .unwrap_or_else(|| self.inner.error_policy())
    }
}

impl std::fmt::Debug for BoundTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundTool")
            .field("inner", &self.inner.name())
            .field("name", &self.name())
            .field("bound", &self.bound)
            .finish()
    }
}

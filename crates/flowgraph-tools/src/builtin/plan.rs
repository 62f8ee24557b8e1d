use futures::future::BoxFuture;
use serde_json::json;

use flowgraph_core::error::{FlowError, Result};
use flowgraph_core::traits::{Tool, ToolContext};
use flowgraph_core::types::ToolResult;

/// Marks a step of the run's execution plan as done.
#[derive(Debug, Clone, Default)]
pub struct MarkStepDoneTool {
    /// Only the step's owner may complete it.
    owner_only: bool,
}

impl MarkStepDoneTool {
    pub fn owner_only() -> Self {
        Self { owner_only: true }
    }
}

fn exec_err(tool: &str, message: impl Into<String>) -> FlowError {
    FlowError::ToolExecution {
        tool: tool.into(),
        message: message.into(),
    }
}

impl Tool for MarkStepDoneTool {
    fn name(&self) -> &str {
        "mark_step_done"
    }

    fn description(&self) -> &str {
        "Mark a step of the current plan as done once its work is finished. \
         Steps can only be completed after the steps they depend on."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "step_id": {
                    "type": "string",
                    "description": "Id of the finished step"
                }
            },
            "required": ["step_id"]
        })
    }

    fn execute<'a>(
        &'a self,
        input: serde_json::Value,
        ctx: ToolContext<'a>,
    ) -> BoxFuture<'a, Result<ToolResult>> {
        Box::pin(async move {
            let step_id = input["step_id"].as_str().ok_or_else(|| FlowError::ToolValidation {
                tool: self.name().into(),
                message: "'step_id' must be a string".into(),
            })?;

            let ToolContext { node, memory } = ctx;
            let plan = memory
                .plan_mut()
                .ok_or_else(|| exec_err(self.name(), "no plan has been made yet"))?;

            if self.owner_only {
                let step = plan
                    .step(step_id)
                    .ok_or_else(|| exec_err(self.name(), format!("unknown step '{}'", step_id)))?;
                if step.owner_agent != node {
                    return Err(exec_err(
                        self.name(),
                        format!(
                            "step '{}' belongs to '{}', not '{}'",
                            step_id, step.owner_agent, node
                        ),
                    ));
                }
            }

            plan.mark_done(step_id)
                .map_err(|e| exec_err(self.name(), e.to_string()))?;
            let (done, total) = plan.progress();
            tracing::info!(step = step_id, node, done, total, "Plan step done");

            Ok(ToolResult::success(format!(
                "Step '{}' marked done ({}/{} steps done)",
                step_id, done, total
            )))
        })
    }
}

/// Reports the run's execution plan as a checklist.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlanStatusTool;

impl Tool for PlanStatusTool {
    fn name(&self) -> &str {
        "plan_status"
    }

    fn description(&self) -> &str {
        "Show the current plan with each step's owner, dependencies, and completion state."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({ "type": "object", "properties": {} })
    }

    fn execute<'a>(
        &'a self,
        _input: serde_json::Value,
        ctx: ToolContext<'a>,
    ) -> BoxFuture<'a, Result<ToolResult>> {
        Box::pin(async move {
            match ctx.memory.plan() {
                Some(plan) => Ok(ToolResult::success(plan.summary())),
                None => Ok(ToolResult::success("No plan has been made yet.")),
            }
        })
    }
}

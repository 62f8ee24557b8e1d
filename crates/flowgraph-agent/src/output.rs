use serde::{Deserialize, Serialize};
use serde_json::json;

use flowgraph_core::plan::ExecutionPlan;
use flowgraph_core::types::extract_json;
use flowgraph_tools::validate_arguments;

/// Structure an agent's final answer must have.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputConstraint {
    /// Free text.
    #[default]
    None,
    /// A JSON value satisfying `schema`.
    Json { schema: serde_json::Value },
    /// An [`ExecutionPlan`]; accepted plans are installed in the run's memory.
    Plan,
}

/// An answer that passed its constraint.
#[derive(Debug, Clone)]
pub struct Accepted {
    /// Text recorded as the node's output.
    pub text: String,
    pub plan: Option<ExecutionPlan>,
}

impl OutputConstraint {
    /// Check an answer. On failure returns a description of the issue
    /// suitable for feeding back to the model.
    pub fn check(&self, answer: &str) -> Result<Accepted, String> {
        match self {
            Self::None => {
                if answer.trim().is_empty() {
                    return Err("the answer is empty".into());
                }
                Ok(Accepted {
                    text: answer.trim().to_string(),
                    plan: None,
                })
            }
            Self::Json { schema } => {
                let raw = extract_json(answer);
                let value: serde_json::Value = serde_json::from_str(raw)
                    .map_err(|e| format!("the answer is not valid JSON: {}", e))?;
                validate_arguments(&value, schema)?;
                Ok(Accepted {
                    text: raw.to_string(),
                    plan: None,
                })
            }
            Self::Plan => {
                let plan = ExecutionPlan::parse(answer).map_err(|e| e.to_string())?;
                Ok(Accepted {
                    text: extract_json(answer).to_string(),
                    plan: Some(plan),
                })
            }
        }
    }

    /// JSON schema passed to the provider alongside the request.
    pub fn schema(&self) -> Option<serde_json::Value> {
        match self {
            Self::None => None,
            Self::Json { schema } => Some(schema.clone()),
            Self::Plan => Some(plan_schema()),
        }
    }

    /// Formatting instructions appended to the system prompt.
    pub fn instructions(&self) -> Option<String> {
        match self {
            Self::None => None,
            Self::Json { schema } => Some(format!(
                "Respond with a single JSON value that matches this schema:\n{}",
                schema
            )),
            Self::Plan => Some(format!(
                "Respond with an execution plan as JSON matching this schema:\n{}\n\
                 Every step names the agent that owns it in `owner_agent` and \
                 lists the ids of the steps it depends on in `depends_on`.",
                plan_schema()
            )),
        }
    }
}

fn plan_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "title": {"type": "string"},
            "description": {"type": "string"},
            "steps": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "id": {"type": "string"},
                        "description": {"type": "string"},
                        "owner_agent": {"type": "string"},
                        "depends_on": {"type": "array", "items": {"type": "string"}}
                    },
                    "required": ["id", "description", "owner_agent"]
                }
            }
        },
        "required": ["title", "steps"]
    })
}

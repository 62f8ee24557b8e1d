use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{FlowError, Result};
use crate::types::extract_json;

/// A dependency-ordered plan produced by a planner agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionPlan {
    /// Short title of the plan.
    pub title: String,
    /// What the plan achieves.
    #[serde(default)]
    pub description: String,
    /// Steps in the order the planner listed them.
    pub steps: Vec<Step>,
}

/// A single unit of planned work, owned by one agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Step {
    pub id: String,
    pub description: String,
    /// Name of the agent node that carries out this step.
    #[serde(alias = "agent", alias = "owner")]
    pub owner_agent: String,
    /// Ids of steps that must be done first.
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub done: bool,
}

impl Step {
    pub fn new(
        id: impl Into<String>,
        description: impl Into<String>,
        owner_agent: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            owner_agent: owner_agent.into(),
            depends_on: vec![],
            done: false,
        }
    }

    pub fn depends_on(mut self, ids: &[&str]) -> Self {
        self.depends_on = ids.iter().map(|s| s.to_string()).collect();
        self
    }
}

impl ExecutionPlan {
    /// Parse a plan from an agent's output. The JSON may be wrapped in prose
    /// or a code fence.
    pub fn parse(text: &str) -> Result<Self> {
        let json = extract_json(text);
        let mut plan: ExecutionPlan = serde_json::from_str(json)
            .map_err(|e| FlowError::Plan(format!("output is not a valid plan: {}", e)))?;
        for step in &mut plan.steps {
            let mut seen = HashSet::new();
            step.depends_on.retain(|d| seen.insert(d.clone()));
        }
        plan.validate()?;
        Ok(plan)
    }

    /// Check ids are unique, dependencies resolve, and there is no cycle.
    pub fn validate(&self) -> Result<()> {
        if self.steps.is_empty() {
            return Err(FlowError::Plan("plan has no steps".into()));
        }

        let mut ids = HashSet::new();
        for step in &self.steps {
            if step.id.trim().is_empty() {
                return Err(FlowError::Plan("step with empty id".into()));
            }
            if step.owner_agent.trim().is_empty() {
                return Err(FlowError::Plan(format!("step '{}' has no owner", step.id)));
            }
            if !ids.insert(step.id.as_str()) {
                return Err(FlowError::Plan(format!("duplicate step id '{}'", step.id)));
            }
        }

        for step in &self.steps {
            for dep in &step.depends_on {
                if dep == &step.id {
                    return Err(FlowError::Plan(format!(
                        "step '{}' depends on itself",
                        step.id
                    )));
                }
                if !ids.contains(dep.as_str()) {
                    return Err(FlowError::Plan(format!(
                        "step '{}' depends on unknown step '{}'",
                        step.id, dep
                    )));
                }
            }
        }

        if let Some(id) = self.find_cycle() {
            return Err(FlowError::Plan(format!(
                "dependency cycle through step '{}'",
                id
            )));
        }
        Ok(())
    }

    fn find_cycle(&self) -> Option<&str> {
        // Kahn's algorithm: whatever cannot be scheduled sits on a cycle.
        let mut indegree: HashMap<&str, usize> = self
            .steps
            .iter()
            .map(|s| {
                let unique: HashSet<&String> = s.depends_on.iter().collect();
                (s.id.as_str(), unique.len())
            })
            .collect();
        let mut ready: Vec<&str> = indegree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut scheduled = 0;

        while let Some(id) = ready.pop() {
            scheduled += 1;
            for step in &self.steps {
                if step.depends_on.iter().any(|d| d == id) {
                    if let Some(d) = indegree.get_mut(step.id.as_str()) {
                        *d -= 1;
                        if *d == 0 {
                            ready.push(step.id.as_str());
                        }
                    }
                }
            }
        }

        if scheduled == self.steps.len() {
            return None;
        }
        self.steps
            .iter()
            .find(|s| indegree.get(s.id.as_str()).copied().unwrap_or(0) > 0)
            .map(|s| s.id.as_str())
    }

    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Whether every dependency of `step` is done.
    pub fn is_ready(&self, step: &Step) -> bool {
        step.depends_on
            .iter()
            .all(|dep| self.step(dep).is_some_and(|d| d.done))
    }

    /// First step, in plan order, that is not done and whose dependencies are.
    pub fn next_ready(&self) -> Option<&Step> {
        self.steps.iter().find(|s| !s.done && self.is_ready(s))
    }

    pub fn is_complete(&self) -> bool {
        self.steps.iter().all(|s| s.done)
    }

    /// (done, total)
    pub fn progress(&self) -> (usize, usize) {
        let done = self.steps.iter().filter(|s| s.done).count();
        (done, self.steps.len())
    }

    /// Mark a step done. Fails for unknown steps and for steps whose
    /// dependencies are still open. Marking a done step again is a no-op.
    pub fn mark_done(&mut self, id: &str) -> Result<&Step> {
        let index = self
            .steps
            .iter()
            .position(|s| s.id == id)
            .ok_or_else(|| FlowError::Plan(format!("unknown step '{}'", id)))?;

        let open: Vec<&str> = self.steps[index]
            .depends_on
            .iter()
            .filter(|dep| !self.step(dep).is_some_and(|d| d.done))
            .map(|s| s.as_str())
            .collect();
        if !open.is_empty() {
            return Err(FlowError::Plan(format!(
                "step '{}' depends on unfinished steps: {}",
                id,
                open.join(", ")
            )));
        }

        self.steps[index].done = true;
        Ok(&self.steps[index])
    }

    /// Human-readable checklist for prompts and status tools.
    pub fn summary(&self) -> String {
        let (done, total) = self.progress();
        let mut out = format!("Plan: {} ({}/{} done)\n", self.title, done, total);
        for step in &self.steps {
            let mark = if step.done { "x" } else { " " };
            out.push_str(&format!(
                "- [{}] {} ({}): {}",
                mark, step.id, step.owner_agent, step.description
            ));
            if !step.depends_on.is_empty() {
                out.push_str(&format!(" [after {}]", step.depends_on.join(", ")));
            }
            out.push('\n');
        }
        out
    }
}

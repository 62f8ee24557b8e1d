use flowgraph_core::error::{FlowError, Result};
use flowgraph_core::memory::Memory;
use flowgraph_core::END;

use super::RouteDecision;

/// Coordinates a planner, the step owners, and a reviewer.
///
/// Progress lives in the plan carried by memory. Steps are only completed
/// through the `mark_step_done` tool; this router never touches the plan.
#[derive(Debug, Clone)]
pub struct PlanExecuteRouter {
    name: String,
    planner: String,
    reviewer: String,
}

impl PlanExecuteRouter {
    pub fn new(
        name: impl Into<String>,
        planner: impl Into<String>,
        reviewer: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            planner: planner.into(),
            reviewer: reviewer.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn planner(&self) -> &str {
        &self.planner
    }

    pub fn reviewer(&self) -> &str {
        &self.reviewer
    }

    pub fn decide(&self, memory: &Memory) -> Result<RouteDecision> {
        let Some(plan) = memory.plan() else {
            return Ok(RouteDecision::new(&self.planner).with_reason("no plan yet"));
        };

        if let Some(step) = plan.next_ready() {
            return Ok(RouteDecision::new(&step.owner_agent)
                .with_reason(format!("step '{}' is ready", step.id)));
        }

        if !plan.is_complete() {
            let open: Vec<&str> = plan
                .steps
                .iter()
                .filter(|s| !s.done)
                .map(|s| s.id.as_str())
                .collect();
            return Err(FlowError::Plan(format!(
                "no step is ready but steps remain: {}",
                open.join(", ")
            )));
        }

        let reviewed = memory
            .last_output()
            .is_some_and(|e| e.node() == Some(self.reviewer.as_str()));
        if reviewed {
            Ok(RouteDecision::new(END).with_reason("plan complete and reviewed"))
        } else {
            Ok(RouteDecision::new(&self.reviewer).with_reason("all steps done"))
        }
    }

    pub fn targets_from(&self, from: &str) -> Vec<String> {
        plan_execute_targets(&self.reviewer, from)
    }
}

/// Targets a plan-execute edge must declare: the reviewer on every edge but
/// the reviewer's own, and `end` on the reviewer's edge. Step owners depend
/// on the plan and are checked when the run routes to them.
pub fn plan_execute_targets(reviewer: &str, from: &str) -> Vec<String> {
    if from == reviewer {
        vec![END.to_string()]
    } else {
        vec![reviewer.to_string()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowgraph_core::memory::Entry;
    use flowgraph_core::plan::{ExecutionPlan, Step};

    fn router() -> PlanExecuteRouter {
        PlanExecuteRouter::new("coordinator", "planner", "reviewer")
    }

    fn plan() -> ExecutionPlan {
        ExecutionPlan {
            title: "Report".into(),
            description: String::new(),
            steps: vec![
                Step::new("s1", "research", "researcher"),
                Step::new("s2", "write", "writer").depends_on(&["s1"]),
            ],
        }
    }

    #[test]
    fn test_planner_first() {
        let decision = router().decide(&Memory::with_input("report please")).unwrap();
        assert_eq!(decision.target, "planner");
    }

    #[test]
    fn test_dependency_order_then_review() {
        let router = router();
        let mut memory = Memory::with_input("report please");
        memory.set_plan(plan()).unwrap();
        memory.push(Entry::output("planner", "{plan}"));
        assert_eq!(router.decide(&memory).unwrap().target, "researcher");

        // s2 cannot be completed ahead of s1.
        assert!(memory.plan_mut().unwrap().mark_done("s2").is_err());
        assert_eq!(router.decide(&memory).unwrap().target, "researcher");

        memory.plan_mut().unwrap().mark_done("s1").unwrap();
        assert_eq!(router.decide(&memory).unwrap().target, "writer");

        memory.plan_mut().unwrap().mark_done("s2").unwrap();
        memory.push(Entry::output("writer", "draft"));
        assert_eq!(router.decide(&memory).unwrap().target, "reviewer");

        memory.push(Entry::output("reviewer", "looks good"));
        assert_eq!(router.decide(&memory).unwrap().target, END);
    }

    #[test]
    fn test_blocked_plan_is_an_error() {
        // Installed without validation, so the cycle survives.
        let mut blocked = plan();
        blocked.steps[0].depends_on = vec!["s2".into()];
        let mut memory = Memory::new();
        memory.set_plan(blocked).unwrap();

        let err = router().decide(&memory).unwrap_err();
        assert!(err.to_string().contains("no step is ready"));
    }

    #[test]
    fn test_targets_from() {
        assert_eq!(router().targets_from("researcher"), vec!["reviewer"]);
        assert_eq!(router().targets_from("reviewer"), vec![END]);
    }
}

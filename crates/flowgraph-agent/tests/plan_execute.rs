use serde_json::json;

use flowgraph_agent::{
    Agent, Edge, GraphBuilder, OutputConstraint, PlanExecuteRouter, ReasoningPattern, Runner,
};
use flowgraph_core::error::FlowError;
use flowgraph_core::memory::EntryKind;
use flowgraph_core::END;
use flowgraph_test_utils::ScriptedLlm;
use flowgraph_tools::{MarkStepDoneTool, ToolRegistry};

const PLAN: &str = r#"Here is the plan:
```json
{
  "title": "Market report",
  "steps": [
    {"id": "s1", "description": "Collect figures", "owner_agent": "researcher"},
    {"id": "s2", "description": "Write the report", "owner_agent": "writer", "depends_on": ["s1"]}
  ]
}
```"#;

fn plan_tools() -> ToolRegistry {
    let mut tools = ToolRegistry::new();
    tools.register(MarkStepDoneTool::default());
    tools
}

fn worker(name: &str, llm: ScriptedLlm) -> Agent {
    Agent::new(name, llm.into_arc())
        .with_pattern(ReasoningPattern::React)
        .with_tools(plan_tools())
}

fn graph(researcher: ScriptedLlm, writer: ScriptedLlm) -> GraphBuilder {
    let router = PlanExecuteRouter::new("coordinator", "planner", "reviewer");
    let workers = ["researcher", "writer", "reviewer"];

    GraphBuilder::new("plan_execute")
        .add_agent(
            Agent::new("planner", ScriptedLlm::texts([PLAN]).into_arc())
                .with_output(OutputConstraint::Plan),
        )
        .add_agent(worker("researcher", researcher))
        .add_agent(worker("writer", writer))
        .add_agent(Agent::new(
            "reviewer",
            ScriptedLlm::new().repeating("Looks good.").into_arc(),
        ))
        .add_edge(Edge::routed("planner", workers, router.clone()))
        .add_edge(Edge::routed("researcher", workers, router.clone()))
        .add_edge(Edge::routed("writer", workers, router.clone()))
        .add_edge(Edge::routed("reviewer", [END], router))
        .start("planner")
        .end(END)
}

#[tokio::test]
async fn test_plan_then_execute_in_dependency_order() {
    let researcher = ScriptedLlm::new()
        // s2 depends on s1, so completing it first is refused.
        .then_call("mark_step_done", json!({"step_id": "s2"}))
        .then_call("mark_step_done", json!({"step_id": "s1"}))
        .then_text("Figures collected.");
    let writer = ScriptedLlm::new()
        .then_call("mark_step_done", json!({"step_id": "s2"}))
        .then_text("Report written.");

    let graph = graph(researcher, writer).compile().unwrap();
    let (result, memory) = Runner::new(graph).invoke("Write a market report").await.unwrap();

    assert_eq!(result.path, vec!["planner", "researcher", "writer", "reviewer"]);
    assert_eq!(result.output, "Looks good.");

    let plan = memory.plan().unwrap();
    assert!(plan.is_complete());
    assert_eq!(plan.title, "Market report");

    let refused = memory
        .entries()
        .iter()
        .find(|e| e.kind() == EntryKind::ToolResult && e.metadata.is_error)
        .unwrap();
    assert_eq!(refused.node(), Some("researcher"));
    assert!(refused.content.starts_with("Error:"));
}

#[tokio::test]
async fn test_reviewer_waits_for_every_step() {
    // The researcher never completes its step, so it keeps getting routed back.
    let researcher = ScriptedLlm::new().repeating("Still working.");
    let writer = ScriptedLlm::new();

    let graph = graph(researcher, writer).compile().unwrap();
    let err = Runner::new(graph)
        .with_max_steps(5)
        .invoke("Write a market report")
        .await
        .unwrap_err();

    assert!(matches!(err, FlowError::StepLimit { limit: 5, ref node } if node == "researcher"));
}

#[tokio::test]
async fn test_owner_must_be_a_declared_target() {
    let router = PlanExecuteRouter::new("coordinator", "planner", "reviewer");
    // The writer owns s2 and is reachable from the planner, but the
    // researcher's edge does not declare it.
    let graph = GraphBuilder::new("plan_execute")
        .add_agent(
            Agent::new("planner", ScriptedLlm::texts([PLAN]).into_arc())
                .with_output(OutputConstraint::Plan),
        )
        .add_agent(worker(
            "researcher",
            ScriptedLlm::new()
                .then_call("mark_step_done", json!({"step_id": "s1"}))
                .then_text("Figures collected."),
        ))
        .add_agent(worker("writer", ScriptedLlm::new().repeating("done")))
        .add_agent(Agent::new("reviewer", ScriptedLlm::new().repeating("ok").into_arc()))
        .add_edge(Edge::routed(
            "planner",
            ["researcher", "writer", "reviewer"],
            router.clone(),
        ))
        .add_edge(Edge::routed("researcher", ["reviewer"], router.clone()))
        .add_edge(Edge::routed("reviewer", [END], router))
        .start("planner")
        .end(END)
        .end("writer")
        .compile()
        .unwrap();

    let err = Runner::new(graph).invoke("Write a market report").await.unwrap_err();
    match err {
        FlowError::Routing { from, message } => {
            assert_eq!(from, "researcher");
            assert!(message.contains("undeclared target 'writer'"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

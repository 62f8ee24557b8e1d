pub mod agent;
pub mod definition;
pub mod graph;
pub mod output;
pub mod router;

pub use agent::{Agent, ReasoningPattern};
pub use definition::{DefinitionContext, GraphDefinition};
pub use graph::{
    Edge, Graph, GraphBuilder, Node, NodeResult, RunResult, Runner, ToolArgs, ToolNode, Topology,
};
pub use output::OutputConstraint;
pub use router::{
    ConversationRouter, LlmRouter, PlanExecuteRouter, ReflectionRouter, RouteDecision,
    RouteOption, Router, RouterSettings, StaticRouter, TaskCategory, TaskClassifierRouter,
};

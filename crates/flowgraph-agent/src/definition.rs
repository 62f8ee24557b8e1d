//! Declarative graph definitions.
//!
//! A [`GraphDefinition`] describes agents, tools, routers, and the workflow
//! wiring in TOML or JSON. Names are resolved against a
//! [`DefinitionContext`] supplied by the caller, which owns the LLM clients,
//! the tool registry, pre-built agents, and routing functions.
//!
//! ```toml
//! name = "support"
//!
//! [[agents]]
//! name = "triage"
//! role = "Decide who handles the request."
//!
//! [[routers]]
//! name = "pick"
//! type = "llm"
//! options = [
//!   { target = "billing", description = "payments and invoices" },
//!   { target = "tech", description = "bugs and outages" },
//! ]
//!
//! [workflow]
//! start = "triage"
//! edges = [{ from = "triage", to = ["billing", "tech"], router = "pick" }]
//! end = ["billing", "tech"]
//! ```

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use flowgraph_core::config::{expand_env_vars, Fallback, FlowConfig};
use flowgraph_core::error::{FlowError, Result};
use flowgraph_core::memory::Memory;
use flowgraph_core::traits::{LlmClient, Tool};
use flowgraph_core::types::ToolErrorPolicy;
use flowgraph_core::END;
use flowgraph_tools::{BoundTool, ToolRegistry};

use crate::agent::{Agent, ReasoningPattern};
use crate::graph::{Edge, EdgeShape, Graph, GraphBuilder, Node, ToolArgs, ToolNode, Topology};
use crate::output::OutputConstraint;
use crate::router::{
    plan_execute_targets, reflection_targets, ConversationRouter, LlmRouter, PlanExecuteRouter,
    ReflectionRouter, RouteOption, Router, RouterSettings, StaticRouter, TaskCategory,
    TaskClassifierRouter,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphDefinition {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub agents: Vec<AgentDef>,
    #[serde(default)]
    pub tools: Vec<ToolDef>,
    #[serde(default)]
    pub routers: Vec<RouterDef>,
    pub workflow: WorkflowDef,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentDef {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// System role shown to the model.
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub pattern: ReasoningPattern,
    /// Named LLM from the context. Unset uses the default LLM.
    #[serde(default)]
    pub llm: Option<String>,
    /// Tool names available to this agent (empty = none).
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub max_iterations: Option<usize>,
    #[serde(default)]
    pub history_window: Option<usize>,
    #[serde(default)]
    pub output: OutputConstraint,
}

/// A tool derived from a registered one: renamed, partially applied, or
/// given a different error policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolDef {
    pub name: String,
    /// Registered tool this one wraps. Defaults to `name`.
    #[serde(default)]
    pub uses: Option<String>,
    /// Pre-bound arguments, hidden from the model.
    #[serde(default)]
    pub bind: Map<String, Value>,
    /// Fixed arguments when the tool runs as a graph node.
    #[serde(default)]
    pub args: Option<Value>,
    #[serde(default)]
    pub on_error: Option<ToolErrorPolicy>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouterKind {
    Llm,
    TaskClassifier,
    Conversation,
    Reflection,
    PlanExecute,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterDef {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: RouterKind,
    #[serde(default)]
    pub llm: Option<String>,

    // llm, conversation
    #[serde(default)]
    pub options: Vec<RouteOption>,
    // task_classifier
    #[serde(default)]
    pub categories: Vec<TaskCategory>,
    #[serde(default)]
    pub fallback: Option<Fallback>,
    #[serde(default)]
    pub context_entries: Option<usize>,
    #[serde(default)]
    pub min_confidence: Option<f64>,
    #[serde(default)]
    pub depth: Option<usize>,
    #[serde(default)]
    pub question: Option<String>,

    // reflection
    #[serde(default)]
    pub pattern: Vec<String>,
    #[serde(default)]
    pub early_exit: bool,
    #[serde(default)]
    pub critic: Option<String>,
    #[serde(default)]
    pub exit_phrases: Vec<String>,

    // plan_execute
    #[serde(default)]
    pub planner: Option<String>,
    #[serde(default)]
    pub reviewer: Option<String>,
}

impl RouterDef {
    /// Targets the router can return on the edge leaving `from`, when known
    /// from the definition alone.
    pub fn static_targets(&self, from: &str) -> Option<Vec<String>> {
        let targets: Vec<String> = match self.kind {
            RouterKind::Llm | RouterKind::Conversation => {
                self.options.iter().map(|o| o.target.clone()).collect()
            }
            RouterKind::TaskClassifier => {
                self.categories.iter().map(|c| c.target.clone()).collect()
            }
            RouterKind::Reflection => {
                let critic = self
                    .critic
                    .as_deref()
                    .or_else(|| self.pattern.get(1).map(|s| s.as_str()));
                reflection_targets(&self.pattern, self.early_exit, critic, from)
            }
            RouterKind::PlanExecute => plan_execute_targets(self.reviewer.as_deref()?, from),
        };
        (!targets.is_empty()).then_some(targets)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowDef {
    pub start: String,
    #[serde(default)]
    pub edges: Vec<EdgeDef>,
    /// End nodes. `end` itself is allowed for graphs that only finish
    /// through routing.
    #[serde(default)]
    pub end: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EdgeDef {
    pub from: String,
    pub to: Vec<String>,
    #[serde(default)]
    pub router: Option<String>,
}

type RouteFn = dyn Fn(&Memory, &[String]) -> String + Send + Sync;

/// Everything a definition's names resolve against.
#[derive(Clone)]
pub struct DefinitionContext {
    pub config: FlowConfig,
    pub default_llm: Option<Arc<dyn LlmClient>>,
    pub llms: HashMap<String, Arc<dyn LlmClient>>,
    /// Starts with the built-in plan tools.
    pub tools: ToolRegistry,
    /// Agents built in code, used when the definition has no agent entry of
    /// that name.
    pub agents: HashMap<String, Agent>,
    pub route_fns: HashMap<String, Arc<RouteFn>>,
}

impl Default for DefinitionContext {
    fn default() -> Self {
        Self {
            config: FlowConfig::default(),
            default_llm: None,
            llms: HashMap::new(),
            tools: ToolRegistry::with_builtins(),
            agents: HashMap::new(),
            route_fns: HashMap::new(),
        }
    }
}

impl DefinitionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: FlowConfig) -> Self {
        self.config = config;
        self
    }

    /// LLM used by agents and routers that do not name one.
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.default_llm = Some(llm);
        self
    }

    pub fn with_named_llm(mut self, name: impl Into<String>, llm: Arc<dyn LlmClient>) -> Self {
        self.llms.insert(name.into(), llm);
        self
    }

    pub fn with_tool(mut self, tool: impl Tool) -> Self {
        self.tools.register(tool);
        self
    }

    pub fn with_tool_arc(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.register_arc(tool);
        self
    }

    pub fn with_agent(mut self, agent: Agent) -> Self {
        self.agents.insert(agent.name().to_string(), agent);
        self
    }

    /// Routing function referenced by name from an edge's `router`.
    pub fn with_route_fn<F>(mut self, name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&Memory, &[String]) -> String + Send + Sync + 'static,
    {
        self.route_fns.insert(name.into(), Arc::new(func));
        self
    }

    fn llm(&self, name: Option<&str>, user: &str) -> Result<Arc<dyn LlmClient>> {
        match name {
            Some(name) => self.llms.get(name).cloned().ok_or_else(|| {
                FlowError::Definition(format!("'{}' uses unknown LLM '{}'", user, name))
            }),
            None => self.default_llm.clone().ok_or_else(|| {
                FlowError::Definition(format!("'{}' needs an LLM but none is configured", user))
            }),
        }
    }
}

impl std::fmt::Debug for DefinitionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut llms: Vec<&String> = self.llms.keys().collect();
        llms.sort();
        let mut route_fns: Vec<&String> = self.route_fns.keys().collect();
        route_fns.sort();
        f.debug_struct("DefinitionContext")
            .field("default_llm", &self.default_llm.is_some())
            .field("llms", &llms)
            .field("tools", &self.tools.list())
            .field("agents", &self.agents.len())
            .field("route_fns", &route_fns)
            .finish()
    }
}

impl GraphDefinition {
    /// Parse a TOML definition, with env var expansion.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);
        toml::from_str(&expanded).map_err(|e| FlowError::Definition(e.to_string()))
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(|e| FlowError::Definition(e.to_string()))
    }

    /// Load from a `.json` or TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| FlowError::ConfigNotFound(path.display().to_string()))?;
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        let mut definition = if is_json {
            Self::from_json_str(&content)?
        } else {
            Self::from_toml_str(&content)?
        };
        if definition.name.is_empty() {
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                definition.name = stem.to_string();
            }
        }
        Ok(definition)
    }

    /// Node names: every defined agent, then every name the workflow
    /// references, in first-seen order.
    pub fn node_names(&self) -> Vec<String> {
        let workflow = &self.workflow;
        let referenced = std::iter::once(&workflow.start)
            .chain(workflow.edges.iter().flat_map(|e| {
                std::iter::once(&e.from).chain(e.to.iter())
            }))
            .chain(workflow.end.iter());

        let mut seen: HashSet<String> = HashSet::new();
        self.agents
            .iter()
            .map(|a| &a.name)
            .chain(referenced)
            .filter(|n| n.as_str() != END && !n.is_empty())
            .filter(|n| seen.insert(n.to_string()))
            .cloned()
            .collect()
    }

    fn router_def(&self, name: &str) -> Option<&RouterDef> {
        self.routers.iter().find(|r| r.name == name)
    }

    fn tool_def(&self, name: &str) -> Option<&ToolDef> {
        self.tools.iter().find(|t| t.name == name)
    }

    /// Names-only structure, checkable without any LLM.
    pub fn topology(&self) -> Topology {
        let starts = if self.workflow.start.is_empty() {
            vec![]
        } else {
            vec![self.workflow.start.clone()]
        };
        Topology {
            nodes: self.node_names(),
            edges: self
                .workflow
                .edges
                .iter()
                .map(|edge| EdgeShape {
                    from: edge.from.clone(),
                    to: edge.to.clone(),
                    router: edge.router.clone(),
                    router_targets: edge
                        .router
                        .as_deref()
                        .and_then(|r| self.router_def(r))
                        .and_then(|r| r.static_targets(&edge.from)),
                })
                .collect(),
            starts,
            ends: self.workflow.end.clone(),
        }
    }

    /// Names the file references but does not define. They must be supplied
    /// by the caller's context when the graph is built.
    pub fn external_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        for node in self.node_names() {
            let defined =
                self.agents.iter().any(|a| a.name == node) || self.tool_def(&node).is_some();
            if !defined {
                names.push(format!("node '{}'", node));
            }
        }
        for edge in &self.workflow.edges {
            if let Some(router) = &edge.router {
                let entry = format!("router '{}'", router);
                if self.router_def(router).is_none() && !names.contains(&entry) {
                    names.push(entry);
                }
            }
        }
        names
    }

    /// Resolve every name against `ctx` and return a builder ready to compile.
    pub fn build(&self, ctx: &DefinitionContext) -> Result<GraphBuilder> {
        let registry = self.tool_registry(ctx)?;

        let mut builder = GraphBuilder::new(self.name.clone());
        for name in self.node_names() {
            builder = builder.add_node(self.node(&name, ctx, &registry)?);
        }

        let mut routers: HashMap<&str, Router> = HashMap::new();
        for edge in &self.workflow.edges {
            let mut built = Edge::to_all(edge.from.clone(), edge.to.iter().cloned());
            if let Some(name) = edge.router.as_deref() {
                let router = match routers.get(name) {
                    Some(router) => router.clone(),
                    None => {
                        let router = self.router(name, ctx)?;
                        routers.insert(name, router.clone());
                        router
                    }
                };
                built = built.with_router(router);
            }
            builder = builder.add_edge(built);
        }

        builder = builder.start(self.workflow.start.clone());
        for end in &self.workflow.end {
            builder = builder.end(end.clone());
        }

        debug!(
            graph = %self.name,
            agents = self.agents.len(),
            tools = self.tools.len(),
            routers = routers.len(),
            "Built graph from definition"
        );
        Ok(builder)
    }

    /// Build and compile in one step.
    pub fn compile(&self, ctx: &DefinitionContext) -> Result<Graph> {
        self.build(ctx)?.compile()
    }

    /// The context's registry plus every tool this definition derives.
    fn tool_registry(&self, ctx: &DefinitionContext) -> Result<ToolRegistry> {
        let mut registry = ctx.tools.clone();
        for def in &self.tools {
            let base = def.uses.as_deref().unwrap_or(&def.name);
            let inner = registry.get(base).ok_or_else(|| {
                FlowError::Definition(format!(
                    "tool '{}' uses unknown tool '{}'",
                    def.name, base
                ))
            })?;
            if base == def.name && def.bind.is_empty() && def.on_error.is_none() {
                continue;
            }
            let mut tool = BoundTool::new(inner, def.bind.clone()).with_name(def.name.clone());
            if let Some(policy) = def.on_error {
                tool = tool.with_error_policy(policy);
            }
            registry.register(tool);
        }
        Ok(registry)
    }

    fn node(&self, name: &str, ctx: &DefinitionContext, registry: &ToolRegistry) -> Result<Node> {
        if let Some(def) = self.agents.iter().find(|a| a.name == name) {
            return Ok(self.agent(def, ctx, registry)?.into());
        }
        if let Some(agent) = ctx.agents.get(name) {
            return Ok(agent.clone().into());
        }
        if let Some(tool) = registry.get(name) {
            let mut node = ToolNode::new(tool).with_name(name);
            if let Some(args) = self.tool_def(name).and_then(|t| t.args.clone()) {
                node = node.with_args(ToolArgs::Fixed(args));
            }
            return Ok(node.into());
        }
        Err(FlowError::Definition(format!(
            "node '{}' is not an agent or a tool",
            name
        )))
    }

    fn agent(&self, def: &AgentDef, ctx: &DefinitionContext, registry: &ToolRegistry) -> Result<Agent> {
        let llm = ctx.llm(def.llm.as_deref(), &def.name)?;

        let mut tools = ToolRegistry::new();
        for tool in &def.tools {
            let resolved = registry.get(tool).ok_or_else(|| {
                FlowError::Definition(format!(
                    "agent '{}' uses unknown tool '{}'",
                    def.name, tool
                ))
            })?;
            tools.register_arc(resolved);
        }

        let mut agent = Agent::new(def.name.clone(), llm)
            .with_defaults(&ctx.config.agent)
            .with_description(def.description.clone())
            .with_role(def.role.clone())
            .with_pattern(def.pattern)
            .with_tools(tools)
            .with_output(def.output.clone());
        if let Some(n) = def.max_retries {
            agent = agent.with_max_retries(n);
        }
        if let Some(n) = def.max_iterations {
            agent = agent.with_max_iterations(n);
        }
        if def.history_window.is_some() {
            agent = agent.with_history_window(def.history_window);
        }
        Ok(agent)
    }

    fn router(&self, name: &str, ctx: &DefinitionContext) -> Result<Router> {
        let Some(def) = self.router_def(name) else {
            let func = ctx.route_fns.get(name).cloned().ok_or_else(|| {
                FlowError::Definition(format!("router '{}' is not defined", name))
            })?;
            return Ok(StaticRouter::new(name, move |memory, targets| func(memory, targets)).into());
        };

        let mut settings = RouterSettings::from(&ctx.config.routing);
        if let Some(fallback) = def.fallback {
            settings.fallback = fallback;
        }
        if let Some(n) = def.context_entries {
            settings.context_entries = n;
        }
        if let Some(c) = def.min_confidence {
            settings.min_confidence = c;
        }

        let router: Router = match def.kind {
            RouterKind::Llm => LlmRouter::new(name, ctx.llm(def.llm.as_deref(), name)?)
                .with_options(def.options.clone())
                .with_settings(settings)
                .into(),
            RouterKind::TaskClassifier => {
                TaskClassifierRouter::new(name, ctx.llm(def.llm.as_deref(), name)?)
                    .with_categories(def.categories.clone())
                    .with_settings(settings)
                    .into()
            }
            RouterKind::Conversation => {
                let mut router = ConversationRouter::new(name, ctx.llm(def.llm.as_deref(), name)?)
                    .with_options(def.options.clone())
                    .with_depth(def.depth.unwrap_or(ctx.config.routing.conversation_depth))
                    .with_settings(settings);
                if let Some(question) = &def.question {
                    router = router.with_question(question.clone());
                }
                router.into()
            }
            RouterKind::Reflection => {
                if def.pattern.is_empty() {
                    return Err(FlowError::Definition(format!(
                        "reflection router '{}' has an empty pattern",
                        name
                    )));
                }
                let mut router = ReflectionRouter::new(name, def.pattern.iter().cloned())
                    .with_early_exit(def.early_exit)
                    .with_exit_phrases(def.exit_phrases.clone());
                if let Some(critic) = &def.critic {
                    router = router.with_critic(critic.clone());
                }
                router.into()
            }
            RouterKind::PlanExecute => {
                let (Some(planner), Some(reviewer)) = (&def.planner, &def.reviewer) else {
                    return Err(FlowError::Definition(format!(
                        "plan_execute router '{}' needs both a planner and a reviewer",
                        name
                    )));
                };
                PlanExecuteRouter::new(name, planner.clone(), reviewer.clone()).into()
            }
        };
        Ok(router)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowgraph_core::error::StructuralError;
    use flowgraph_test_utils::{EchoTool, ScriptedLlm};

    const SUPPORT: &str = r#"
name = "support"

[[agents]]
name = "triage"
role = "Decide who handles the request."

[[agents]]
name = "billing"
max_retries = 0

[[agents]]
name = "tech"
pattern = "react"
tools = ["shout"]

[[tools]]
name = "shout"
uses = "echo"
bind = { text = "HELLO" }

[[routers]]
name = "pick"
type = "llm"
fallback = "last"
options = [
  { target = "billing", description = "payments and invoices" },
  { target = "tech", description = "bugs and outages" },
]

[workflow]
start = "triage"
edges = [{ from = "triage", to = ["billing", "tech"], router = "pick" }]
end = ["billing", "tech"]
"#;

    fn ctx() -> DefinitionContext {
        DefinitionContext::new()
            .with_llm(ScriptedLlm::new().repeating("ok").into_arc())
            .with_tool(EchoTool::new())
    }

    #[test]
    fn test_parse_and_topology() {
        let def = GraphDefinition::from_toml_str(SUPPORT).unwrap();
        assert_eq!(def.name, "support");
        assert_eq!(def.node_names(), vec!["triage", "billing", "tech"]);
        assert_eq!(def.agents[2].pattern, ReasoningPattern::React);

        let topology = def.topology();
        assert_eq!(
            topology.edges[0].router_targets,
            Some(vec!["billing".to_string(), "tech".to_string()])
        );
        assert!(topology.validate().is_ok());
        assert!(def.external_names().is_empty());
    }

    #[test]
    fn test_compile_resolves_names() {
        let def = GraphDefinition::from_toml_str(SUPPORT).unwrap();
        let graph = def.compile(&ctx()).unwrap();

        assert_eq!(graph.name(), "support");
        let Some(Node::Agent(tech)) = graph.node("tech") else {
            panic!("tech should be an agent");
        };
        assert!(tech.tools().contains("shout"));
        let schema = tech.tools().get("shout").unwrap().input_schema();
        assert!(schema["properties"].get("text").is_none());
        assert_eq!(graph.edge("triage").unwrap().router.as_ref().unwrap().kind(), "llm");
    }

    #[test]
    fn test_unresolved_references_fail() {
        let def = GraphDefinition::from_toml_str(SUPPORT).unwrap();
        let err = def.compile(&DefinitionContext::new()).unwrap_err();
        assert!(matches!(err, FlowError::Definition(_)));

        let mut def = GraphDefinition::from_toml_str(SUPPORT).unwrap();
        def.workflow.edges[0].router = Some("missing".into());
        let err = def.compile(&ctx()).unwrap_err();
        assert!(err.to_string().contains("router 'missing' is not defined"));
        assert_eq!(def.external_names(), vec!["router 'missing'"]);
    }

    #[test]
    fn test_router_options_must_be_declared_targets() {
        let mut def = GraphDefinition::from_toml_str(SUPPORT).unwrap();
        def.workflow.edges[0].to = vec!["billing".into()];
        def.workflow.end = vec!["billing".into(), "tech".into()];
        assert!(matches!(
            def.topology().validate(),
            Err(StructuralError::UndeclaredRouterTarget { target, .. }) if target == "tech"
        ));
    }

    #[test]
    fn test_route_fn_and_caller_agents() {
        let json = r#"{
            "workflow": {
                "start": "writer",
                "edges": [
                    {"from": "writer", "to": ["echo", "end"], "router": "by_length"}
                ],
                "end": ["echo"]
            }
        }"#;
        let def = GraphDefinition::from_json_str(json).unwrap();
        assert_eq!(def.external_names().len(), 3);

        let writer = Agent::new("writer", ScriptedLlm::new().repeating("draft").into_arc());
        let ctx = ctx()
            .with_agent(writer)
            .with_route_fn("by_length", |_memory, targets| targets[0].clone());
        let graph = def.compile(&ctx).unwrap();
        assert_eq!(graph.node("writer").unwrap().kind(), "agent");
        assert_eq!(graph.node("echo").unwrap().kind(), "tool");
        assert_eq!(graph.edge("writer").unwrap().router.as_ref().unwrap().kind(), "static");
    }

    #[test]
    fn test_plan_execute_router_needs_reviewer() {
        let toml = r#"
[[routers]]
name = "coord"
type = "plan_execute"
planner = "planner"

[workflow]
start = "planner"
edges = [{ from = "planner", to = ["planner"], router = "coord" }]
end = ["planner"]
"#;
        let def = GraphDefinition::from_toml_str(toml).unwrap();
        let ctx = ctx().with_agent(Agent::new("planner", ScriptedLlm::new().into_arc()));
        let err = def.build(&ctx).unwrap_err();
        assert!(err.to_string().contains("needs both a planner and a reviewer"));
    }

    #[test]
    fn test_invalid_toml() {
        let err = GraphDefinition::from_toml_str("workflow = 3").unwrap_err();
        assert!(matches!(err, FlowError::Definition(_)));
    }
}

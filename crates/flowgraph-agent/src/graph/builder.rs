use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::debug;

use flowgraph_core::error::{Result, StructuralError};
use flowgraph_core::traits::Tool;

use crate::agent::Agent;

use super::edge::Edge;
use super::node::{Node, ToolNode};
use super::topology::{EdgeShape, Topology};

/// Collects nodes and edges, then compiles them into a [`Graph`].
#[derive(Debug, Clone, Default)]
pub struct GraphBuilder {
    name: String,
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    starts: Vec<String>,
    ends: Vec<String>,
}

impl GraphBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn add_agent(self, agent: Agent) -> Self {
        self.add_node(agent)
    }

    /// Add a tool as a node named after the tool.
    pub fn add_tool_node(self, tool: Arc<dyn Tool>) -> Self {
        self.add_node(ToolNode::new(tool))
    }

    pub fn add_node(mut self, node: impl Into<Node>) -> Self {
        self.nodes.push(node.into());
        self
    }

    pub fn add_edge(mut self, edge: Edge) -> Self {
        self.edges.push(edge);
        self
    }

    pub fn start(mut self, node: impl Into<String>) -> Self {
        self.starts.push(node.into());
        self
    }

    /// Mark a node as an end node. The terminal marker is also accepted.
    pub fn end(mut self, node: impl Into<String>) -> Self {
        self.ends.push(node.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Names-only view used for the structural checks.
    pub fn topology(&self) -> Topology {
        Topology {
            nodes: self.nodes.iter().map(|n| n.name().to_string()).collect(),
            edges: self
                .edges
                .iter()
                .map(|edge| EdgeShape {
                    from: edge.from.clone(),
                    to: edge.to.clone(),
                    router: edge.router.as_ref().map(|r| r.name().to_string()),
                    router_targets: edge
                        .router
                        .as_ref()
                        .and_then(|r| r.static_targets(&edge.from)),
                })
                .collect(),
            starts: self.starts.clone(),
            ends: self.ends.clone(),
        }
    }

    /// Check the structure and produce an immutable graph. Nothing is executed.
    pub fn compile(&self) -> Result<Graph> {
        self.topology().validate()?;

        let mut nodes = HashMap::with_capacity(self.nodes.len());
        let mut order = Vec::with_capacity(self.nodes.len());
        for node in &self.nodes {
            order.push(node.name().to_string());
            nodes.insert(node.name().to_string(), node.clone());
        }

        let edges: HashMap<String, Edge> = self
            .edges
            .iter()
            .map(|e| (e.from.clone(), e.clone()))
            .collect();

        let start = self
            .starts
            .first()
            .cloned()
            .ok_or(StructuralError::MissingStart)?;

        debug!(
            graph = %self.name,
            nodes = order.len(),
            edges = edges.len(),
            start = %start,
            "Compiled graph"
        );

        Ok(Graph {
            name: self.name.clone(),
            nodes,
            edges,
            start,
            ends: self.ends.iter().cloned().collect(),
            order,
        })
    }
}

/// A compiled, immutable execution graph. Safe to share between runs.
pub struct Graph {
    name: String,
    nodes: HashMap<String, Node>,
    edges: HashMap<String, Edge>,
    start: String,
    ends: HashSet<String>,
    order: Vec<String>,
}

impl Graph {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn start(&self) -> &str {
        &self.start
    }

    pub fn is_end(&self, node: &str) -> bool {
        self.ends.contains(node)
    }

    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.get(name)
    }

    /// The edge leaving `from`, if any.
    pub fn edge(&self, from: &str) -> Option<&Edge> {
        self.edges.get(from)
    }

    /// Node names in declaration order.
    pub fn node_names(&self) -> &[String] {
        &self.order
    }

    pub fn ends(&self) -> impl Iterator<Item = &str> {
        self.ends.iter().map(|s| s.as_str())
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("name", &self.name)
            .field("start", &self.start)
            .field("nodes", &self.order)
            .field("edges", &self.edges.len())
            .finish()
    }
}

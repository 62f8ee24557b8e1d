use thiserror::Error;

/// Problems found while compiling a graph. Each variant names the offending
/// node or edge.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StructuralError {
    #[error("graph has no nodes")]
    NoNodes,

    #[error("graph has no start node")]
    MissingStart,

    #[error("graph declares more than one start node: {0:?}")]
    MultipleStarts(Vec<String>),

    #[error("start node '{0}' is not declared")]
    UnknownStart(String),

    #[error("graph has no end nodes")]
    NoEnds,

    #[error("end node '{0}' is not declared")]
    UnknownEnd(String),

    #[error("node name '{0}' is declared more than once")]
    DuplicateNode(String),

    #[error("node name '{0}' is reserved")]
    ReservedName(String),

    #[error("more than one edge leaves node '{from}'")]
    DuplicateEdge { from: String },

    #[error("edge from '{from}' has no targets")]
    EmptyEdge { from: String },

    #[error("edge from '{from}' references unknown node '{name}'")]
    UnknownNode { from: String, name: String },

    #[error("node '{0}' is neither an edge target nor an end node")]
    Orphan(String),

    #[error("node '{0}' is not reachable from the start node")]
    Unreachable(String),

    #[error("node '{0}' is not an end node and has no outgoing edge")]
    DeadEnd(String),

    #[error("edge from '{from}' has {targets} targets but no router")]
    MissingRouter { from: String, targets: usize },

    #[error("router '{router}' on edge from '{from}' can return undeclared target '{target}'")]
    UndeclaredRouterTarget {
        from: String,
        router: String,
        target: String,
    },
}

#[derive(Debug, Error)]
pub enum FlowError {
    // LLM errors
    #[error("LLM request failed: {0}")]
    LlmRequest(String),

    #[error("LLM response parse error: {0}")]
    LlmParse(String),

    // Tool errors
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool execution failed: {tool}: {message}")]
    ToolExecution { tool: String, message: String },

    #[error("Tool timeout after {timeout_secs}s: {tool}")]
    ToolTimeout { tool: String, timeout_secs: u64 },

    #[error("Tool input validation failed: {tool}: {message}")]
    ToolValidation { tool: String, message: String },

    // Agent errors
    #[error("Agent '{agent}': tool '{tool}' failed: {message}")]
    Tool {
        agent: String,
        tool: String,
        message: String,
    },

    #[error("Agent '{agent}' produced invalid output after {attempts} attempts: {detail}")]
    Validation {
        agent: String,
        attempts: usize,
        detail: String,
    },

    #[error("Agent '{agent}' did not converge after {attempts} attempts: {detail}")]
    ReasoningExhausted {
        agent: String,
        attempts: usize,
        detail: String,
    },

    // Graph errors
    #[error("Invalid graph: {0}")]
    Structural(#[from] StructuralError),

    #[error("Routing failed after '{from}': {message}")]
    Routing { from: String, message: String },

    #[error("Run exceeded {limit} steps (last node: {node})")]
    StepLimit { limit: usize, node: String },

    #[error("Node '{node}' failed: {source}")]
    Node {
        node: String,
        #[source]
        source: Box<FlowError>,
    },

    #[error("Plan error: {0}")]
    Plan(String),

    #[error("Graph definition error: {0}")]
    Definition(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FlowError {
    /// Name of the node a failure originated in, if the runner recorded one.
    pub fn node(&self) -> Option<&str> {
        match self {
            Self::Node { node, .. } => Some(node),
            _ => None,
        }
    }

    /// Strip the runner's node wrapper, returning the underlying failure.
    pub fn root(&self) -> &FlowError {
        match self {
            Self::Node { source, .. } => source.root(),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, FlowError>;

//! Graph compilation and execution.
//!
//! A workflow is a set of named `Node`s (agents or tools) joined by `Edge`s
//! keyed by their source node. `GraphBuilder::compile` checks the structure
//! once and produces an immutable `Graph`; a `Runner` then walks it from the
//! start node over one `Memory` per run, asking each edge's router where to
//! go next until an end node or the terminal marker is reached.

pub mod builder;
pub mod edge;
pub mod node;
pub mod runner;
pub mod topology;

pub use builder::{Graph, GraphBuilder};
pub use edge::Edge;
pub use node::{Node, ToolArgs, ToolNode};
pub use runner::{NodeResult, RunResult, Runner};
pub use topology::{EdgeShape, Topology};

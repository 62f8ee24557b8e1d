use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info};

use flowgraph_core::config::FlowConfig;
use flowgraph_core::error::{FlowError, Result};
use flowgraph_core::event::{EventBus, WorkflowEvent};
use flowgraph_core::memory::Memory;
use flowgraph_core::END;

use super::builder::Graph;

/// Result of executing a single node.
#[derive(Debug, Clone)]
pub struct NodeResult {
    /// Which node was executed.
    pub node: String,
    /// The node's output text.
    pub output: String,
    /// Execution time in milliseconds.
    pub duration_ms: u64,
    /// Memory entries the node appended.
    pub entries_added: usize,
}

/// Result of a successful run.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub run_id: String,
    /// Output of the last node executed.
    pub output: String,
    /// Node names in execution order. Revisited nodes appear again.
    pub path: Vec<String>,
    /// Per-node results in execution order.
    pub node_results: Vec<NodeResult>,
    /// Total execution time in milliseconds.
    pub total_elapsed_ms: u64,
}

/// Walks a compiled graph.
///
/// Starting from the graph's start node, the runner executes each node
/// against the run's memory, stops at an end node, and otherwise asks the
/// node's outgoing edge where to go next. A target of `end` also stops.
#[derive(Debug, Clone)]
pub struct Runner {
    graph: Arc<Graph>,
    events: Arc<EventBus>,
    max_steps: usize,
}

impl Runner {
    pub fn new(graph: impl Into<Arc<Graph>>) -> Self {
        Self {
            graph: graph.into(),
            events: Arc::new(EventBus::default()),
            max_steps: FlowConfig::default().runner.max_steps,
        }
    }

    /// Runner with the step ceiling and event capacity from `config`.
    pub fn from_config(graph: impl Into<Arc<Graph>>, config: &FlowConfig) -> Self {
        Self {
            graph: graph.into(),
            events: Arc::new(EventBus::new(config.events.capacity)),
            max_steps: config.runner.max_steps,
        }
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = events;
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Run with a fresh memory holding `input`, returning the memory too.
    pub async fn invoke(&self, input: impl Into<String>) -> Result<(RunResult, Memory)> {
        let mut memory = Memory::with_input(input);
        let result = self.run(&mut memory).await?;
        Ok((result, memory))
    }

    /// Run the graph over `memory`.
    pub async fn run(&self, memory: &mut Memory) -> Result<RunResult> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let start = Instant::now();

        info!(run_id = %run_id, graph = %self.graph.name(), "Starting run");
        self.events.publish(WorkflowEvent::WorkflowStarted {
            run_id: run_id.clone(),
            graph: self.graph.name().to_string(),
            start: self.graph.start().to_string(),
        });

        let mut path = Vec::new();
        let mut node_results = Vec::new();
        match self
            .walk(&run_id, memory, &mut path, &mut node_results)
            .await
        {
            Ok(output) => {
                let total_elapsed_ms = start.elapsed().as_millis() as u64;
                info!(
                    run_id = %run_id,
                    steps = path.len(),
                    elapsed_ms = total_elapsed_ms,
                    "Run complete"
                );
                self.events.publish(WorkflowEvent::WorkflowCompleted {
                    run_id: run_id.clone(),
                    steps: path.len(),
                    duration_ms: total_elapsed_ms,
                });
                Ok(RunResult {
                    run_id,
                    output,
                    path,
                    node_results,
                    total_elapsed_ms,
                })
            }
            Err(e) => {
                error!(run_id = %run_id, error = %e, "Run failed");
                self.events.publish(WorkflowEvent::WorkflowFailed {
                    run_id,
                    node: e.node().map(String::from),
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn walk(
        &self,
        run_id: &str,
        memory: &mut Memory,
        path: &mut Vec<String>,
        node_results: &mut Vec<NodeResult>,
    ) -> Result<String> {
        let mut current = self.graph.start().to_string();

        loop {
            if path.len() >= self.max_steps {
                return Err(FlowError::StepLimit {
                    limit: self.max_steps,
                    node: current,
                });
            }

            let node = self.graph.node(&current).ok_or_else(|| FlowError::Routing {
                from: path.last().cloned().unwrap_or_default(),
                message: format!("node '{}' is not in the graph", current),
            })?;

            info!(run_id = %run_id, node = %current, kind = node.kind(), "Executing node");
            self.events.publish(WorkflowEvent::NodeStarted {
                run_id: run_id.to_string(),
                node: current.clone(),
            });

            let node_start = Instant::now();
            let before = memory.len();
            let result = node.execute(memory, &self.events).await;
            let duration_ms = node_start.elapsed().as_millis() as u64;
            path.push(current.clone());

            let output = match result {
                Ok(output) => output,
                Err(e) => {
                    error!(node = %current, error = %e, "Node failed");
                    self.events.publish(WorkflowEvent::NodeFailed {
                        run_id: run_id.to_string(),
                        node: current.clone(),
                        duration_ms,
                        error: e.to_string(),
                    });
                    return Err(FlowError::Node {
                        node: current,
                        source: Box::new(e),
                    });
                }
            };

            debug!(node = %current, duration_ms, "Node execution complete");
            self.events.publish(WorkflowEvent::NodeCompleted {
                run_id: run_id.to_string(),
                node: current.clone(),
                duration_ms,
            });
            node_results.push(NodeResult {
                node: current.clone(),
                output: output.clone(),
                duration_ms,
                entries_added: memory.len().saturating_sub(before),
            });

            if self.graph.is_end(&current) {
                debug!(node = %current, "Reached end node");
                return Ok(output);
            }

            let next = self.next_node(run_id, &current, memory).await?;
            self.events.publish(WorkflowEvent::EdgeTraversed {
                run_id: run_id.to_string(),
                from: current.clone(),
                to: next.clone(),
            });

            if next == END {
                debug!(node = %current, "Routed to end");
                return Ok(output);
            }
            current = next;
        }
    }

    async fn next_node(&self, run_id: &str, from: &str, memory: &Memory) -> Result<String> {
        let edge = self.graph.edge(from).ok_or_else(|| FlowError::Routing {
            from: from.to_string(),
            message: "no outgoing edge".into(),
        })?;

        let Some(router) = &edge.router else {
            return edge.to.first().cloned().ok_or_else(|| FlowError::Routing {
                from: from.to_string(),
                message: "edge has no targets".into(),
            });
        };

        let decision = router
            .decide(memory, &edge.to, &self.events)
            .await
            .map_err(|e| FlowError::Routing {
                from: from.to_string(),
                message: e.to_string(),
            })?;

        if !edge.to.contains(&decision.target) {
            return Err(FlowError::Routing {
                from: from.to_string(),
                message: format!(
                    "router '{}' returned undeclared target '{}'",
                    router.name(),
                    decision.target
                ),
            });
        }

        debug!(
            from = %from,
            router = %router.name(),
            choice = %decision.target,
            fallback = decision.fallback,
            reason = decision.reason.as_deref().unwrap_or(""),
            "Router decision"
        );
        self.events.publish(WorkflowEvent::RouterDecision {
            run_id: run_id.to_string(),
            from: from.to_string(),
            router: router.name().to_string(),
            choice: decision.target.clone(),
            fallback: decision.fallback,
        });

        Ok(decision.target)
    }
}

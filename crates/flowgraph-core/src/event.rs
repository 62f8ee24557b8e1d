/// Observability event emitted while a graph runs.
///
/// Events are purely observational: publishing never blocks and a run
/// behaves the same whether or not anyone subscribes.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowEvent {
    WorkflowStarted {
        run_id: String,
        graph: String,
        start: String,
    },
    WorkflowCompleted {
        run_id: String,
        steps: usize,
        duration_ms: u64,
    },
    WorkflowFailed {
        run_id: String,
        node: Option<String>,
        error: String,
    },
    NodeStarted {
        run_id: String,
        node: String,
    },
    NodeCompleted {
        run_id: String,
        node: String,
        duration_ms: u64,
    },
    NodeFailed {
        run_id: String,
        node: String,
        duration_ms: u64,
        error: String,
    },
    RouterDecision {
        run_id: String,
        from: String,
        router: String,
        choice: String,
        fallback: bool,
    },
    EdgeTraversed {
        run_id: String,
        from: String,
        to: String,
    },
    /// An agent attempt failed and will be retried (or the budget ran out).
    AgentRetry {
        agent: String,
        attempt: usize,
        reason: String,
    },
    /// A tool failed inside an agent loop.
    ToolFailed {
        agent: String,
        tool: String,
        error: String,
        /// Whether the error was fed back to the model.
        forwarded: bool,
    },
    /// A router could not use the LLM's answer and applied its fallback.
    RouterFallback {
        router: String,
        reason: String,
        choice: String,
    },
}

impl WorkflowEvent {
    /// Stable snake_case event type name.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::WorkflowStarted { .. } => "workflow_started",
            Self::WorkflowCompleted { .. } => "workflow_completed",
            Self::WorkflowFailed { .. } => "workflow_failed",
            Self::NodeStarted { .. } => "node_started",
            Self::NodeCompleted { .. } => "node_completed",
            Self::NodeFailed { .. } => "node_failed",
            Self::RouterDecision { .. } => "router_decision",
            Self::EdgeTraversed { .. } => "edge_traversed",
            Self::AgentRetry { .. } => "agent_retry",
            Self::ToolFailed { .. } => "tool_failed",
            Self::RouterFallback { .. } => "router_fallback",
        }
    }
}

/// Event bus using tokio broadcast channel.
/// All subscribers receive all events.
pub struct EventBus {
    tx: tokio::sync::broadcast::Sender<WorkflowEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = tokio::sync::broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, event: WorkflowEvent) {
        tracing::trace!(event = event.kind(), "workflow event");
        // Ignore error if no receivers
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<WorkflowEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("receivers", &self.tx.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::default();
        bus.publish(WorkflowEvent::NodeStarted {
            run_id: "r".into(),
            node: "a".into(),
        });
    }

    #[tokio::test]
    async fn test_subscriber_receives_events() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        bus.publish(WorkflowEvent::EdgeTraversed {
            run_id: "r".into(),
            from: "a".into(),
            to: "b".into(),
        });
        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind(), "edge_traversed");
    }
}

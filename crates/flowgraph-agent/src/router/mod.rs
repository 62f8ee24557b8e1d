//! Routing strategies.
//!
//! A router picks the next node among an edge's declared targets. Routers
//! hold configuration only; anything positional (reflection cursor, plan
//! progress) is read from the run's [`Memory`], so one compiled graph can
//! serve many concurrent runs.

mod conversation;
mod llm;
mod plan_execute;
mod reflection;
mod static_fn;
mod task;

pub use conversation::ConversationRouter;
pub use llm::{LlmRouter, RouteOption, RouterSettings};
pub use plan_execute::{plan_execute_targets, PlanExecuteRouter};
pub use reflection::{reflection_targets, ReflectionRouter, DEFAULT_EXIT_PHRASE};
pub use static_fn::StaticRouter;
pub use task::{TaskCategory, TaskClassifierRouter};

use flowgraph_core::error::Result;
use flowgraph_core::event::EventBus;
use flowgraph_core::memory::Memory;

/// Outcome of one routing decision.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteDecision {
    pub target: String,
    pub reason: Option<String>,
    /// The router could not use its primary signal and fell back.
    pub fallback: bool,
}

impl RouteDecision {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            reason: None,
            fallback: false,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

#[derive(Clone)]
pub enum Router {
    Static(StaticRouter),
    Llm(LlmRouter),
    TaskClassifier(TaskClassifierRouter),
    Conversation(ConversationRouter),
    Reflection(ReflectionRouter),
    PlanExecute(PlanExecuteRouter),
}

impl Router {
    pub fn name(&self) -> &str {
        match self {
            Self::Static(r) => r.name(),
            Self::Llm(r) => r.name(),
            Self::TaskClassifier(r) => r.name(),
            Self::Conversation(r) => r.name(),
            Self::Reflection(r) => r.name(),
            Self::PlanExecute(r) => r.name(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Static(_) => "static",
            Self::Llm(_) => "llm",
            Self::TaskClassifier(_) => "task_classifier",
            Self::Conversation(_) => "conversation",
            Self::Reflection(_) => "reflection",
            Self::PlanExecute(_) => "plan_execute",
        }
    }

    /// Every target this router can return on the edge leaving `from`, when
    /// that set is known without running it.
    pub fn static_targets(&self, from: &str) -> Option<Vec<String>> {
        match self {
            Self::Static(_) => None,
            Self::Llm(r) => r.static_targets(),
            Self::TaskClassifier(r) => r.static_targets(),
            Self::Conversation(r) => r.static_targets(),
            Self::Reflection(r) => Some(r.targets_from(from)),
            Self::PlanExecute(r) => Some(r.targets_from(from)),
        }
    }

    /// Pick the next node among `targets`.
    pub async fn decide(
        &self,
        memory: &Memory,
        targets: &[String],
        events: &EventBus,
    ) -> Result<RouteDecision> {
        match self {
            Self::Static(r) => Ok(r.decide(memory, targets)),
            Self::Llm(r) => Ok(r.decide(memory, targets, events).await),
            Self::TaskClassifier(r) => Ok(r.decide(memory, targets, events).await),
            Self::Conversation(r) => Ok(r.decide(memory, targets, events).await),
            Self::Reflection(r) => Ok(r.decide(memory)),
            Self::PlanExecute(r) => r.decide(memory),
        }
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("kind", &self.kind())
            .field("name", &self.name())
            .finish()
    }
}

impl From<StaticRouter> for Router {
    fn from(r: StaticRouter) -> Self {
        Self::Static(r)
    }
}

impl From<LlmRouter> for Router {
    fn from(r: LlmRouter) -> Self {
        Self::Llm(r)
    }
}

impl From<TaskClassifierRouter> for Router {
    fn from(r: TaskClassifierRouter) -> Self {
        Self::TaskClassifier(r)
    }
}

impl From<ConversationRouter> for Router {
    fn from(r: ConversationRouter) -> Self {
        Self::Conversation(r)
    }
}

impl From<ReflectionRouter> for Router {
    fn from(r: ReflectionRouter) -> Self {
        Self::Reflection(r)
    }
}

impl From<PlanExecuteRouter> for Router {
    fn from(r: PlanExecuteRouter) -> Self {
        Self::PlanExecute(r)
    }
}

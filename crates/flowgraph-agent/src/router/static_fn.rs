use std::sync::Arc;

use flowgraph_core::memory::Memory;

use super::RouteDecision;

type RouteFn = dyn Fn(&Memory, &[String]) -> String + Send + Sync;

/// A pure routing function supplied by the graph author.
#[derive(Clone)]
pub struct StaticRouter {
    name: String,
    func: Arc<RouteFn>,
}

impl StaticRouter {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&Memory, &[String]) -> String + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    /// Router that always returns `target`.
    pub fn always(target: impl Into<String>) -> Self {
        let target = target.into();
        Self::new(format!("always_{}", target), move |_, _| target.clone())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn decide(&self, memory: &Memory, targets: &[String]) -> RouteDecision {
        RouteDecision::new((self.func)(memory, targets))
    }
}

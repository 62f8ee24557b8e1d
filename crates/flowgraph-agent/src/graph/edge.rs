use crate::router::Router;

/// The outgoing edge of a node.
#[derive(Debug, Clone)]
pub struct Edge {
    /// Source node name.
    pub from: String,
    /// Target node names in declaration order, without duplicates.
    pub to: Vec<String>,
    /// Chooses among `to`; required when there is more than one target.
    pub router: Option<Router>,
}

impl Edge {
    /// An unconditional edge to a single target.
    pub fn direct(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: vec![to.into()],
            router: None,
        }
    }

    /// An edge whose router picks one of `to`.
    pub fn routed<I, S>(from: impl Into<String>, to: I, router: impl Into<Router>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            from: from.into(),
            to: dedup(to.into_iter().map(Into::into)),
            router: Some(router.into()),
        }
    }

    /// An edge with targets and no router. Compiles only with one target.
    pub fn to_all<I, S>(from: impl Into<String>, to: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            from: from.into(),
            to: dedup(to.into_iter().map(Into::into)),
            router: None,
        }
    }

    pub fn with_router(mut self, router: impl Into<Router>) -> Self {
        self.router = Some(router.into());
        self
    }

    pub fn targets(&self) -> &[String] {
        &self.to
    }
}

fn dedup(names: impl Iterator<Item = String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for name in names {
        if !out.contains(&name) {
            out.push(name);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::StaticRouter;

    #[test]
    fn test_routed_edge_dedups_in_order() {
        let edge = Edge::routed("a", ["c", "b", "c"], StaticRouter::always("b"));
        assert_eq!(edge.targets(), ["c".to_string(), "b".to_string()]);
        assert!(edge.router.is_some());
    }

    #[test]
    fn test_direct_edge() {
        let edge = Edge::direct("a", "b");
        assert_eq!(edge.to, vec!["b"]);
        assert!(edge.router.is_none());
    }
}

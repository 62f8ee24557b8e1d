//! Name-level graph structure and its checks.
//!
//! `Topology` carries node and edge names only, so a definition file can be
//! checked without building LLM-backed nodes. The compiler runs the same
//! checks before producing a `Graph`.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::Write as _;

use flowgraph_core::error::StructuralError;
use flowgraph_core::END;

/// Names-only view of an edge.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EdgeShape {
    pub from: String,
    pub to: Vec<String>,
    /// Router name, if the edge has one.
    pub router: Option<String>,
    /// Everything the router can return from this edge, when known statically.
    pub router_targets: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Topology {
    pub nodes: Vec<String>,
    pub edges: Vec<EdgeShape>,
    /// Every start declared. Valid graphs have exactly one.
    pub starts: Vec<String>,
    pub ends: Vec<String>,
}

impl Topology {
    /// Run every structural check, returning the first problem found.
    pub fn validate(&self) -> Result<(), StructuralError> {
        // (a) nodes exist
        if self.nodes.is_empty() {
            return Err(StructuralError::NoNodes);
        }

        let mut declared: HashSet<&str> = HashSet::new();
        for name in &self.nodes {
            if name == END {
                return Err(StructuralError::ReservedName(name.clone()));
            }
            if !declared.insert(name.as_str()) {
                return Err(StructuralError::DuplicateNode(name.clone()));
            }
        }

        // (b) exactly one start
        let start = match self.starts.as_slice() {
            [] => return Err(StructuralError::MissingStart),
            [only] => only.as_str(),
            many => return Err(StructuralError::MultipleStarts(many.to_vec())),
        };
        if !declared.contains(start) {
            return Err(StructuralError::UnknownStart(start.to_string()));
        }

        // (c) at least one end
        if self.ends.is_empty() {
            return Err(StructuralError::NoEnds);
        }

        // (d) every reference resolves
        for end in &self.ends {
            if end != END && !declared.contains(end.as_str()) {
                return Err(StructuralError::UnknownEnd(end.clone()));
            }
        }
        let mut outgoing: HashMap<&str, &EdgeShape> = HashMap::new();
        for edge in &self.edges {
            if !declared.contains(edge.from.as_str()) {
                return Err(StructuralError::UnknownNode {
                    from: edge.from.clone(),
                    name: edge.from.clone(),
                });
            }
            if edge.to.is_empty() {
                return Err(StructuralError::EmptyEdge {
                    from: edge.from.clone(),
                });
            }
            for target in &edge.to {
                if target != END && !declared.contains(target.as_str()) {
                    return Err(StructuralError::UnknownNode {
                        from: edge.from.clone(),
                        name: target.clone(),
                    });
                }
            }
            if outgoing.insert(edge.from.as_str(), edge).is_some() {
                return Err(StructuralError::DuplicateEdge {
                    from: edge.from.clone(),
                });
            }
        }

        // (e) no orphans
        let targeted: HashSet<&str> = self
            .edges
            .iter()
            .flat_map(|e| e.to.iter().map(|t| t.as_str()))
            .collect();
        let ends: HashSet<&str> = self.ends.iter().map(|s| s.as_str()).collect();
        for name in &self.nodes {
            let name = name.as_str();
            if name != start && !targeted.contains(name) && !ends.contains(name) {
                return Err(StructuralError::Orphan(name.to_string()));
            }
        }

        // (f) branching edges carry a router, and static router outputs are declared
        for edge in &self.edges {
            match &edge.router {
                None if edge.to.len() > 1 => {
                    return Err(StructuralError::MissingRouter {
                        from: edge.from.clone(),
                        targets: edge.to.len(),
                    });
                }
                Some(router) => {
                    for target in edge.router_targets.iter().flatten() {
                        if !edge.to.contains(target) {
                            return Err(StructuralError::UndeclaredRouterTarget {
                                from: edge.from.clone(),
                                router: router.clone(),
                                target: target.clone(),
                            });
                        }
                    }
                }
                None => {}
            }
        }

        // Every node can run, and non-end nodes have a way out.
        let reachable = self.reachable(start, &outgoing, &ends);
        for name in &self.nodes {
            let name = name.as_str();
            if !reachable.contains(name) {
                return Err(StructuralError::Unreachable(name.to_string()));
            }
            if !ends.contains(name) && !outgoing.contains_key(name) {
                return Err(StructuralError::DeadEnd(name.to_string()));
            }
        }

        Ok(())
    }

    /// Nodes the runner can visit. A run stops at an end node, so edges
    /// leaving one are never followed.
    fn reachable<'a>(
        &'a self,
        start: &'a str,
        outgoing: &HashMap<&'a str, &'a EdgeShape>,
        ends: &HashSet<&str>,
    ) -> HashSet<&'a str> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::from([start]);
        while let Some(name) = queue.pop_front() {
            if name == END || !seen.insert(name) || ends.contains(name) {
                continue;
            }
            if let Some(edge) = outgoing.get(name) {
                queue.extend(edge.to.iter().map(|t| t.as_str()));
            }
        }
        seen
    }

    /// Human-readable summary.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "start: {}", self.starts.join(", "));
        let _ = writeln!(out, "end:   {}", self.ends.join(", "));
        let _ = writeln!(out, "nodes ({}):", self.nodes.len());
        for node in &self.nodes {
            let _ = writeln!(out, "  {}", node);
        }
        let _ = writeln!(out, "edges ({}):", self.edges.len());
        for edge in &self.edges {
            match &edge.router {
                Some(router) => {
                    let _ = writeln!(
                        out,
                        "  {} -> [{}] via {}",
                        edge.from,
                        edge.to.join(", "),
                        router
                    );
                }
                None => {
                    let _ = writeln!(out, "  {} -> {}", edge.from, edge.to.join(", "));
                }
            }
        }
        out
    }
}

//! Dependency graph: a `petgraph` digraph (dependency -> dependent edges)
//! plus validation and topological ordering (§4.C).

use crate::error::{DrftError, Result};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{HashMap, HashSet};

/// Wraps a `petgraph::graph::DiGraph` of resource ids. Edges run from a
/// dependency to its dependent, so a topological walk of the graph visits
/// dependencies before the resources that need them.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    order: Vec<String>,
    declared: HashMap<String, Vec<String>>,
    graph: DiGraph<String, ()>,
    nodes: HashMap<String, NodeIndex>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn node(&mut self, id: &str) -> NodeIndex {
        if let Some(idx) = self.nodes.get(id) {
            return *idx;
        }
        let idx = self.graph.add_node(id.to_string());
        self.nodes.insert(id.to_string(), idx);
        idx
    }

    /// Record `id` with its declared `dependencies`, adding a dependency ->
    /// `id` edge for each. Dependencies referenced but never added in their
    /// own right become graph nodes too, so `validate` can name them.
    pub fn add(&mut self, id: &str, dependencies: &[String]) {
        if !self.declared.contains_key(id) {
            self.order.push(id.to_string());
        }
        self.declared.entry(id.to_string()).or_default();
        let id_idx = self.node(id);

        for dep in dependencies {
            self.declared.get_mut(id).unwrap().push(dep.clone());
            let dep_idx = self.node(dep);
            self.graph.add_edge(dep_idx, id_idx, ());
        }
    }

    /// For every added id, every id it names as a dependency must also be
    /// added. Violation is a hard `Validation` error listing each
    /// `id -> missing-ids` pair.
    pub fn validate(&self) -> Result<()> {
        let known: HashSet<&str> = self.order.iter().map(String::as_str).collect();
        let mut problems = Vec::new();
        for id in &self.order {
            let deps = self.declared.get(id).map(Vec::as_slice).unwrap_or(&[]);
            let missing: Vec<&str> = deps
                .iter()
                .map(String::as_str)
                .filter(|d| !known.contains(d))
                .collect();
            if !missing.is_empty() {
                problems.push(format!("{} -> [{}]", id, missing.join(", ")));
            }
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(DrftError::Validation(format!(
                "missing dependencies: {}",
                problems.join("; ")
            )))
        }
    }

    /// Dependencies before dependents, restricted to ids this graph was
    /// told about via `add` (nodes created only to resolve an edge target
    /// don't appear in the result).
    pub fn topological_order(&self) -> Result<Vec<String>> {
        let sorted = toposort(&self.graph, None)
            .map_err(|_| DrftError::Validation("cycle detected in dependency graph".into()))?;
        let known: HashSet<&str> = self.order.iter().map(String::as_str).collect();
        Ok(sorted
            .into_iter()
            .map(|idx| self.graph[idx].clone())
            .filter(|id| known.contains(id.as_str()))
            .collect())
    }

    /// The reverse of `topological_order`, used for deletions (dependents
    /// first).
    pub fn reverse_topological_order(&self) -> Result<Vec<String>> {
        let mut order = self.topological_order()?;
        order.reverse();
        Ok(order)
    }
}

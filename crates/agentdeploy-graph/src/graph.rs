//! Deployment graph derived from descriptor dependencies.
//!
//! Edges point from a dependency to its dependent. Dependencies that are not
//! declared in the descriptor set still become nodes; they are leaves that
//! can only be satisfied by an existing state record.

use agentdeploy_core::{DescriptorSet, Error, Result};
use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Bfs;
use petgraph::Direction;
use std::collections::{BTreeMap, BTreeSet, HashMap};

#[derive(Debug)]
pub struct DeploymentGraph {
    inner: DiGraph<String, ()>,
    index: HashMap<String, NodeIndex>,
    declared: BTreeSet<String>,
}

impl DeploymentGraph {
    /// Build the graph and reject it if any cycle exists.
    pub fn build(descriptors: &DescriptorSet) -> Result<Self> {
        let mut graph = Self {
            inner: DiGraph::new(),
            index: HashMap::new(),
            declared: descriptors.names().map(String::from).collect(),
        };
        for def in descriptors.definitions() {
            let to = graph.node(&def.name);
            for dep in &def.dependencies {
                let from = graph.node(dep);
                graph.inner.update_edge(from, to, ());
            }
        }
        if let Some(cycle) = graph.find_cycle() {
            return Err(Error::CyclicDependency { cycle });
        }
        Ok(graph)
    }

    fn node(&mut self, name: &str) -> NodeIndex {
        if let Some(idx) = self.index.get(name) {
            return *idx;
        }
        let idx = self.inner.add_node(name.to_string());
        self.index.insert(name.to_string(), idx);
        idx
    }

    pub fn is_declared(&self, name: &str) -> bool {
        self.declared.contains(name)
    }

    /// Names referenced as dependencies but never declared.
    pub fn undeclared(&self) -> BTreeSet<String> {
        self.index
            .keys()
            .filter(|n| !self.declared.contains(*n))
            .cloned()
            .collect()
    }

    /// First cycle found, as a closed path (`a -> b -> a`).
    fn find_cycle(&self) -> Option<Vec<String>> {
        if toposort(&self.inner, None).is_ok() {
            return None;
        }
        let mut components: Vec<Vec<NodeIndex>> = tarjan_scc(&self.inner)
            .into_iter()
            .filter(|scc| {
                scc.len() > 1 || self.inner.find_edge(scc[0], scc[0]).is_some()
            })
            .collect();
        components.sort_by_key(|scc| scc.iter().map(|i| self.inner[*i].clone()).min());
        let scc = components.into_iter().next()?;
        Some(self.walk_cycle(&scc))
    }

    fn walk_cycle(&self, scc: &[NodeIndex]) -> Vec<String> {
        let members: BTreeSet<NodeIndex> = scc.iter().copied().collect();
        let Some(mut current) = scc.iter().copied().min_by_key(|i| self.inner[*i].clone()) else {
            return Vec::new();
        };
        let mut path: Vec<NodeIndex> = Vec::new();
        loop {
            if let Some(pos) = path.iter().position(|n| *n == current) {
                let mut cycle: Vec<String> =
                    path[pos..].iter().map(|i| self.inner[*i].clone()).collect();
                cycle.push(self.inner[current].clone());
                return cycle;
            }
            path.push(current);
            let next = self
                .inner
                .neighbors_directed(current, Direction::Outgoing)
                .filter(|n| members.contains(n))
                .min_by_key(|n| self.inner[*n].clone());
            match next {
                Some(n) => current = n,
                None => return path.iter().map(|i| self.inner[*i].clone()).collect(),
            }
        }
    }

    /// Declared resources in dependency order, ties broken by name.
    pub fn topological_order(&self) -> Vec<String> {
        let mut indegree: BTreeMap<NodeIndex, usize> = self
            .inner
            .node_indices()
            .map(|n| {
                (
                    n,
                    self.inner.neighbors_directed(n, Direction::Incoming).count(),
                )
            })
            .collect();
        let mut ready: BTreeSet<(String, NodeIndex)> = indegree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(n, _)| (self.inner[*n].clone(), *n))
            .collect();
        let mut order = Vec::with_capacity(self.declared.len());
        while let Some(entry) = ready.pop_first() {
            let (name, idx) = entry;
            if self.declared.contains(&name) {
                order.push(name);
            }
            for next in self.inner.neighbors_directed(idx, Direction::Outgoing) {
                if let Some(d) = indegree.get_mut(&next) {
                    *d -= 1;
                    if *d == 0 {
                        ready.insert((self.inner[next].clone(), next));
                    }
                }
            }
        }
        order
    }

    /// Order a run: every declared resource when `requested` is empty,
    /// otherwise just the requested names in dependency order.
    pub fn order(&self, requested: &[String]) -> Result<Vec<String>> {
        if requested.is_empty() {
            return Ok(self.topological_order());
        }
        for name in requested {
            if !self.declared.contains(name) {
                return Err(Error::UnknownResource(name.clone()));
            }
        }
        let wanted: BTreeSet<&str> = requested.iter().map(String::as_str).collect();
        Ok(self
            .topological_order()
            .into_iter()
            .filter(|n| wanted.contains(n.as_str()))
            .collect())
    }

    /// Every declared resource that depends on `name`, directly or transitively.
    pub fn dependents(&self, name: &str) -> BTreeSet<String> {
        let Some(start) = self.index.get(name) else {
            return BTreeSet::new();
        };
        let mut out = BTreeSet::new();
        let mut bfs = Bfs::new(&self.inner, *start);
        while let Some(idx) = bfs.next(&self.inner) {
            if idx != *start && self.declared.contains(&self.inner[idx]) {
                out.insert(self.inner[idx].clone());
            }
        }
        out
    }
}

// src/workspace/graph.rs

use std::collections::{BTreeMap, HashMap};

use petgraph::algo::{is_cyclic_directed, tarjan_scc};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;

use crate::errors::ConfigError;

use super::Package;

/// The package dependency DAG. Edge `A → B` means "A depends on B".
///
/// The graph is validated once at construction and read-only afterwards;
/// traversal hands out names, and [`WorkspaceGraph::package`] resolves them
/// back to records.
#[derive(Debug)]
pub struct WorkspaceGraph {
    graph: DiGraph<String, ()>,
    indices: HashMap<String, NodeIndex>,
    packages: BTreeMap<String, Package>,
}

impl WorkspaceGraph {
    pub fn new(packages: Vec<Package>) -> Result<Self, ConfigError> {
        let mut graph = DiGraph::new();
        let mut indices = HashMap::new();
        let mut by_name = BTreeMap::new();

        for package in &packages {
            let index = graph.add_node(package.name.clone());
            indices.insert(package.name.clone(), index);
        }

        for package in packages {
            let from = indices[&package.name];
            for dep in &package.dependencies {
                // Names that are not workspace members are external and
                // covered by the external-deps hash.
                if let Some(&to) = indices.get(dep) {
                    graph.add_edge(from, to, ());
                }
            }
            by_name.insert(package.name.clone(), package);
        }

        if is_cyclic_directed(&graph) {
            let cycle = tarjan_scc(&graph)
                .into_iter()
                .find(|scc| scc.len() > 1)
                .map(|scc| {
                    let mut names: Vec<&str> =
                        scc.iter().map(|&idx| graph[idx].as_str()).collect();
                    names.sort();
                    names.join(", ")
                })
                .unwrap_or_default();
            return Err(ConfigError::Cycle(cycle));
        }

        Ok(Self {
            graph,
            indices,
            packages: by_name,
        })
    }

    pub fn package(&self, name: &str) -> Option<&Package> {
        self.packages.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.packages.contains_key(name)
    }

    /// All package names in sorted order.
    pub fn package_names(&self) -> impl Iterator<Item = &str> {
        self.packages.keys().map(|s| s.as_str())
    }

    /// Immediate dependencies of a package, sorted.
    pub fn dependencies_of(&self, name: &str) -> Vec<&str> {
        let Some(&index) = self.indices.get(name) else {
            return Vec::new();
        };
        let mut deps: Vec<&str> = self
            .graph
            .neighbors_directed(index, Direction::Outgoing)
            .map(|idx| self.graph[idx].as_str())
            .collect();
        deps.sort();
        deps
    }

    /// Immediate dependents of a package, sorted.
    pub fn dependents_of(&self, name: &str) -> Vec<&str> {
        let Some(&index) = self.indices.get(name) else {
            return Vec::new();
        };
        let mut deps: Vec<&str> = self
            .graph
            .neighbors_directed(index, Direction::Incoming)
            .map(|idx| self.graph[idx].as_str())
            .collect();
        deps.sort();
        deps
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }
}

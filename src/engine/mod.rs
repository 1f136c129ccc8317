// src/engine/mod.rs

//! The task graph.
//!
//! - [`TaskId`] names a vertex: `(package, task)`, rendered `pkg#task`.
//! - [`TaskNode`] carries the resolved definition, command, and directory.
//! - [`TaskGraph`] is the validated DAG with a synthetic root; built once by
//!   [`builder::EngineBuilder`], read-only during execution.
//!
//! Edges point from a dependent to its dependency: `A → B` means "A needs B
//! to finish first".

pub mod builder;

use std::collections::HashMap;
use std::fmt;

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Dfs, Reversed};
use petgraph::Direction;
use serde::Serialize;

use crate::config::pipeline::ROOT_PKG_NAME;
use crate::config::TaskDefinition;
use crate::paths::AnchoredPath;

pub use builder::EngineBuilder;

/// The `(package, task)` pair identifying one task vertex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(into = "String")]
pub struct TaskId {
    package: String,
    task: String,
}

impl TaskId {
    pub fn new(package: impl Into<String>, task: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            task: task.into(),
        }
    }

    pub fn root_task(task: impl Into<String>) -> Self {
        Self::new(ROOT_PKG_NAME, task)
    }

    /// Parse `pkg#task`. A bare task name has no package and is not a
    /// `TaskId`; callers resolve those against a package list first.
    pub fn parse(s: &str) -> Option<Self> {
        let (package, task) = s.split_once('#')?;
        Some(Self::new(package, task))
    }

    pub fn package(&self) -> &str {
        &self.package
    }

    pub fn task(&self) -> &str {
        &self.task
    }

    pub fn is_root_task(&self) -> bool {
        self.package == ROOT_PKG_NAME
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.package, self.task)
    }
}

impl From<TaskId> for String {
    fn from(id: TaskId) -> String {
        id.to_string()
    }
}

/// One vertex of the task graph.
#[derive(Debug, Clone)]
pub struct TaskNode {
    pub id: TaskId,
    pub definition: TaskDefinition,
    /// The package's script command, if the package defines the script.
    /// `None` nodes are visited but never spawned.
    pub command: Option<String>,
    /// Package directory, repo-relative.
    pub dir: AnchoredPath,
}

/// The validated task DAG. The synthetic root node carries no
/// [`TaskNode`]; every traversal filters it out.
#[derive(Debug)]
pub struct TaskGraph {
    graph: DiGraph<Option<TaskNode>, ()>,
    indices: HashMap<TaskId, NodeIndex>,
}

impl TaskGraph {
    pub(crate) fn from_parts(
        graph: DiGraph<Option<TaskNode>, ()>,
        indices: HashMap<TaskId, NodeIndex>,
    ) -> Self {
        Self { graph, indices }
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.indices.contains_key(id)
    }

    pub fn node(&self, id: &TaskId) -> Option<&TaskNode> {
        let index = self.indices.get(id)?;
        self.graph[*index].as_ref()
    }

    /// Task ids in sorted order. Iteration over the graph is always through
    /// this or [`TaskGraph::topological_order`] so output is deterministic.
    pub fn task_ids(&self) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self.indices.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Direct dependencies of a task, sorted, root excluded.
    pub fn dependencies(&self, id: &TaskId) -> Vec<TaskId> {
        self.neighbors(id, Direction::Outgoing)
    }

    /// Direct dependents of a task, sorted.
    pub fn dependents(&self, id: &TaskId) -> Vec<TaskId> {
        self.neighbors(id, Direction::Incoming)
    }

    fn neighbors(&self, id: &TaskId, direction: Direction) -> Vec<TaskId> {
        let Some(&index) = self.indices.get(id) else {
            return Vec::new();
        };
        let mut out: Vec<TaskId> = self
            .graph
            .neighbors_directed(index, direction)
            .filter_map(|idx| self.graph[idx].as_ref())
            .map(|node| node.id.clone())
            .collect();
        out.sort();
        out
    }

    /// Every task reachable through dependency edges, sorted, self excluded.
    pub fn transitive_dependencies(&self, id: &TaskId) -> Vec<TaskId> {
        self.reachable(id, false)
    }

    /// Every task that transitively depends on `id`, sorted, self excluded.
    pub fn transitive_dependents(&self, id: &TaskId) -> Vec<TaskId> {
        self.reachable(id, true)
    }

    fn reachable(&self, id: &TaskId, reverse: bool) -> Vec<TaskId> {
        let Some(&start) = self.indices.get(id) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        let mut collect = |idx: NodeIndex| {
            if idx != start {
                if let Some(node) = self.graph[idx].as_ref() {
                    out.push(node.id.clone());
                }
            }
        };
        if reverse {
            let reversed = Reversed(&self.graph);
            let mut dfs = Dfs::new(&reversed, start);
            while let Some(idx) = dfs.next(&reversed) {
                collect(idx);
            }
        } else {
            let mut dfs = Dfs::new(&self.graph, start);
            while let Some(idx) = dfs.next(&self.graph) {
                collect(idx);
            }
        }
        out.sort();
        out
    }

    /// Dependencies-first order. Ties are broken by task id so two runs of
    /// the same graph hash in the same order.
    pub fn topological_order(&self) -> Vec<TaskId> {
        let mut in_flight: Vec<TaskId> = self.task_ids();
        let mut done: std::collections::HashSet<TaskId> = Default::default();
        let mut out = Vec::with_capacity(in_flight.len());

        // Kahn's algorithm over the sorted id list; O(n²) worst case but the
        // graph is small and the determinism is worth it.
        while !in_flight.is_empty() {
            let before = out.len();
            in_flight.retain(|id| {
                let ready = self
                    .dependencies(id)
                    .iter()
                    .all(|dep| done.contains(dep));
                if ready {
                    out.push(id.clone());
                }
                !ready
            });
            for id in &out[before..] {
                done.insert(id.clone());
            }
            if out.len() == before {
                // Cycles are rejected at build time; this is unreachable but
                // avoids looping forever on a bug.
                break;
            }
        }
        out
    }

    pub(crate) fn petgraph(&self) -> &DiGraph<Option<TaskNode>, ()> {
        &self.graph
    }

    /// Graphviz rendering for `--graph`. The synthetic root appears as
    /// `___ROOT___` so leaves are visible.
    pub fn to_dot(&self) -> String {
        let label = |idx: NodeIndex| -> String {
            match self.graph[idx].as_ref() {
                Some(node) => node.id.to_string(),
                None => "___ROOT___".to_string(),
            }
        };

        let mut edges: Vec<String> = self
            .graph
            .edge_indices()
            .filter_map(|edge| self.graph.edge_endpoints(edge))
            .map(|(from, to)| {
                format!("\t\"[root] {}\" -> \"[root] {}\"", label(from), label(to))
            })
            .collect();
        edges.sort();

        let mut out = String::from("digraph {\n");
        for edge in edges {
            out.push_str(&edge);
            out.push('\n');
        }
        out.push_str("}\n");
        out
    }
}

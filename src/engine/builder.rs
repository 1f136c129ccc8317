// src/engine/builder.rs

//! Task graph construction.
//!
//! The builder expands `requested tasks × filtered packages` into concrete
//! [`TaskNode`]s, then walks each node's normalized dependencies:
//!
//! - same-package entries add an edge within the package;
//! - `pkg#task` entries add an edge to that exact node;
//! - topological entries fan out over the package's workspace dependencies,
//!   recursively constructing nodes for packages outside the filter.
//!
//! Validation happens here, before anything runs: unknown tasks and
//! packages, self-dependencies, cycles, dependents of persistent tasks, and
//! root tasks that would re-enter the runner.

use std::collections::{HashMap, HashSet, VecDeque};

use petgraph::algo::{is_cyclic_directed, tarjan_scc};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use tracing::debug;

use crate::config::pipeline::ROOT_PKG_NAME;
use crate::config::{Pipeline, TaskDependency};
use crate::errors::ConfigError;
use crate::workspace::WorkspaceGraph;

use super::{TaskGraph, TaskId, TaskNode};

pub struct EngineBuilder<'a> {
    workspace: &'a WorkspaceGraph,
    pipeline: &'a Pipeline,
    parallel: bool,
    tasks_only: bool,
}

impl<'a> EngineBuilder<'a> {
    pub fn new(workspace: &'a WorkspaceGraph, pipeline: &'a Pipeline) -> Self {
        Self {
            workspace,
            pipeline,
            parallel: false,
            tasks_only: false,
        }
    }

    /// Run every task independently: no dependency edges at all.
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Run only the requested tasks, without their dependencies.
    pub fn with_tasks_only(mut self, tasks_only: bool) -> Self {
        self.tasks_only = tasks_only;
        self
    }

    /// Build and validate the task graph for `tasks` over `packages`.
    pub fn build(
        &self,
        tasks: &[String],
        packages: &[String],
    ) -> Result<TaskGraph, ConfigError> {
        let mut graph: DiGraph<Option<TaskNode>, ()> = DiGraph::new();
        let mut indices: HashMap<TaskId, NodeIndex> = HashMap::new();
        let root = graph.add_node(None);

        let seeds = self.seed_tasks(tasks, packages)?;
        let expand_dependencies = !(self.parallel || self.tasks_only);

        let mut queue: VecDeque<TaskId> = seeds.into();
        let mut visited: HashSet<TaskId> = HashSet::new();

        while let Some(id) = queue.pop_front() {
            if !visited.insert(id.clone()) {
                continue;
            }
            let index = self.ensure_node(&mut graph, &mut indices, &id)?;

            if !expand_dependencies {
                continue;
            }

            let definition = self
                .pipeline
                .task_definition(id.package(), id.task())
                .expect("ensure_node validated the definition");

            let mut targets: Vec<TaskId> = Vec::new();

            for topo_task in &definition.topological_dependencies {
                for dep_pkg in self.workspace.dependencies_of(id.package()) {
                    // A dependency package without a matching pipeline entry
                    // contributes nothing to this task.
                    if self.pipeline.task_definition(dep_pkg, topo_task).is_some() {
                        targets.push(TaskId::new(dep_pkg, topo_task.clone()));
                    }
                }
            }

            for dep in &definition.task_dependencies {
                match dep {
                    TaskDependency::Same(task) => {
                        targets.push(TaskId::new(id.package(), task.clone()));
                    }
                    TaskDependency::Package { package, task } => {
                        if !self.workspace.contains(package) {
                            return Err(ConfigError::UnknownPackage {
                                package: package.clone(),
                                task_id: format!("{package}#{task}"),
                            });
                        }
                        targets.push(TaskId::new(package.clone(), task.clone()));
                    }
                    TaskDependency::Topological(_) => {
                        unreachable!("topological deps are normalized into their own list")
                    }
                }
            }

            for target in targets {
                if target == id {
                    return Err(ConfigError::SelfDependency(id.to_string()));
                }
                let target_index = self.ensure_node(&mut graph, &mut indices, &target)?;
                graph.add_edge(index, target_index, ());
                queue.push_back(target);
            }
        }

        // Collapse the root: leaves depend on the synthetic root node.
        for (_, &index) in indices.iter() {
            if graph
                .neighbors_directed(index, Direction::Outgoing)
                .next()
                .is_none()
            {
                graph.add_edge(index, root, ());
            }
        }

        let task_graph = TaskGraph::from_parts(graph, indices);
        self.validate(&task_graph)?;

        debug!(
            tasks = task_graph.len(),
            parallel = self.parallel,
            tasks_only = self.tasks_only,
            "built task graph"
        );
        Ok(task_graph)
    }

    /// Resolve the requested task names into concrete seed ids.
    fn seed_tasks(
        &self,
        tasks: &[String],
        packages: &[String],
    ) -> Result<Vec<TaskId>, ConfigError> {
        let mut seeds = Vec::new();

        for requested in tasks {
            if let Some(id) = TaskId::parse(requested) {
                if !self.workspace.contains(id.package()) {
                    return Err(ConfigError::UnknownPackage {
                        package: id.package().to_string(),
                        task_id: requested.clone(),
                    });
                }
                if self
                    .pipeline
                    .task_definition(id.package(), id.task())
                    .is_none()
                {
                    return Err(ConfigError::UnknownTask(requested.clone()));
                }
                seeds.push(id);
                continue;
            }

            if !self.pipeline.has_task(requested) {
                return Err(ConfigError::UnknownTask(requested.clone()));
            }

            for package in packages {
                if package == ROOT_PKG_NAME {
                    // Root tasks run only when declared explicitly as
                    // `//#task`; a bare pipeline entry never implies one.
                    if self.pipeline.has_qualified_task(ROOT_PKG_NAME, requested) {
                        seeds.push(TaskId::root_task(requested.clone()));
                    }
                } else if self
                    .pipeline
                    .task_definition(package, requested)
                    .is_some()
                {
                    seeds.push(TaskId::new(package.clone(), requested.clone()));
                }
            }
        }

        Ok(seeds)
    }

    /// Create the node for `id` if absent, resolving its definition and
    /// command.
    fn ensure_node(
        &self,
        graph: &mut DiGraph<Option<TaskNode>, ()>,
        indices: &mut HashMap<TaskId, NodeIndex>,
        id: &TaskId,
    ) -> Result<NodeIndex, ConfigError> {
        if let Some(&index) = indices.get(id) {
            return Ok(index);
        }

        let package = self.workspace.package(id.package()).ok_or_else(|| {
            ConfigError::UnknownPackage {
                package: id.package().to_string(),
                task_id: id.to_string(),
            }
        })?;
        let definition = self
            .pipeline
            .task_definition(id.package(), id.task())
            .ok_or_else(|| ConfigError::UnknownTask(id.to_string()))?
            .clone();

        let node = TaskNode {
            id: id.clone(),
            definition,
            command: package.command_for(id.task()).map(|s| s.to_string()),
            dir: package.dir.clone(),
        };
        let index = graph.add_node(Some(node));
        indices.insert(id.clone(), index);
        Ok(index)
    }

    fn validate(&self, graph: &TaskGraph) -> Result<(), ConfigError> {
        // Nothing may depend on a persistent task: it never exits, so the
        // dependent would never start.
        for id in graph.task_ids() {
            let node = graph.node(&id).expect("listed id resolves");
            if !node.definition.persistent {
                continue;
            }
            if let Some(dependent) = graph.dependents(&id).first() {
                return Err(ConfigError::PersistentDependency {
                    persistent: id.clone(),
                    dependent: dependent.clone(),
                });
            }
        }

        // A root task that re-invokes the runner would recurse forever.
        for id in graph.task_ids() {
            if !id.is_root_task() {
                continue;
            }
            let node = graph.node(&id).expect("listed id resolves");
            if let Some(command) = &node.command {
                if command_invokes_runner(command) {
                    return Err(ConfigError::RecursiveRootTask {
                        task: id.task().to_string(),
                        command: command.clone(),
                    });
                }
            }
        }

        if is_cyclic_directed(graph.petgraph()) {
            let cycle = tarjan_scc(graph.petgraph())
                .into_iter()
                .find(|scc| scc.len() > 1)
                .map(|scc| {
                    let mut names: Vec<String> = scc
                        .iter()
                        .filter_map(|&idx| graph.petgraph()[idx].as_ref())
                        .map(|node| node.id.to_string())
                        .collect();
                    names.sort();
                    names.join(", ")
                })
                .unwrap_or_default();
            return Err(ConfigError::Cycle(cycle));
        }

        Ok(())
    }
}

const RUNNER_BINARY: &str = "monorun";

fn command_invokes_runner(command: &str) -> bool {
    command.split_whitespace().any(|token| {
        token == RUNNER_BINARY || token.ends_with(&format!("/{RUNNER_BINARY}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::raw::RawRootConfig;
    use crate::config::RootConfig;
    use crate::paths::AnchoredPath;
    use crate::workspace::Package;

    fn workspace(edges: &[(&str, &[&str])]) -> WorkspaceGraph {
        let mut packages: Vec<Package> = edges
            .iter()
            .map(|(name, deps)| Package {
                name: name.to_string(),
                dir: AnchoredPath::new(format!("packages/{name}")).unwrap(),
                scripts: [("build".to_string(), format!("build {name}"))]
                    .into_iter()
                    .collect(),
                dependencies: deps.iter().map(|d| d.to_string()).collect(),
                manifest_dependencies: Vec::new(),
            external_deps_hash: String::new(),
            })
            .collect();
        packages.push(Package {
            name: ROOT_PKG_NAME.to_string(),
            dir: AnchoredPath::new("").unwrap(),
            scripts: Default::default(),
            dependencies: Vec::new(),
            manifest_dependencies: Vec::new(),
            external_deps_hash: String::new(),
        });
        WorkspaceGraph::new(packages).unwrap()
    }

    fn pipeline(json: &str) -> Pipeline {
        let raw: RawRootConfig = serde_json::from_str(json).unwrap();
        RootConfig::from_raw(raw).unwrap().pipeline
    }

    fn build(
        workspace: &WorkspaceGraph,
        pipeline: &Pipeline,
        tasks: &[&str],
        packages: &[&str],
    ) -> Result<TaskGraph, ConfigError> {
        EngineBuilder::new(workspace, pipeline).build(
            &tasks.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
            &packages.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
        )
    }

    #[test]
    fn filter_pulls_in_transitive_dependencies() {
        // app-a → lib-a → lib-b → lib-d; app-b → lib-b, lib-c.
        let workspace = workspace(&[
            ("app-a", &["lib-a"]),
            ("app-b", &["lib-b", "lib-c"]),
            ("lib-a", &["lib-b"]),
            ("lib-b", &["lib-d"]),
            ("lib-c", &[]),
            ("lib-d", &[]),
        ]);
        let pipeline = pipeline(r#"{"pipeline": {"build": {"dependsOn": ["^build"]}}}"#);

        let graph = build(&workspace, &pipeline, &["build"], &["app-b"]).unwrap();

        let ids: Vec<String> = graph.task_ids().iter().map(|id| id.to_string()).collect();
        assert_eq!(
            ids,
            vec!["app-b#build", "lib-b#build", "lib-c#build", "lib-d#build"]
        );
        assert_eq!(
            graph.dependencies(&TaskId::new("app-b", "build")),
            vec![TaskId::new("lib-b", "build"), TaskId::new("lib-c", "build")]
        );
        assert_eq!(
            graph.dependencies(&TaskId::new("lib-b", "build")),
            vec![TaskId::new("lib-d", "build")]
        );
        assert!(graph.dependencies(&TaskId::new("lib-c", "build")).is_empty());
    }

    #[test]
    fn persistent_tasks_reject_dependents() {
        let workspace = workspace(&[
            ("app-a", &["pkg-b"]),
            ("pkg-b", &["pkg-z"]),
            ("pkg-z", &[]),
        ]);
        let pipeline = pipeline(
            r#"{"pipeline": {
                "build": {"dependsOn": ["^build"]},
                "pkg-z#dev": {"persistent": true},
                "pkg-b#build": {"dependsOn": ["pkg-z#dev"]}
            }}"#,
        );

        let err = build(&workspace, &pipeline, &["build"], &["app-a", "pkg-b", "pkg-z"])
            .unwrap_err();
        match err {
            ConfigError::PersistentDependency {
                persistent,
                dependent,
            } => {
                assert_eq!(persistent.to_string(), "pkg-z#dev");
                assert_eq!(dependent.to_string(), "pkg-b#build");
            }
            other => panic!("expected persistent error, got {other}"),
        }
    }

    #[test]
    fn self_dependency_is_rejected() {
        let workspace = workspace(&[("app", &[])]);
        let pipeline = pipeline(r#"{"pipeline": {"build": {"dependsOn": ["build"]}}}"#);
        let err = build(&workspace, &pipeline, &["build"], &["app"]).unwrap_err();
        assert!(matches!(err, ConfigError::SelfDependency(_)));
    }

    #[test]
    fn unknown_task_is_rejected() {
        let workspace = workspace(&[("app", &[])]);
        let pipeline = pipeline(r#"{"pipeline": {"build": {}}}"#);
        let err = build(&workspace, &pipeline, &["deploy"], &["app"]).unwrap_err();
        match err {
            ConfigError::UnknownTask(task) => assert_eq!(task, "deploy"),
            other => panic!("expected unknown task, got {other}"),
        }
    }

    #[test]
    fn unknown_package_reference_is_rejected() {
        let workspace = workspace(&[("app", &[])]);
        let pipeline =
            pipeline(r#"{"pipeline": {"build": {"dependsOn": ["ghost#build"]}}}"#);
        let err = build(&workspace, &pipeline, &["build"], &["app"]).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownPackage { .. }));
    }

    #[test]
    fn cross_package_task_cycle_is_rejected() {
        let workspace = workspace(&[("a", &[]), ("b", &[])]);
        let pipeline = pipeline(
            r#"{"pipeline": {
                "a#build": {"dependsOn": ["b#build"]},
                "b#build": {"dependsOn": ["a#build"]}
            }}"#,
        );
        let err = build(&workspace, &pipeline, &["a#build"], &["a", "b"]).unwrap_err();
        assert!(matches!(err, ConfigError::Cycle(_)));
    }

    #[test]
    fn parallel_strips_dependency_edges() {
        let workspace = workspace(&[("app", &["lib"]), ("lib", &[])]);
        let pipeline = pipeline(r#"{"pipeline": {"build": {"dependsOn": ["^build"]}}}"#);

        let graph = EngineBuilder::new(&workspace, &pipeline)
            .with_parallel(true)
            .build(&["build".to_string()], &["app".to_string(), "lib".to_string()])
            .unwrap();

        for id in graph.task_ids() {
            assert!(graph.dependencies(&id).is_empty());
        }
        assert_eq!(graph.len(), 2);
    }

    #[test]
    fn tasks_only_keeps_requested_tasks() {
        let workspace = workspace(&[("app", &["lib"]), ("lib", &[])]);
        let pipeline = pipeline(
            r#"{"pipeline": {
                "build": {"dependsOn": ["^build"]},
                "test": {"dependsOn": ["build"]}
            }}"#,
        );

        let graph = EngineBuilder::new(&workspace, &pipeline)
            .with_tasks_only(true)
            .build(&["test".to_string()], &["app".to_string(), "lib".to_string()])
            .unwrap();

        let ids: Vec<String> = graph.task_ids().iter().map(|id| id.to_string()).collect();
        assert_eq!(ids, vec!["app#test", "lib#test"]);
        for id in graph.task_ids() {
            assert!(graph.dependencies(&id).is_empty());
        }
    }

    #[test]
    fn root_task_requires_explicit_declaration() {
        let workspace = workspace(&[("app", &[])]);
        let pipeline = pipeline(r#"{"pipeline": {"build": {}}}"#);
        let graph = build(&workspace, &pipeline, &["build"], &["//", "app"]).unwrap();
        let ids: Vec<String> = graph.task_ids().iter().map(|id| id.to_string()).collect();
        assert_eq!(ids, vec!["app#build"]);
    }

    #[test]
    fn recursive_root_task_is_rejected() {
        let mut packages = vec![Package {
            name: ROOT_PKG_NAME.to_string(),
            dir: AnchoredPath::new("").unwrap(),
            scripts: [("everything".to_string(), "monorun run build".to_string())]
                .into_iter()
                .collect(),
            dependencies: Vec::new(),
            manifest_dependencies: Vec::new(),
            external_deps_hash: String::new(),
        }];
        packages.push(Package {
            name: "app".to_string(),
            dir: AnchoredPath::new("packages/app").unwrap(),
            scripts: Default::default(),
            dependencies: Vec::new(),
            manifest_dependencies: Vec::new(),
            external_deps_hash: String::new(),
        });
        let workspace = WorkspaceGraph::new(packages).unwrap();
        let pipeline = pipeline(r#"{"pipeline": {"//#everything": {}}}"#);

        let err = build(&workspace, &pipeline, &["everything"], &["//", "app"]).unwrap_err();
        assert!(matches!(err, ConfigError::RecursiveRootTask { .. }));
    }
}

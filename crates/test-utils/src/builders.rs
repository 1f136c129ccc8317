// crates/test-utils/src/builders.rs

#![allow(dead_code)]

use std::collections::BTreeMap;

use monorun::config::raw::{RawRootConfig, RawTaskDefinition};
use monorun::config::{Pipeline, RootConfig};
use monorun::paths::AnchoredPath;
use monorun::workspace::{Package, WorkspaceGraph};

/// Builder for raw pipeline entries.
pub struct TaskDefinitionBuilder {
    raw: RawTaskDefinition,
}

impl TaskDefinitionBuilder {
    pub fn new() -> Self {
        Self {
            raw: RawTaskDefinition::default(),
        }
    }

    pub fn outputs(mut self, globs: &[&str]) -> Self {
        self.raw.outputs = Some(globs.iter().map(|g| g.to_string()).collect());
        self
    }

    pub fn depends_on(mut self, deps: &[&str]) -> Self {
        self.raw.depends_on = Some(deps.iter().map(|d| d.to_string()).collect());
        self
    }

    pub fn env(mut self, names: &[&str]) -> Self {
        self.raw.env = Some(names.iter().map(|n| n.to_string()).collect());
        self
    }

    pub fn inputs(mut self, globs: &[&str]) -> Self {
        self.raw.inputs = Some(globs.iter().map(|g| g.to_string()).collect());
        self
    }

    pub fn cache(mut self, cache: bool) -> Self {
        self.raw.cache = Some(cache);
        self
    }

    pub fn persistent(mut self, persistent: bool) -> Self {
        self.raw.persistent = Some(persistent);
        self
    }

    pub fn pass_through_env(mut self, names: &[&str]) -> Self {
        self.raw.pass_through_env = Some(names.iter().map(|n| n.to_string()).collect());
        self
    }

    pub fn build(self) -> RawTaskDefinition {
        self.raw
    }
}

impl Default for TaskDefinitionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for a normalized [`Pipeline`] (by way of the raw config).
pub struct PipelineBuilder {
    raw: RawRootConfig,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self {
            raw: RawRootConfig::default(),
        }
    }

    pub fn task(mut self, key: &str, definition: RawTaskDefinition) -> Self {
        self.raw.pipeline.insert(key.to_string(), definition);
        self
    }

    pub fn global_env(mut self, names: &[&str]) -> Self {
        self.raw.global_env = names.iter().map(|n| n.to_string()).collect();
        self
    }

    pub fn global_dependencies(mut self, globs: &[&str]) -> Self {
        self.raw.global_dependencies = globs.iter().map(|g| g.to_string()).collect();
        self
    }

    pub fn build_root_config(self) -> RootConfig {
        RootConfig::from_raw(self.raw).expect("builder produces valid config")
    }

    pub fn build(self) -> Pipeline {
        self.build_root_config().pipeline
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for an in-memory workspace graph.
pub struct WorkspaceBuilder {
    packages: Vec<Package>,
    with_root: bool,
}

impl WorkspaceBuilder {
    pub fn new() -> Self {
        Self {
            packages: Vec::new(),
            with_root: true,
        }
    }

    pub fn package(mut self, name: &str, deps: &[&str], scripts: &[(&str, &str)]) -> Self {
        self.packages.push(Package {
            name: name.to_string(),
            dir: AnchoredPath::new(format!("packages/{name}")).unwrap(),
            scripts: scripts
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
            manifest_dependencies: deps.iter().map(|d| d.to_string()).collect(),
            external_deps_hash: format!("external-{name}"),
        });
        self
    }

    pub fn without_root(mut self) -> Self {
        self.with_root = false;
        self
    }

    pub fn build(mut self) -> WorkspaceGraph {
        if self.with_root {
            self.packages.push(Package {
                name: "//".to_string(),
                dir: AnchoredPath::new("").unwrap(),
                scripts: BTreeMap::new(),
                dependencies: Vec::new(),
                manifest_dependencies: Vec::new(),
                external_deps_hash: "external-root".to_string(),
            });
        }
        WorkspaceGraph::new(self.packages).expect("builder produces an acyclic workspace")
    }
}

impl Default for WorkspaceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

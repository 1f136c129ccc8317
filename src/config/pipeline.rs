// src/config/pipeline.rs

//! Normalized pipeline model.
//!
//! Raw `dependsOn` entries carry lexical markers (`^` topological, `$` legacy
//! env, `#` cross-package). Normalization turns each entry into a
//! [`TaskDependency`] variant so later stages — the engine, the hasher — work
//! on structure instead of string prefixes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::ConfigError;

use super::raw::{RawRootConfig, RawTaskDefinition, RawWorkspaceConfig, RemoteCacheOptions};

const TOPOLOGICAL_MARKER: char = '^';
const ENV_MARKER: char = '$';
const PACKAGE_TASK_SEPARATOR: char = '#';

/// Package name of the synthetic repository root.
pub const ROOT_PKG_NAME: &str = "//";

/// How much of a task's output reaches the terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputLogsMode {
    #[default]
    Full,
    None,
    HashOnly,
    NewOnly,
    ErrorsOnly,
}

impl OutputLogsMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputLogsMode::Full => "full",
            OutputLogsMode::None => "none",
            OutputLogsMode::HashOnly => "hash-only",
            OutputLogsMode::NewOnly => "new-only",
            OutputLogsMode::ErrorsOnly => "errors-only",
        }
    }
}

impl std::str::FromStr for OutputLogsMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(OutputLogsMode::Full),
            "none" => Ok(OutputLogsMode::None),
            "hash-only" => Ok(OutputLogsMode::HashOnly),
            "new-only" => Ok(OutputLogsMode::NewOnly),
            "errors-only" => Ok(OutputLogsMode::ErrorsOnly),
            other => Err(format!("invalid output mode: {other}")),
        }
    }
}

/// A normalized `dependsOn` entry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum TaskDependency {
    /// A task in the same package (`"prepare"`).
    Same(String),
    /// A fully qualified task in a specific package (`"web#codegen"`,
    /// `"//#setup"`).
    Package { package: String, task: String },
    /// A task in every workspace dependency of this package (`"^build"`).
    Topological(String),
}

impl TaskDependency {
    /// Stable structural form used by the hasher. Source strings never
    /// participate in fingerprints.
    pub fn canonical(&self) -> String {
        match self {
            TaskDependency::Same(task) => format!("same:{task}"),
            TaskDependency::Package { package, task } => format!("package:{package}#{task}"),
            TaskDependency::Topological(task) => format!("topo:{task}"),
        }
    }
}

/// Output file patterns, split at parse time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TaskOutputs {
    pub inclusions: Vec<String>,
    pub exclusions: Vec<String>,
}

impl TaskOutputs {
    pub fn is_empty(&self) -> bool {
        self.inclusions.is_empty() && self.exclusions.is_empty()
    }
}

/// A fully normalized pipeline entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDefinition {
    pub outputs: TaskOutputs,
    pub should_cache: bool,
    pub task_dependencies: Vec<TaskDependency>,
    pub topological_dependencies: Vec<String>,
    pub env_var_dependencies: Vec<String>,
    /// `None` means not configured (inherit / infer); `Some(vec![])` is an
    /// explicit empty list. The distinction feeds env-mode inference.
    pub pass_through_env: Option<Vec<String>>,
    pub dot_env: Option<Vec<String>>,
    pub inputs: Vec<String>,
    pub output_mode: OutputLogsMode,
    pub persistent: bool,
}

impl Default for TaskDefinition {
    fn default() -> Self {
        Self {
            outputs: TaskOutputs::default(),
            should_cache: true,
            task_dependencies: Vec::new(),
            topological_dependencies: Vec::new(),
            env_var_dependencies: Vec::new(),
            pass_through_env: None,
            dot_env: None,
            inputs: Vec::new(),
            output_mode: OutputLogsMode::Full,
            persistent: false,
        }
    }
}

impl TaskDefinition {
    /// Normalize a raw pipeline entry. `key` is only used in messages.
    pub fn from_raw(key: &str, raw: RawTaskDefinition) -> Result<Self, ConfigError> {
        let mut def = TaskDefinition::default();
        def.apply_raw(key, raw, false)?;
        Ok(def)
    }

    /// Merge a raw entry into `self`. With `is_override` set, only the keys a
    /// workspace may adjust are accepted; in particular `dependsOn` is the
    /// root's alone.
    fn apply_raw(
        &mut self,
        key: &str,
        raw: RawTaskDefinition,
        is_override: bool,
    ) -> Result<(), ConfigError> {
        if let Some(outputs) = raw.outputs {
            let (inclusions, exclusions) = crate::globwalk::split_negations(&outputs);
            self.outputs = TaskOutputs {
                inclusions,
                exclusions,
            };
            self.outputs.inclusions.sort();
            self.outputs.exclusions.sort();
        }

        if let Some(cache) = raw.cache {
            self.should_cache = cache;
        }

        match raw.depends_on {
            Some(_) if is_override => {
                return Err(ConfigError::InvalidOverride {
                    package: key.to_string(),
                    key: "dependsOn".to_string(),
                });
            }
            Some(depends_on) => {
                let mut task_deps = Vec::new();
                let mut topo_deps = Vec::new();
                for entry in depends_on {
                    if let Some(env_name) = entry.strip_prefix(ENV_MARKER) {
                        warn!(
                            entry = %entry,
                            "declaring an environment variable in \"dependsOn\" is deprecated; use the \"env\" key"
                        );
                        self.env_var_dependencies.push(env_name.to_string());
                    } else if let Some(task) = entry.strip_prefix(TOPOLOGICAL_MARKER) {
                        topo_deps.push(task.to_string());
                    } else {
                        task_deps.push(parse_task_reference(&entry));
                    }
                }
                task_deps.sort();
                task_deps.dedup();
                topo_deps.sort();
                topo_deps.dedup();
                self.task_dependencies = task_deps;
                self.topological_dependencies = topo_deps;
            }
            None => {}
        }

        if let Some(env) = raw.env {
            for name in &env {
                if name.starts_with(ENV_MARKER) {
                    return Err(ConfigError::EnvVarPrefix(name.clone()));
                }
            }
            self.env_var_dependencies.extend(env);
        }
        self.env_var_dependencies.sort();
        self.env_var_dependencies.dedup();

        if let Some(pass_through) = raw.pass_through_env {
            // `null` in an override means inherit; an explicit list (even
            // empty) replaces.
            let mut names = pass_through;
            names.sort();
            names.dedup();
            self.pass_through_env = Some(names);
        }

        if let Some(dot_env) = raw.dot_env {
            self.dot_env = Some(dot_env);
        }

        if let Some(inputs) = raw.inputs {
            // Inputs stay unsorted; the expanded files get sorted instead.
            self.inputs = inputs;
        }

        if let Some(mode) = raw.output_mode {
            self.output_mode = mode;
        }

        if let Some(persistent) = raw.persistent {
            self.persistent = persistent;
        }

        Ok(())
    }

    pub fn apply_override(
        &mut self,
        package: &str,
        raw: RawTaskDefinition,
    ) -> Result<(), ConfigError> {
        self.apply_raw(package, raw, true)
    }
}

fn parse_task_reference(entry: &str) -> TaskDependency {
    match entry.split_once(PACKAGE_TASK_SEPARATOR) {
        Some((package, task)) => TaskDependency::Package {
            package: package.to_string(),
            task: task.to_string(),
        },
        None => TaskDependency::Same(entry.to_string()),
    }
}

/// Split a pipeline key into `(package, task)` if it is package-qualified.
pub fn split_task_key(key: &str) -> Option<(&str, &str)> {
    key.split_once(PACKAGE_TASK_SEPARATOR)
}

/// The normalized pipeline: task (or `pkg#task`) keys → definitions.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    tasks: BTreeMap<String, TaskDefinition>,
}

impl Pipeline {
    pub fn from_tasks(tasks: BTreeMap<String, TaskDefinition>) -> Self {
        Self { tasks }
    }

    /// Resolve the definition for a concrete `(package, task)` pair. A
    /// package-qualified key wins over the bare task key.
    pub fn task_definition(&self, package: &str, task: &str) -> Option<&TaskDefinition> {
        self.tasks
            .get(&format!("{package}{PACKAGE_TASK_SEPARATOR}{task}"))
            .or_else(|| self.tasks.get(task))
    }

    /// Whether an explicit `pkg#task` entry exists.
    pub fn has_qualified_task(&self, package: &str, task: &str) -> bool {
        self.tasks
            .contains_key(&format!("{package}{PACKAGE_TASK_SEPARATOR}{task}"))
    }

    /// Whether `task` is runnable at all: defined either bare or under any
    /// package qualification.
    pub fn has_task(&self, task: &str) -> bool {
        self.tasks.keys().any(|key| {
            key == task || split_task_key(key).map(|(_, t)| t == task).unwrap_or(false)
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &TaskDefinition)> {
        self.tasks.iter()
    }

    pub fn insert(&mut self, key: String, def: TaskDefinition) {
        self.tasks.insert(key, def);
    }
}

/// The loaded, normalized root configuration.
#[derive(Debug, Clone, Default)]
pub struct RootConfig {
    pub global_dependencies: Vec<String>,
    pub global_env: Vec<String>,
    pub global_pass_through_env: Option<Vec<String>>,
    pub global_dot_env: Option<Vec<String>>,
    pub pipeline: Pipeline,
    pub remote_cache: RemoteCacheOptions,
}

impl RootConfig {
    pub fn from_raw(raw: RawRootConfig) -> Result<Self, ConfigError> {
        let mut global_env = Vec::new();
        let mut global_dependencies = Vec::new();

        for name in raw.global_env {
            if name.starts_with(ENV_MARKER) {
                return Err(ConfigError::EnvVarPrefix(name));
            }
            global_env.push(name);
        }

        // `$VAR` in globalDependencies is the legacy spelling of globalEnv.
        for entry in raw.global_dependencies {
            if let Some(env_name) = entry.strip_prefix(ENV_MARKER) {
                warn!(
                    entry = %entry,
                    "declaring an environment variable in \"globalDependencies\" is deprecated; use the \"globalEnv\" key"
                );
                global_env.push(env_name.to_string());
            } else {
                global_dependencies.push(entry);
            }
        }
        global_env.sort();
        global_env.dedup();
        global_dependencies.sort();

        let mut tasks = BTreeMap::new();
        for (key, raw_task) in raw.pipeline {
            let def = TaskDefinition::from_raw(&key, raw_task)?;
            tasks.insert(key, def);
        }

        Ok(Self {
            global_dependencies,
            global_env,
            global_pass_through_env: raw.global_pass_through_env,
            global_dot_env: raw.global_dot_env,
            pipeline: Pipeline::from_tasks(tasks),
            remote_cache: raw.remote_cache.unwrap_or_default(),
        })
    }

    /// Re-shape the pipeline for a single-package repository: bare keys
    /// become root tasks, package-qualified keys are rejected, and every
    /// same-package dependency must already be root-qualified.
    pub fn into_single_package(mut self) -> Result<Self, ConfigError> {
        let mut tasks = BTreeMap::new();
        for (key, def) in std::mem::take(&mut self.pipeline.tasks) {
            if let Some((package, _)) = split_task_key(&key) {
                if package != ROOT_PKG_NAME {
                    return Err(ConfigError::SinglePackageTask(key));
                }
                tasks.insert(key, def);
                continue;
            }

            for dep in &def.task_dependencies {
                match dep {
                    TaskDependency::Package { package, .. } if package == ROOT_PKG_NAME => {}
                    TaskDependency::Package { package, task } => {
                        return Err(ConfigError::SinglePackageTask(format!(
                            "{package}{PACKAGE_TASK_SEPARATOR}{task}"
                        )));
                    }
                    TaskDependency::Same(task) => {
                        return Err(ConfigError::SinglePackageTask(format!(
                            "{key} depends on \"{task}\"; use \"{ROOT_PKG_NAME}{PACKAGE_TASK_SEPARATOR}{task}\""
                        )));
                    }
                    TaskDependency::Topological(_) => {}
                }
            }
            tasks.insert(format!("{ROOT_PKG_NAME}{PACKAGE_TASK_SEPARATOR}{key}"), def);
        }
        self.pipeline = Pipeline::from_tasks(tasks);
        Ok(self)
    }

    /// Merge per-workspace overrides into the pipeline. Only the restricted
    /// key set may change; the override wins key-by-key.
    pub fn apply_workspace_overrides(
        &mut self,
        package: &str,
        overrides: RawWorkspaceConfig,
    ) -> Result<(), ConfigError> {
        for (task, raw) in overrides.pipeline {
            if split_task_key(&task).is_some() {
                return Err(ConfigError::InvalidOverride {
                    package: package.to_string(),
                    key: task,
                });
            }

            let qualified = format!("{package}{PACKAGE_TASK_SEPARATOR}{task}");
            let mut base = self
                .pipeline
                .task_definition(package, &task)
                .cloned()
                .unwrap_or_default();
            base.apply_override(package, raw)?;
            self.pipeline.insert(qualified, base);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_task(json: &str) -> RawTaskDefinition {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn depends_on_markers_become_variants() {
        let def = TaskDefinition::from_raw(
            "build",
            raw_task(r#"{"dependsOn": ["^build", "prepare", "web#codegen", "$NODE_ENV"]}"#),
        )
        .unwrap();

        assert_eq!(def.topological_dependencies, vec!["build"]);
        assert_eq!(
            def.task_dependencies,
            vec![
                TaskDependency::Package {
                    package: "web".to_string(),
                    task: "codegen".to_string()
                },
                TaskDependency::Same("prepare".to_string()),
            ]
        );
        // Legacy $VAR moved to env deps.
        assert_eq!(def.env_var_dependencies, vec!["NODE_ENV"]);
    }

    #[test]
    fn env_prefix_is_fatal() {
        let err = TaskDefinition::from_raw("build", raw_task(r#"{"env": ["$NODE_ENV"]}"#))
            .unwrap_err();
        assert!(matches!(err, ConfigError::EnvVarPrefix(_)));
    }

    #[test]
    fn outputs_split_on_negation() {
        let def = TaskDefinition::from_raw(
            "build",
            raw_task(r#"{"outputs": ["dist/**", "!dist/**/*.map"]}"#),
        )
        .unwrap();
        assert_eq!(def.outputs.inclusions, vec!["dist/**"]);
        assert_eq!(def.outputs.exclusions, vec!["dist/**/*.map"]);
    }

    #[test]
    fn cache_defaults_to_true() {
        let def = TaskDefinition::from_raw("build", raw_task("{}")).unwrap();
        assert!(def.should_cache);
        let def = TaskDefinition::from_raw("build", raw_task(r#"{"cache": false}"#)).unwrap();
        assert!(!def.should_cache);
    }

    #[test]
    fn overrides_cannot_touch_depends_on() {
        let mut def = TaskDefinition::from_raw("build", raw_task("{}")).unwrap();
        let err = def
            .apply_override("web", raw_task(r#"{"dependsOn": ["prepare"]}"#))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidOverride { .. }));
    }

    #[test]
    fn override_merges_key_by_key() {
        let mut def = TaskDefinition::from_raw(
            "build",
            raw_task(r#"{"outputs": ["dist/**"], "env": ["NODE_ENV"], "dependsOn": ["^build"]}"#),
        )
        .unwrap();
        def.apply_override("web", raw_task(r#"{"outputs": ["build/**"], "cache": false}"#))
            .unwrap();

        assert_eq!(def.outputs.inclusions, vec!["build/**"]);
        assert!(!def.should_cache);
        // Untouched keys inherit from the root entry.
        assert_eq!(def.env_var_dependencies, vec!["NODE_ENV"]);
        assert_eq!(def.topological_dependencies, vec!["build"]);
    }

    #[test]
    fn single_package_rejects_cross_package_keys() {
        let raw: RawRootConfig =
            serde_json::from_str(r#"{"pipeline": {"web#build": {}}}"#).unwrap();
        let err = RootConfig::from_raw(raw)
            .unwrap()
            .into_single_package()
            .unwrap_err();
        assert!(matches!(err, ConfigError::SinglePackageTask(_)));
    }

    #[test]
    fn single_package_rekeys_bare_tasks() {
        let raw: RawRootConfig = serde_json::from_str(
            r#"{"pipeline": {"build": {}, "test": {"dependsOn": ["//#build"]}}}"#,
        )
        .unwrap();
        let config = RootConfig::from_raw(raw)
            .unwrap()
            .into_single_package()
            .unwrap();
        assert!(config.pipeline.task_definition("//", "build").is_some());
        assert!(config.pipeline.task_definition("//", "test").is_some());
    }

    #[test]
    fn package_qualified_definition_wins() {
        let raw: RawRootConfig = serde_json::from_str(
            r#"{"pipeline": {"build": {"cache": true}, "web#build": {"cache": false}}}"#,
        )
        .unwrap();
        let config = RootConfig::from_raw(raw).unwrap();
        assert!(!config.pipeline.task_definition("web", "build").unwrap().should_cache);
        assert!(config.pipeline.task_definition("docs", "build").unwrap().should_cache);
    }
}

// src/run/summary.rs

//! Run and task summaries.
//!
//! One [`TaskSummary`] accumulates per task as it executes (or as the dry
//! run visits it); the [`RunSummary`] wraps them with run-wide metadata and
//! renders either the `--summarize` JSON file, the dry-run JSON document, or
//! the dry-run text tables. The JSON key set is stable: external tooling
//! parses it.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde_json::json;

use crate::cache::ItemStatus;
use crate::config::{TaskDefinition, TaskDependency};
use crate::engine::TaskId;
use crate::paths::{AbsPath, AnchoredPath};
use crate::scm::ScmState;
use crate::taskhash::{EnvMode, GlobalHashInputs};
use crate::workspace::WorkspaceGraph;

pub const RUNNER_VERSION: &str = env!("CARGO_PKG_VERSION");
const SUMMARY_SCHEMA_VERSION: &str = "0";

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Terminal state of one task's execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskState {
    Built,
    Cached,
    Failed,
    Skipped,
    Canceled,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskExecutionSummary {
    pub start_time: u64,
    pub end_time: u64,
    pub state: TaskState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskExecutionSummary {
    pub fn duration_ms(&self) -> u64 {
        self.end_time.saturating_sub(self.start_time)
    }
}

/// Cache block for summaries: probe result plus a rendered status.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheSummary {
    pub local: bool,
    pub remote: bool,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_saved: Option<u64>,
}

impl From<ItemStatus> for CacheSummary {
    fn from(status: ItemStatus) -> Self {
        Self {
            local: status.local,
            remote: status.remote,
            status: if status.hit() { "HIT" } else { "MISS" },
            time_saved: status.time_saved,
        }
    }
}

/// Env var names a task used, grouped by provenance. Values are digests,
/// never raw.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvVarSummary {
    pub specified: Vec<String>,
    pub configured: Vec<String>,
    pub inferred: Vec<String>,
    pub passthrough: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct TaskSummary {
    pub task_id: TaskId,
    pub hash: String,
    pub command: String,
    pub cli_arguments: Vec<String>,
    pub outputs: Vec<String>,
    pub excluded_outputs: Vec<String>,
    pub log_file: AnchoredPath,
    pub directory: AnchoredPath,
    pub dependencies: Vec<TaskId>,
    pub dependents: Vec<TaskId>,
    pub definition: TaskDefinition,
    pub inputs: BTreeMap<AnchoredPath, String>,
    pub expanded_outputs: Vec<AnchoredPath>,
    pub framework: Option<String>,
    pub env_mode: EnvMode,
    pub env_vars: EnvVarSummary,
    pub external_deps_hash: String,
    pub cache: CacheSummary,
    pub execution: Option<TaskExecutionSummary>,
}

impl TaskSummary {
    /// Render a task id for output: single-package mode drops the `//#`
    /// qualifier.
    fn render_id(&self, single_package: bool) -> String {
        if single_package {
            self.task_id.task().to_string()
        } else {
            self.task_id.to_string()
        }
    }

    pub fn to_json(&self, single_package: bool) -> serde_json::Value {
        let render = |ids: &[TaskId]| -> Vec<String> {
            ids.iter()
                .map(|id| {
                    if single_package {
                        id.task().to_string()
                    } else {
                        id.to_string()
                    }
                })
                .collect()
        };

        let mut value = json!({
            "taskId": self.render_id(single_package),
            "task": self.task_id.task(),
            "hash": self.hash,
            "inputs": self.inputs,
            "hashOfExternalDependencies": self.external_deps_hash,
            "cache": self.cache,
            "command": self.command,
            "cliArguments": self.cli_arguments,
            "outputs": self.outputs,
            "excludedOutputs": self.excluded_outputs,
            "logFile": self.log_file,
            "dependencies": render(&self.dependencies),
            "dependents": render(&self.dependents),
            "resolvedTaskDefinition": definition_to_json(&self.definition),
            "expandedOutputs": self.expanded_outputs,
            "framework": self.framework.clone().unwrap_or_default(),
            "envMode": self.env_mode,
            "environmentVariables": self.env_vars,
        });

        let object = value.as_object_mut().expect("task summary is an object");
        if !single_package {
            object.insert("package".to_string(), json!(self.task_id.package()));
            object.insert("directory".to_string(), json!(self.directory));
        }
        if let Some(dot_env) = &self.definition.dot_env {
            object.insert("dotEnv".to_string(), json!(dot_env));
        }
        if let Some(execution) = &self.execution {
            object.insert("execution".to_string(), json!(execution));
        }
        value
    }
}

/// Serialize a normalized definition back into its configuration shape.
pub fn definition_to_json(definition: &TaskDefinition) -> serde_json::Value {
    let mut depends_on: Vec<String> = definition
        .topological_dependencies
        .iter()
        .map(|task| format!("^{task}"))
        .collect();
    depends_on.extend(definition.task_dependencies.iter().map(|dep| match dep {
        TaskDependency::Same(task) => task.clone(),
        TaskDependency::Package { package, task } => format!("{package}#{task}"),
        TaskDependency::Topological(task) => format!("^{task}"),
    }));

    let mut outputs: Vec<String> = definition.outputs.inclusions.clone();
    outputs.extend(
        definition
            .outputs
            .exclusions
            .iter()
            .map(|glob| format!("!{glob}")),
    );

    json!({
        "outputs": outputs,
        "cache": definition.should_cache,
        "dependsOn": depends_on,
        "inputs": definition.inputs,
        "outputMode": definition.output_mode,
        "env": definition.env_var_dependencies,
        "passThroughEnv": definition.pass_through_env,
        "dotEnv": definition.dot_env,
        "persistent": definition.persistent,
    })
}

/// The complete run record.
pub struct RunSummary {
    pub id: uuid::Uuid,
    pub single_package: bool,
    pub packages: Vec<String>,
    pub global_hash_inputs: GlobalHashInputs,
    pub scm: ScmState,
    pub user: String,
    pub start_time: u64,
    pub tasks: Vec<TaskSummary>,
    pub exit_code: i32,
}

impl RunSummary {
    pub fn new(
        single_package: bool,
        packages: Vec<String>,
        global_hash_inputs: GlobalHashInputs,
        scm: ScmState,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            single_package,
            packages,
            global_hash_inputs,
            scm,
            user: std::env::var("USER")
                .or_else(|_| std::env::var("USERNAME"))
                .unwrap_or_default(),
            start_time: now_ms(),
            tasks: Vec::new(),
            exit_code: 0,
        }
    }

    pub fn add_task(&mut self, task: TaskSummary) {
        self.tasks.push(task);
    }

    fn global_cache_inputs_json(&self) -> serde_json::Value {
        let global = &self.global_hash_inputs;
        let mut value = json!({
            "rootKey": crate::hashing::GLOBAL_CACHE_KEY,
            "files": global.global_file_hashes,
            "hashOfExternalDependencies": global.root_external_deps_hash,
            "environmentVariables": {
                "specified": global.env_var_names,
                "configured": global.env_var_pairs,
                "inferred": Vec::<String>::new(),
                "passthrough": global.pass_through_names.clone().unwrap_or_default(),
            },
        });
        if let Some(dot_env) = &global.dot_env {
            value
                .as_object_mut()
                .expect("global cache inputs is an object")
                .insert("globalDotEnv".to_string(), json!(dot_env));
        }
        value
    }

    pub fn to_json(&self) -> serde_json::Value {
        let mut tasks: Vec<serde_json::Value> = self
            .tasks
            .iter()
            .map(|task| task.to_json(self.single_package))
            .collect();
        tasks.sort_by_key(|task| {
            task.get("taskId")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string()
        });

        let mut value = json!({
            "id": self.id.to_string(),
            "version": SUMMARY_SCHEMA_VERSION,
            "turboVersion": RUNNER_VERSION,
            "globalCacheInputs": self.global_cache_inputs_json(),
            "envMode": self.global_hash_inputs.env_mode,
            "frameworkInference": self.global_hash_inputs.framework_inference,
            "tasks": tasks,
            "user": self.user,
            "scm": self.scm,
        });

        if !self.single_package {
            let object = value.as_object_mut().expect("run summary is an object");
            object.insert("monorepo".to_string(), json!(true));
            object.insert("packages".to_string(), json!(self.packages));
        }
        value
    }

    /// Write the summary file under `.turbo/runs/` and return its path.
    pub fn write_file(&self, repo_root: &AbsPath) -> std::io::Result<AbsPath> {
        let dir = repo_root.join(".turbo/runs");
        std::fs::create_dir_all(dir.as_std_path())?;
        let path = dir.join(format!("{}.json", self.id));
        let rendered = serde_json::to_string_pretty(&self.to_json())
            .expect("run summary serializes");
        std::fs::write(path.as_std_path(), rendered)?;
        Ok(path)
    }

    /// The dry-run text rendering: a packages table and per-task blocks.
    pub fn render_text(&self, workspace: &WorkspaceGraph) -> String {
        let mut out = String::new();

        if !self.single_package {
            out.push_str("\nPackages in Scope\nName\tPath\n");
            for package in &self.packages {
                let dir = workspace
                    .package(package)
                    .map(|p| p.dir.to_string())
                    .unwrap_or_default();
                out.push_str(&format!("{package}\t{dir}\n"));
            }
        }

        out.push_str("\nGlobal Hash Inputs\n");
        let global = &self.global_hash_inputs;
        out.push_str(&format!(
            "  Global Files               = {}\n",
            global.global_file_hashes.len()
        ));
        out.push_str(&format!(
            "  External Dependencies Hash = {}\n",
            global.root_external_deps_hash
        ));
        out.push_str(&format!(
            "  Global Env Vars            = {}\n",
            global.env_var_names.join(", ")
        ));
        out.push_str(&format!("  Env Mode                   = {}\n", global.env_mode.as_str()));
        out.push_str(&format!(
            "  Framework Inference        = {}\n",
            global.framework_inference
        ));

        out.push_str("\nTasks to Run\n");
        for task in &self.tasks {
            out.push_str(&format!("{}\n", task.render_id(self.single_package)));
            out.push_str(&format!("  Task                       = {}\n", task.task_id.task()));
            if !self.single_package {
                out.push_str(&format!(
                    "  Package                    = {}\n",
                    task.task_id.package()
                ));
            }
            out.push_str(&format!("  Hash                       = {}\n", task.hash));
            out.push_str(&format!(
                "  Cached (Local)             = {}\n",
                task.cache.local
            ));
            out.push_str(&format!(
                "  Cached (Remote)            = {}\n",
                task.cache.remote
            ));
            if !self.single_package {
                out.push_str(&format!(
                    "  Directory                  = {}\n",
                    task.directory
                ));
            }
            out.push_str(&format!("  Command                    = {}\n", task.command));
            out.push_str(&format!(
                "  Outputs                    = {}\n",
                task.outputs.join(", ")
            ));
            out.push_str(&format!("  Log File                   = {}\n", task.log_file));
            let render = |ids: &[TaskId]| {
                ids.iter()
                    .map(|id| {
                        if self.single_package {
                            id.task().to_string()
                        } else {
                            id.to_string()
                        }
                    })
                    .collect::<Vec<_>>()
                    .join(", ")
            };
            out.push_str(&format!(
                "  Dependencies               = {}\n",
                render(&task.dependencies)
            ));
            out.push_str(&format!(
                "  Dependents                 = {}\n",
                render(&task.dependents)
            ));
            out.push_str(&format!(
                "  Inputs Files Considered    = {}\n",
                task.inputs.len()
            ));
            out.push_str(&format!(
                "  Framework                  = {}\n",
                task.framework.clone().unwrap_or_default()
            ));
            out.push_str(&format!(
                "  ResolvedTaskDefinition     = {}\n",
                definition_to_json(&task.definition)
            ));
        }

        out
    }
}

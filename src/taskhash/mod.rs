// src/taskhash/mod.rs

//! Task fingerprinting.
//!
//! Hashing proceeds in two layers:
//!
//! 1. The **global hash** is computed once per run from everything that
//!    affects every task: `globalDependencies` file hashes, the root
//!    package's external-deps hash, global env digests, the cache-key
//!    constant, the resolved env mode, and the framework-inference flag.
//! 2. Each **task hash** folds in the global hash, the task's identity, its
//!    expanded input files, env digests, the normalized definition, any
//!    `--`-forwarded CLI args, and — because tasks are hashed in
//!    topological order — the final hashes of its in-graph dependencies.
//!
//! The [`TaskHashTracker`] is the run-wide shared record of hashes, expanded
//! inputs/outputs, and cache statuses; workers and the summary read it
//! behind a mutex.

pub mod env;
pub mod framework;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::config::pipeline::ROOT_PKG_NAME;
use crate::config::{RootConfig, TaskDefinition};
use crate::engine::{TaskGraph, TaskId, TaskNode};
use crate::errors::HashError;
use crate::globwalk::{self, GlobFilter};
use crate::hashing::{self, file_hasher, CanonicalHasher, GLOBAL_CACHE_KEY};
use crate::paths::{AbsPath, AnchoredPath};
use crate::scm::Scm;
use crate::workspace::WorkspaceGraph;

pub use env::EnvMode;

/// Env var names every run depends on implicitly.
const DEFAULT_GLOBAL_ENV_VARS: &[&str] = &["VERCEL_ANALYTICS_ID"];

/// Everything hashed into the run-wide global hash. Kept around for summary
/// output.
#[derive(Debug, Clone)]
pub struct GlobalHashInputs {
    pub global_file_hashes: BTreeMap<AnchoredPath, String>,
    pub root_external_deps_hash: String,
    pub env_var_names: Vec<String>,
    pub env_var_pairs: BTreeMap<String, String>,
    pub pass_through_names: Option<Vec<String>>,
    pub env_mode: EnvMode,
    pub framework_inference: bool,
    pub dot_env: Option<Vec<String>>,
    pub hash: String,
}

impl GlobalHashInputs {
    pub fn compute(
        repo_root: &AbsPath,
        scm: &Scm,
        workspace: &WorkspaceGraph,
        config: &RootConfig,
        opt_env_mode: EnvMode,
        framework_inference: bool,
    ) -> Result<Self, HashError> {
        // Global file dependencies: expand the configured globs from the
        // repo root. With no lockfile-aware collaborator, the root manifest
        // stands in for the dependency closure alongside the external-deps
        // hash.
        let mut global_file_hashes = BTreeMap::new();
        if !config.global_dependencies.is_empty() {
            let (inclusions, exclusions) =
                globwalk::split_negations(&config.global_dependencies);
            let filter = GlobFilter::new(&inclusions, &exclusions)
                .map_err(|e| HashError::Glob(e.to_string()))?;
            for file in globwalk::glob_files(repo_root, repo_root, &filter)
                .map_err(|e| HashError::UnreadableInput {
                    path: repo_root.to_string(),
                    source: std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
                })?
            {
                let abs = repo_root.resolve(&file);
                global_file_hashes.insert(file, scm.hash_file(&abs)?);
            }
        }
        for always in ["package.json", "package-lock.json", "yarn.lock", "pnpm-lock.yaml"] {
            let abs = repo_root.join(always);
            if abs.exists() {
                let anchored = AnchoredPath::new(always)?;
                global_file_hashes
                    .entry(anchored)
                    .or_insert(scm.hash_file(&abs)?);
            }
        }

        let mut env_var_names: Vec<String> = config.global_env.clone();
        env_var_names.extend(DEFAULT_GLOBAL_ENV_VARS.iter().map(|s| s.to_string()));
        env_var_names.sort();
        env_var_names.dedup();
        let env_var_pairs = env::to_hashable_pairs(&env::capture(&env_var_names));

        let root_external_deps_hash = workspace
            .package(ROOT_PKG_NAME)
            .map(|p| p.external_deps_hash.clone())
            .unwrap_or_default();

        let env_mode =
            env::resolve_global_mode(opt_env_mode, config.global_pass_through_env.as_ref());

        // Pass-through handling mirrors the task hasher: loose drops the
        // list, strict collapses null and [].
        let pass_through_names = match env_mode {
            EnvMode::Loose => None,
            EnvMode::Strict => Some(config.global_pass_through_env.clone().unwrap_or_default()),
            EnvMode::Infer => config.global_pass_through_env.clone(),
        };

        let mut hasher = CanonicalHasher::new();
        hasher.tag("globalHash");
        hasher.uint(global_file_hashes.len() as u64);
        for (path, file_hash) in &global_file_hashes {
            hasher.text(path.as_str());
            hasher.text(file_hash);
        }
        hasher.text(&root_external_deps_hash);
        hasher.text_map(&env_var_pairs);
        hasher.text(GLOBAL_CACHE_KEY);
        match &pass_through_names {
            Some(names) => {
                hasher.flag(true);
                hasher.text_list(names.iter());
            }
            None => hasher.flag(false),
        }
        hasher.tag(env_mode.as_str());
        hasher.flag(framework_inference);
        let hash = hasher.finish();

        debug!(hash = %hash, files = global_file_hashes.len(), "computed global hash");

        Ok(Self {
            global_file_hashes,
            root_external_deps_hash,
            env_var_names,
            env_var_pairs,
            pass_through_names,
            env_mode,
            framework_inference,
            dot_env: config.global_dot_env.clone(),
            hash,
        })
    }
}

/// Cache outcome for one task, shared with the summary.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStatus {
    pub local: bool,
    pub remote: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_saved: Option<u64>,
}

impl CacheStatus {
    pub fn hit(&self) -> bool {
        self.local || self.remote
    }
}

#[derive(Default)]
struct TrackerState {
    package_file_hashes: HashMap<(String, Vec<String>), BTreeMap<AnchoredPath, String>>,
    task_hashes: HashMap<TaskId, String>,
    expanded_inputs: HashMap<TaskId, BTreeMap<AnchoredPath, String>>,
    env_pairs: HashMap<TaskId, BTreeMap<String, String>>,
    frameworks: HashMap<TaskId, &'static str>,
    expanded_outputs: HashMap<TaskId, Vec<AnchoredPath>>,
    cache_status: HashMap<TaskId, CacheStatus>,
}

/// Run-wide shared hash/output/cache bookkeeping.
#[derive(Clone, Default)]
pub struct TaskHashTracker {
    state: Arc<Mutex<TrackerState>>,
}

impl TaskHashTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn task_hash(&self, id: &TaskId) -> Option<String> {
        self.state.lock().unwrap().task_hashes.get(id).cloned()
    }

    pub fn expanded_inputs(&self, id: &TaskId) -> BTreeMap<AnchoredPath, String> {
        self.state
            .lock()
            .unwrap()
            .expanded_inputs
            .get(id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn env_pairs(&self, id: &TaskId) -> BTreeMap<String, String> {
        self.state
            .lock()
            .unwrap()
            .env_pairs
            .get(id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn framework(&self, id: &TaskId) -> Option<&'static str> {
        self.state.lock().unwrap().frameworks.get(id).copied()
    }

    pub fn set_expanded_outputs(&self, id: &TaskId, outputs: Vec<AnchoredPath>) {
        self.state
            .lock()
            .unwrap()
            .expanded_outputs
            .insert(id.clone(), outputs);
    }

    pub fn expanded_outputs(&self, id: &TaskId) -> Vec<AnchoredPath> {
        self.state
            .lock()
            .unwrap()
            .expanded_outputs
            .get(id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn set_cache_status(&self, id: &TaskId, status: CacheStatus) {
        self.state
            .lock()
            .unwrap()
            .cache_status
            .insert(id.clone(), status);
    }

    pub fn cache_status(&self, id: &TaskId) -> CacheStatus {
        self.state
            .lock()
            .unwrap()
            .cache_status
            .get(id)
            .copied()
            .unwrap_or_default()
    }
}

/// Computes task hashes in dependency order.
pub struct TaskHasher<'a> {
    repo_root: &'a AbsPath,
    scm: &'a Scm,
    workspace: &'a WorkspaceGraph,
    global: &'a GlobalHashInputs,
    tracker: TaskHashTracker,
    pass_through_args: Vec<String>,
}

impl<'a> TaskHasher<'a> {
    pub fn new(
        repo_root: &'a AbsPath,
        scm: &'a Scm,
        workspace: &'a WorkspaceGraph,
        global: &'a GlobalHashInputs,
        pass_through_args: Vec<String>,
    ) -> Self {
        Self {
            repo_root,
            scm,
            workspace,
            global,
            tracker: TaskHashTracker::new(),
            pass_through_args,
        }
    }

    pub fn tracker(&self) -> TaskHashTracker {
        self.tracker.clone()
    }

    /// Hash every task in the graph, dependencies first. After this returns
    /// the tracker answers for every task id in the graph.
    pub fn hash_graph(&self, graph: &TaskGraph) -> Result<(), HashError> {
        for id in graph.topological_order() {
            let node = graph.node(&id).expect("topological order lists graph nodes");
            let dep_hashes: Vec<String> = graph
                .dependencies(&id)
                .iter()
                .map(|dep| {
                    self.tracker
                        .task_hash(dep)
                        .expect("dependencies are hashed before dependents")
                })
                .collect();
            self.hash_task(node, dep_hashes)?;
        }
        Ok(())
    }

    /// Compute and record one task's hash. `dep_hashes` must contain the
    /// final hash of every in-graph dependency.
    pub fn hash_task(
        &self,
        node: &TaskNode,
        mut dep_hashes: Vec<String>,
    ) -> Result<String, HashError> {
        let id = &node.id;
        let definition = &node.definition;

        let file_hashes = self.package_file_hashes(id, definition)?;

        // Declared env vars plus anything a detected framework reads.
        let mut env_var_names = definition.env_var_dependencies.clone();
        let framework = if self.global.framework_inference {
            self.workspace
                .package(id.package())
                .and_then(framework::infer)
        } else {
            None
        };
        if let Some(framework) = framework {
            env_var_names.extend(env::expand_wildcards(&[framework
                .env_wildcard
                .to_string()]));
        }
        env_var_names.sort();
        env_var_names.dedup();
        let env_pairs = env::to_hashable_pairs(&env::capture(&env_var_names));

        let task_mode =
            env::resolve_task_mode(self.global.env_mode, definition.pass_through_env.as_ref());
        let pass_through_names: Vec<String> = match task_mode {
            EnvMode::Strict => definition.pass_through_env.clone().unwrap_or_default(),
            // Loose children see the whole environment anyway.
            _ => Vec::new(),
        };

        dep_hashes.sort();

        let mut hasher = CanonicalHasher::new();
        hasher.tag("taskHash");
        hasher.text(&self.global.hash);
        hasher.text(id.package());
        hasher.text(id.task());
        hasher.uint(file_hashes.len() as u64);
        for (path, file_hash) in &file_hashes {
            hasher.text(path.as_str());
            hasher.text(file_hash);
        }
        hasher.text_map(&env_pairs);
        if task_mode == EnvMode::Strict {
            hasher.text_list(pass_through_names.iter());
        }
        hash_definition(&mut hasher, definition);
        hasher.text_list(self.pass_through_args.iter());
        hasher.text_list(dep_hashes.iter());
        let hash = hasher.finish();

        debug!(task = %id, hash = %hash, "computed task hash");

        let mut state = self.tracker.state.lock().unwrap();
        state.task_hashes.insert(id.clone(), hash.clone());
        state.expanded_inputs.insert(id.clone(), file_hashes);
        state.env_pairs.insert(id.clone(), env_pairs);
        if let Some(framework) = framework {
            state.frameworks.insert(id.clone(), framework.slug);
        }

        Ok(hash)
    }

    /// Package file hashes for a task, memoized per `(package, inputs)`.
    fn package_file_hashes(
        &self,
        id: &TaskId,
        definition: &TaskDefinition,
    ) -> Result<BTreeMap<AnchoredPath, String>, HashError> {
        let key = (id.package().to_string(), definition.inputs.clone());
        {
            let state = self.tracker.state.lock().unwrap();
            if let Some(hashes) = state.package_file_hashes.get(&key) {
                return Ok(hashes.clone());
            }
        }

        let package = self
            .workspace
            .package(id.package())
            .ok_or_else(|| HashError::MissingInput(id.package().to_string()))?;
        let hashes = file_hasher::package_file_hashes(
            self.scm,
            self.repo_root,
            &package.dir,
            &definition.inputs,
        )?;

        let mut state = self.tracker.state.lock().unwrap();
        state.package_file_hashes.insert(key, hashes.clone());
        Ok(hashes)
    }
}

/// Fold a normalized task definition into the hasher. Only structural forms
/// participate; source strings with markers never reach this point.
fn hash_definition(hasher: &mut CanonicalHasher, definition: &TaskDefinition) {
    hasher.tag("definition");
    hasher.text_list(definition.outputs.inclusions.iter());
    hasher.text_list(definition.outputs.exclusions.iter());
    hasher.flag(definition.should_cache);
    hasher.text_list(
        definition
            .task_dependencies
            .iter()
            .map(|dep| dep.canonical()),
    );
    hasher.text_list(
        definition
            .topological_dependencies
            .iter()
            .map(|task| format!("topo:{task}")),
    );
    hasher.text_list(definition.env_var_dependencies.iter());
    hasher.text_list(definition.inputs.iter());
    hasher.tag(definition.output_mode.as_str());
    hasher.flag(definition.persistent);
}

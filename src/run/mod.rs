// src/run/mod.rs

//! Run orchestration.
//!
//! [`RunOptions`] carries every knob explicitly — no package-global state —
//! and [`run`] wires the stages together:
//!
//! 1. load + normalize configuration, discover the workspace;
//! 2. build and validate the task graph;
//! 3. compute the global hash, then every task hash in dependency order;
//! 4. either project the plan (dry run) or walk the graph for real,
//!    restoring from cache or executing under the process manager;
//! 5. close out the run summary and derive the aggregate exit code.

pub mod dry;
pub mod scheduler;
pub mod summary;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::cache::{AsyncCache, CacheConfig, RemoteConfig, DEFAULT_CACHE_DIR};
use crate::config::pipeline::ROOT_PKG_NAME;
use crate::config::{self, OutputLogsMode, RootConfig};
use crate::engine::{EngineBuilder, TaskGraph, TaskNode};
use crate::errors::Result;
use crate::paths::{AbsPath, AnchoredPath};
use crate::process::ProcessManager;
use crate::runcache::{RunCache, RunCacheOpts};
use crate::scm::Scm;
use crate::taskhash::env::{self, EnvMode};
use crate::taskhash::{GlobalHashInputs, TaskHashTracker, TaskHasher};
use crate::ui::{OutputSink, PrefixStyle};
use crate::workspace::{self, WorkspaceGraph};

pub use dry::DryRunFormat;
pub use scheduler::{ExecOptions, TaskResult, DEFAULT_CONCURRENCY};
pub use summary::{RunSummary, TaskSummary};

/// All run configuration, resolved from CLI flags and the environment by
/// the caller.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub tasks: Vec<String>,
    /// Package names to run in; empty means every package.
    pub filter: Vec<String>,
    pub concurrency: usize,
    pub parallel: bool,
    pub continue_on_error: bool,
    pub only: bool,
    pub cache_dir: Option<String>,
    /// `--force` / `TURBO_FORCE`.
    pub force: bool,
    /// `--no-cache`.
    pub no_cache: bool,
    /// `--remote-only` / `TURBO_REMOTE_ONLY`.
    pub remote_only: bool,
    pub output_logs: Option<OutputLogsMode>,
    pub log_prefix: PrefixStyle,
    pub grouped_logs: bool,
    pub github_actions: bool,
    pub env_mode: EnvMode,
    pub framework_inference: bool,
    /// `--graph[=file]`: emit the task graph as dot and exit. `Some(None)`
    /// prints to stdout.
    pub graph: Option<Option<String>>,
    pub dry_run: Option<DryRunFormat>,
    pub summarize: bool,
    /// Args after `--`, forwarded to every task and hashed.
    pub pass_through_args: Vec<String>,
    pub remote: Option<RemoteConfig>,
    pub use_color: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            tasks: Vec::new(),
            filter: Vec::new(),
            concurrency: DEFAULT_CONCURRENCY,
            parallel: false,
            continue_on_error: false,
            only: false,
            cache_dir: None,
            force: false,
            no_cache: false,
            remote_only: false,
            output_logs: None,
            log_prefix: PrefixStyle::Task,
            grouped_logs: false,
            github_actions: false,
            env_mode: EnvMode::Infer,
            framework_inference: true,
            graph: None,
            dry_run: None,
            summarize: false,
            pass_through_args: Vec::new(),
            remote: None,
            use_color: false,
        }
    }
}

/// Shared pieces the summary builder needs; owned by [`run`] and borrowed
/// by both execution paths.
pub struct RunContext<'a> {
    pub workspace: &'a WorkspaceGraph,
    pub tracker: TaskHashTracker,
    pub global_env_mode: EnvMode,
    pub pass_through_args: Vec<String>,
    pub single_package: bool,
}

impl<'a> RunContext<'a> {
    pub fn build_task_summary(
        &self,
        graph: &TaskGraph,
        node: &TaskNode,
        hash: &str,
        cache: summary::CacheSummary,
        execution: Option<summary::TaskExecutionSummary>,
    ) -> TaskSummary {
        let definition = &node.definition;
        let env_pairs = self.tracker.env_pairs(&node.id);

        let specified: Vec<String> = definition.env_var_dependencies.clone();
        let configured: Vec<String> = env_pairs.keys().cloned().collect();
        let inferred: Vec<String> = configured
            .iter()
            .filter(|name| !specified.contains(name))
            .cloned()
            .collect();
        let task_env_mode =
            env::resolve_task_mode(self.global_env_mode, definition.pass_through_env.as_ref());

        let log_file = task_log_file(&node.dir, node.id.task());

        TaskSummary {
            task_id: node.id.clone(),
            hash: hash.to_string(),
            command: node
                .command
                .clone()
                .unwrap_or_else(|| "<NONEXISTENT>".to_string()),
            cli_arguments: self.pass_through_args.clone(),
            outputs: definition.outputs.inclusions.clone(),
            excluded_outputs: definition.outputs.exclusions.clone(),
            log_file,
            directory: node.dir.clone(),
            dependencies: graph.dependencies(&node.id),
            dependents: graph.dependents(&node.id),
            definition: definition.clone(),
            inputs: self.tracker.expanded_inputs(&node.id),
            expanded_outputs: self.tracker.expanded_outputs(&node.id),
            framework: self.tracker.framework(&node.id).map(|s| s.to_string()),
            env_mode: task_env_mode,
            env_vars: summary::EnvVarSummary {
                specified,
                configured,
                inferred,
                passthrough: definition.pass_through_env.clone().unwrap_or_default(),
            },
            external_deps_hash: self
                .workspace
                .package(node.id.package())
                .map(|p| p.external_deps_hash.clone())
                .unwrap_or_default(),
            cache,
            execution,
        }
    }
}

/// Execute (or project) a run. Returns the process exit code.
pub async fn run(repo_root: &AbsPath, mut opts: RunOptions) -> Result<i32> {
    let started = Instant::now();
    let sink = OutputSink::stdout(opts.use_color, opts.log_prefix);

    let scm = Scm::discover(repo_root);
    let raw = config::load_root_config(repo_root)?;
    let mut root_config = RootConfig::from_raw(raw)?;

    let single_package = !workspace::is_multi_package(repo_root);
    if single_package {
        root_config = root_config.into_single_package()?;
    }
    let package_manager = workspace::detect_package_manager(repo_root);

    let packages = workspace::discover_packages(repo_root)?;
    for package in &packages {
        if package.is_root() {
            continue;
        }
        let package_root = repo_root.resolve(&package.dir);
        if let Some(overrides) = config::load_workspace_overrides(&package_root)? {
            root_config.apply_workspace_overrides(&package.name, overrides)?;
        }
    }
    let workspace_graph = WorkspaceGraph::new(packages)?;

    // Scope selection: an explicit filter must name real packages.
    let filtered: Vec<String> = if opts.filter.is_empty() {
        workspace_graph
            .package_names()
            .map(|name| name.to_string())
            .collect()
    } else {
        for name in &opts.filter {
            if !workspace_graph.contains(name) {
                return Err(crate::errors::ConfigError::UnknownFilter(name.clone()).into());
            }
        }
        opts.filter.clone()
    };

    let graph = EngineBuilder::new(&workspace_graph, &root_config.pipeline)
        .with_parallel(opts.parallel)
        .with_tasks_only(opts.only)
        .build(&opts.tasks, &filtered)?;

    if let Some(target) = &opts.graph {
        let rendered = graph.to_dot();
        match target {
            Some(file) => {
                let path = repo_root.join(file.as_str());
                std::fs::write(path.as_std_path(), rendered)
                    .map_err(crate::errors::CacheError::Io)?;
                sink.line(&format!("✓ Generated task graph in {file}"));
            }
            None => sink.line(&rendered),
        }
        return Ok(0);
    }

    let global_inputs = GlobalHashInputs::compute(
        repo_root,
        &scm,
        &workspace_graph,
        &root_config,
        opts.env_mode,
        opts.framework_inference,
    )?;
    let hasher = TaskHasher::new(
        repo_root,
        &scm,
        &workspace_graph,
        &global_inputs,
        opts.pass_through_args.clone(),
    );
    hasher.hash_graph(&graph)?;
    let tracker = hasher.tracker();

    // Cache wiring. Remote config comes in through the options; the
    // `remoteCache` block in turbo.json fills gaps.
    if opts.remote.is_none() {
        opts.remote = remote_from_config(&root_config);
    }
    let cache_config = CacheConfig {
        dir: opts
            .cache_dir
            .as_deref()
            .map(|dir| repo_root.join(dir))
            .unwrap_or_else(|| repo_root.join(DEFAULT_CACHE_DIR)),
        skip_remote: opts.remote.is_none(),
        skip_filesystem: opts.remote_only,
        workers: std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4),
        remote: opts.remote.clone(),
        shutdown_deadline: Duration::from_secs(30),
    };
    let cache = Arc::new(AsyncCache::new(&cache_config, repo_root)?);

    let packages_in_scope: Vec<String> = filtered
        .iter()
        .filter(|name| *name != ROOT_PKG_NAME)
        .cloned()
        .collect();
    let mut run_summary = RunSummary::new(
        single_package,
        packages_in_scope.clone(),
        global_inputs.clone(),
        scm.state(),
    );

    let global_env_mode = global_inputs.env_mode;
    let ctx = RunContext {
        workspace: &workspace_graph,
        tracker: tracker.clone(),
        global_env_mode,
        pass_through_args: opts.pass_through_args.clone(),
        single_package,
    };

    if let Some(format) = opts.dry_run {
        dry::execute_dry_run(
            &ctx,
            &graph,
            &workspace_graph,
            &cache,
            &mut run_summary,
            format,
            &sink,
        )?;
        shutdown_cache(&cache).await;
        return Ok(0);
    }

    if !single_package {
        sink.line(&format!(
            "• Packages in scope: {}",
            packages_in_scope.join(", ")
        ));
    }
    sink.line(&format!(
        "• Running {} in {} packages",
        opts.tasks.join(", "),
        packages_in_scope.len().max(1)
    ));
    sink.line(if cache_config.remote.is_some() {
        "• Remote caching enabled"
    } else {
        "• Remote caching disabled"
    });

    let run_cache = Arc::new(RunCache::new(
        Arc::clone(&cache),
        repo_root.clone(),
        RunCacheOpts {
            skip_reads: opts.force,
            skip_writes: opts.no_cache,
            output_mode_override: opts.output_logs,
        },
        tracker.clone(),
    ));
    let manager = ProcessManager::new(scheduler::default_grace_period());

    // Ctrl-C flows into the same stop signal a failing task raises.
    let (cancel_tx, _cancel_rx) = watch::channel(false);
    {
        let cancel_tx = cancel_tx.clone();
        let manager = manager.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received; stopping execution");
                let _ = cancel_tx.send(true);
                manager.close().await;
            }
        });
    }

    let exec_ctx = Arc::new(scheduler::ExecContext {
        run_cache,
        manager,
        tracker: tracker.clone(),
        sink: sink.clone(),
        package_manager,
        pass_through_args: opts.pass_through_args.clone(),
        global_env_mode,
        global_env_names: global_inputs.env_var_names.clone(),
        global_pass_through: global_inputs.pass_through_names.clone(),
        repo_root: repo_root.clone(),
        opts: ExecOptions {
            concurrency: opts.concurrency,
            continue_on_error: opts.continue_on_error,
            grouped_logs: opts.grouped_logs,
            github_actions: opts.github_actions,
        },
    });

    let results = scheduler::execute(exec_ctx, &graph, cancel_tx).await;

    // The scheduler returns; pending cache writes get their shutdown
    // window before we report.
    shutdown_cache(&cache).await;

    let mut attempted = 0usize;
    let mut cached = 0usize;
    let mut failed = 0usize;
    for id in graph.task_ids() {
        let Some((result, execution)) = results.get(&id) else {
            continue;
        };
        match result {
            TaskResult::NoScript | TaskResult::Skipped => {}
            TaskResult::Cached => {
                attempted += 1;
                cached += 1;
            }
            TaskResult::Built => attempted += 1,
            _ => {
                attempted += 1;
                failed += 1;
            }
        }
        if execution.is_some() {
            let node = graph.node(&id).expect("graph ids resolve");
            let hash = tracker.task_hash(&id).expect("hashed before execution");
            let cache_summary: summary::CacheSummary = tracker.cache_status(&id).into();
            run_summary.add_task(ctx.build_task_summary(
                &graph,
                node,
                &hash,
                cache_summary,
                execution.clone(),
            ));
        }
    }

    let exit_code = scheduler::aggregate_exit_code(&results);
    run_summary.exit_code = exit_code;

    sink.line("");
    sink.line(&format!(
        " Tasks:    {} successful, {} total",
        attempted - failed,
        attempted
    ));
    sink.line(&format!(" Cached:    {cached} cached, {attempted} total"));
    sink.line(&format!(
        "  Time:    {:.1}s",
        started.elapsed().as_secs_f64()
    ));
    if attempted > 0 && cached == attempted && exit_code == 0 {
        sink.line(">>> FULL TURBO");
    }
    sink.line("");

    if opts.summarize {
        match run_summary.write_file(repo_root) {
            Ok(path) => sink.line(&format!("Summary:    {path}")),
            Err(e) => warn!(error = %e, "failed to write run summary"),
        }
    }

    debug!(exit_code, "run complete");
    Ok(exit_code)
}

/// `CacheStatus` from the tracker feeds summaries as a `CacheSummary`.
impl From<crate::taskhash::CacheStatus> for summary::CacheSummary {
    fn from(status: crate::taskhash::CacheStatus) -> Self {
        Self {
            local: status.local,
            remote: status.remote,
            status: if status.hit() { "HIT" } else { "MISS" },
            time_saved: status.time_saved,
        }
    }
}

fn remote_from_config(config: &RootConfig) -> Option<RemoteConfig> {
    let endpoint = std::env::var("TURBO_API").ok()?;
    let token = std::env::var("TURBO_TOKEN").ok()?;
    let team = std::env::var("TURBO_TEAM")
        .ok()
        .or_else(|| config.remote_cache.team_id.clone());
    let signature_key = if config.remote_cache.signature {
        std::env::var("TURBO_REMOTE_CACHE_SIGNATURE_KEY")
            .ok()
            .map(|key| key.into_bytes())
    } else {
        None
    };
    Some(RemoteConfig {
        endpoint,
        token,
        team,
        signature_key,
        ci_name: std::env::var("GITHUB_ACTIONS")
            .ok()
            .map(|_| "github-actions".to_string()),
    })
}

/// The shutdown wait loop blocks; keep it off the async workers.
async fn shutdown_cache(cache: &Arc<AsyncCache>) {
    let cache = Arc::clone(cache);
    let result = tokio::task::spawn_blocking(move || cache.shutdown()).await;
    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "cache shutdown incomplete"),
        Err(e) => warn!(error = %e, "cache shutdown task failed"),
    }
}

/// Log file path used by both the cache layer and summaries.
pub fn task_log_file(dir: &AnchoredPath, task: &str) -> AnchoredPath {
    dir.join(&format!(".turbo/turbo-{task}.log"))
        .expect("log path stays anchored")
}

/// Re-exported for integration tests that assemble summaries by hand.
pub use summary::CacheSummary;

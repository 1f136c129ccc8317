// src/run/scheduler.rs

//! Bounded-concurrency task graph execution.
//!
//! The walk dispatches a task once every dependency has succeeded. A
//! semaphore bounds how many children run at once (`0` = unbounded, `1` =
//! strictly serial). A failure without `--continue` requests stop: nothing
//! new is dispatched, running children get SIGINT → SIGKILL through the
//! process manager, and in-flight cache restores finish. With `--continue`,
//! the walk keeps going but descendants of a failure are skipped — their
//! inputs never materialized.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use crate::engine::{TaskGraph, TaskId, TaskNode};
use crate::errors::CacheError;
use crate::process::{ChildCommand, ChildExit, ProcessManager};
use crate::runcache::RunCache;
use crate::taskhash::env::{self, EnvMode};
use crate::taskhash::TaskHashTracker;
use crate::ui::OutputSink;

use super::summary::{now_ms, TaskExecutionSummary, TaskState};

/// Default concurrency when `--concurrency` is not given.
pub const DEFAULT_CONCURRENCY: usize = 10;

/// Env vars every strict-mode child keeps.
const STRICT_ENV_ALLOWLIST: &[&str] = &["PATH", "SHELL", "SYSTEMROOT"];

/// Name of the hash variable exported into every child.
const HASH_ENV_VAR: &str = "TURBO_HASH";

#[derive(Debug, Clone)]
pub struct ExecOptions {
    pub concurrency: usize,
    pub continue_on_error: bool,
    /// Buffer each task's output and flush it as one block on completion.
    pub grouped_logs: bool,
    /// Emit GitHub Actions `::group::` framing around each task's block.
    pub github_actions: bool,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            continue_on_error: false,
            grouped_logs: false,
            github_actions: false,
        }
    }
}

/// Outcome of visiting one node.
#[derive(Debug, Clone)]
pub enum TaskResult {
    /// Restored from cache.
    Cached,
    /// Executed and exited zero.
    Built,
    /// The package has no script with this name; nothing ran.
    NoScript,
    /// Executed and failed with this (absolute) exit code.
    Failed(i32),
    /// Killed by cancellation before completing.
    Canceled,
    /// Skipped because an upstream dependency failed.
    Skipped,
    /// Infrastructure error (spawn, cache integrity, output capture).
    Error(String),
}

impl TaskResult {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            TaskResult::Failed(_) | TaskResult::Error(_) | TaskResult::Canceled
        )
    }

    pub fn exit_contribution(&self) -> i32 {
        match self {
            TaskResult::Failed(code) => (*code).abs().max(1),
            TaskResult::Error(_) | TaskResult::Canceled => 1,
            _ => 0,
        }
    }
}

/// Everything a worker needs to execute one task.
pub struct ExecContext {
    pub run_cache: Arc<RunCache>,
    pub manager: ProcessManager,
    pub tracker: TaskHashTracker,
    pub sink: OutputSink,
    /// Package manager invocation, e.g. `npm`.
    pub package_manager: String,
    pub pass_through_args: Vec<String>,
    pub global_env_mode: EnvMode,
    /// Hashed global env names (their values are forwarded under strict).
    pub global_env_names: Vec<String>,
    pub global_pass_through: Option<Vec<String>>,
    pub repo_root: crate::paths::AbsPath,
    pub opts: ExecOptions,
}

impl ExecContext {
    /// The child environment per the resolved env mode. Loose children see
    /// everything; strict children see the allowlist, hashed vars, and
    /// declared pass-throughs. The task hash rides along either way.
    fn child_env(
        &self,
        node: &TaskNode,
        hash: &str,
    ) -> std::collections::BTreeMap<String, String> {
        let task_mode =
            env::resolve_task_mode(self.global_env_mode, node.definition.pass_through_env.as_ref());

        let mut child_env = match task_mode {
            EnvMode::Strict => {
                let mut names: Vec<String> = STRICT_ENV_ALLOWLIST
                    .iter()
                    .map(|s| s.to_string())
                    .collect();
                names.extend(self.global_env_names.iter().cloned());
                names.extend(self.global_pass_through.clone().unwrap_or_default());
                names.extend(node.definition.env_var_dependencies.iter().cloned());
                names.extend(node.definition.pass_through_env.clone().unwrap_or_default());
                env::capture(&env::expand_wildcards(&names))
            }
            _ => std::env::vars().collect(),
        };

        child_env.insert(HASH_ENV_VAR.to_string(), hash.to_string());
        child_env
    }

    /// Visit one node: restore from cache or execute and store.
    async fn exec_task(
        self: Arc<Self>,
        node: TaskNode,
        hash: String,
        cancel: watch::Receiver<bool>,
    ) -> (TaskResult, Option<TaskExecutionSummary>) {
        let start_time = now_ms();
        let label = format!("{}:{}", node.id.package(), node.id.task());

        let Some(_command) = node.command.clone() else {
            debug!(task = %node.id, "no script in package; skipping");
            return (TaskResult::NoScript, None);
        };

        // Grouped mode buffers this task's lines and flushes them as one
        // block at the end.
        let sink = if self.opts.grouped_logs {
            OutputSink::buffered()
        } else {
            self.sink.clone()
        };
        if self.opts.github_actions {
            sink.line(&format!("::group::{label}"));
        }

        let (result, execution) = self
            .exec_task_inner(&node, &hash, &label, &sink, cancel, start_time)
            .await;

        if self.opts.github_actions {
            sink.line("::endgroup::");
        }
        if self.opts.grouped_logs {
            sink.flush_into(&self.sink);
        }
        (result, execution)
    }

    async fn exec_task_inner(
        &self,
        node: &TaskNode,
        hash: &str,
        label: &str,
        sink: &OutputSink,
        cancel: watch::Receiver<bool>,
        start_time: u64,
    ) -> (TaskResult, Option<TaskExecutionSummary>) {
        let summary = |state: TaskState, exit_code: Option<i32>, error: Option<String>| {
            Some(TaskExecutionSummary {
                start_time,
                end_time: now_ms(),
                state,
                exit_code,
                error,
            })
        };

        let mut task_cache = self.run_cache.task_cache(node, hash);

        match task_cache.restore_outputs(sink) {
            Ok(status) if status.hit() => {
                return (TaskResult::Cached, summary(TaskState::Cached, Some(0), None));
            }
            Ok(_) => {}
            // Integrity failures never fall back to execution: a poisoned
            // artifact must surface, not be papered over by a rebuild.
            Err(e @ (CacheError::PathEscape(_) | CacheError::Integrity { .. })) => {
                error!(task = %node.id, error = %e, "cache restore failed");
                return (
                    TaskResult::Error(e.to_string()),
                    summary(TaskState::Failed, None, Some(e.to_string())),
                );
            }
            Err(e) => {
                sink.task_line(label, &format!("error fetching from cache: {e}"));
            }
        }

        let mut args = vec!["run".to_string(), node.id.task().to_string()];
        if !self.pass_through_args.is_empty() {
            args.push("--".to_string());
            args.extend(self.pass_through_args.iter().cloned());
        }
        let command = ChildCommand {
            program: self.package_manager.clone(),
            args,
            cwd: self.repo_root.resolve(&node.dir),
            env: self.child_env(node, hash),
        };

        // A log writer failure means this task cannot be cached; it still
        // runs.
        let mut log_capture = match task_cache.log_writer() {
            Ok(capture) => Some(capture),
            Err(e) => {
                warn!(task = %node.id, error = %e, "cannot capture task log; output will not be cached");
                None
            }
        };
        let streams_live = task_cache.streams_live();

        let exit = self
            .manager
            .exec(
                command,
                |line| {
                    if let Some(capture) = &mut log_capture {
                        capture.write_line(line);
                    }
                    if streams_live {
                        sink.task_line(label, line);
                    }
                },
                cancel,
            )
            .await;

        let captured_log = match log_capture {
            Some(capture) => capture.finish().is_ok(),
            None => false,
        };

        match exit {
            Ok(exit) if exit.success() => {
                let execution = summary(TaskState::Built, Some(0), None);
                let duration = execution
                    .as_ref()
                    .map(|e| e.duration_ms())
                    .unwrap_or_default();
                if captured_log {
                    if let Err(e) = task_cache.save_outputs(duration) {
                        sink.task_line(label, &format!("error caching output: {e}"));
                    }
                }
                (TaskResult::Built, execution)
            }
            Ok(ChildExit::Interrupted) => (
                TaskResult::Canceled,
                summary(TaskState::Canceled, None, None),
            ),
            Ok(exit) => {
                let code = exit.code();
                if let Err(e) = task_cache.on_error(sink) {
                    warn!(task = %node.id, error = %e, "failed to replay error output");
                }
                sink.task_line(
                    label,
                    &format!("ERROR: command finished with error: exit code {code}"),
                );
                (
                    TaskResult::Failed(code),
                    summary(TaskState::Failed, Some(code), None),
                )
            }
            Err(e) => (
                TaskResult::Error(e.to_string()),
                summary(TaskState::Failed, None, Some(e.to_string())),
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeState {
    Waiting,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

/// Walk the graph. Returns each visited task's result and execution record.
pub async fn execute(
    ctx: Arc<ExecContext>,
    graph: &TaskGraph,
    cancel_tx: watch::Sender<bool>,
) -> HashMap<TaskId, (TaskResult, Option<TaskExecutionSummary>)> {
    let ids = graph.task_ids();
    let mut states: HashMap<TaskId, NodeState> =
        ids.iter().map(|id| (id.clone(), NodeState::Waiting)).collect();
    let mut results: HashMap<TaskId, (TaskResult, Option<TaskExecutionSummary>)> =
        HashMap::new();

    let semaphore = match ctx.opts.concurrency {
        0 => None,
        n => Some(Arc::new(Semaphore::new(n))),
    };

    let mut join_set: JoinSet<(TaskId, TaskResult, Option<TaskExecutionSummary>)> =
        JoinSet::new();
    let mut stopping = false;

    loop {
        // Dispatch everything currently ready, in sorted id order for
        // deterministic tie-breaking.
        if !stopping {
            let ready: Vec<TaskId> = ids
                .iter()
                .filter(|id| {
                    states[*id] == NodeState::Waiting
                        && graph
                            .dependencies(id)
                            .iter()
                            .all(|dep| states[dep] == NodeState::Succeeded)
                })
                .cloned()
                .collect();

            for id in ready {
                states.insert(id.clone(), NodeState::Running);
                let node = graph.node(&id).expect("graph ids resolve").clone();
                let hash = ctx
                    .tracker
                    .task_hash(&id)
                    .expect("hashes computed before execution");
                let ctx = Arc::clone(&ctx);
                let semaphore = semaphore.clone();
                let cancel_rx = cancel_tx.subscribe();

                join_set.spawn(async move {
                    let _permit = match semaphore {
                        Some(semaphore) => Some(
                            semaphore
                                .acquire_owned()
                                .await
                                .expect("semaphore never closes"),
                        ),
                        None => None,
                    };
                    let task_id = node.id.clone();
                    let (result, execution) = ctx.exec_task(node, hash, cancel_rx).await;
                    (task_id, result, execution)
                });
            }
        }

        let Some(joined) = join_set.join_next().await else {
            break;
        };
        let (id, result, execution) = match joined {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "task worker panicked");
                stopping = true;
                let _ = cancel_tx.send(true);
                continue;
            }
        };

        let failed = result.is_failure();
        states.insert(
            id.clone(),
            if failed {
                NodeState::Failed
            } else {
                NodeState::Succeeded
            },
        );

        if failed {
            // Descendants can never run; mark them skipped up front.
            for dependent in graph.transitive_dependents(&id) {
                if states[&dependent] == NodeState::Waiting {
                    states.insert(dependent.clone(), NodeState::Skipped);
                    results.insert(dependent, (TaskResult::Skipped, None));
                }
            }
            if !ctx.opts.continue_on_error && !stopping {
                stopping = true;
                debug!(task = %id, "task failed; stopping execution");
                let _ = cancel_tx.send(true);
                ctx.manager.close().await;
            }
        }

        results.insert(id, (result, execution));
    }

    // Anything still waiting when we stopped never ran.
    for (id, state) in states {
        if matches!(state, NodeState::Waiting) {
            results.entry(id).or_insert((TaskResult::Skipped, None));
        }
    }

    results
}

/// Aggregate exit code: the max child exit, or 1 for any non-exit error.
pub fn aggregate_exit_code(
    results: &HashMap<TaskId, (TaskResult, Option<TaskExecutionSummary>)>,
) -> i32 {
    results
        .values()
        .map(|(result, _)| result.exit_contribution())
        .max()
        .unwrap_or(0)
}

/// Grace period before SIGKILL during shutdown.
pub fn default_grace_period() -> Duration {
    Duration::from_secs(5)
}

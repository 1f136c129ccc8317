// src/cli.rs

//! Command-line interface.

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::config::OutputLogsMode;
use crate::run::{DryRunFormat, RunOptions, DEFAULT_CONCURRENCY};
use crate::taskhash::env::EnvMode;
use crate::ui::PrefixStyle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

#[derive(Debug, Parser)]
#[command(name = "monorun", version, about = "Incremental task runner for JS/TS monorepos")]
pub struct Cli {
    /// Set the log verbosity (overrides MONORUN_LOG).
    #[arg(long, global = true, value_enum)]
    pub log_level: Option<LogLevel>,

    /// Run as if started in this directory.
    #[arg(long, global = true)]
    pub cwd: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run tasks across the workspace.
    Run(RunArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Tasks to run (`build`, `lint`, or explicit `pkg#task`).
    #[arg(required = true)]
    pub tasks: Vec<String>,

    /// Restrict the run to these packages.
    #[arg(long)]
    pub filter: Vec<String>,

    /// Concurrent task limit; 0 means unbounded.
    #[arg(long, default_value_t = DEFAULT_CONCURRENCY)]
    pub concurrency: usize,

    /// Run all tasks with no dependency edges.
    #[arg(long)]
    pub parallel: bool,

    /// Keep running unaffected tasks after a failure.
    #[arg(long = "continue")]
    pub continue_on_error: bool,

    /// Run only the named tasks, not their dependencies.
    #[arg(long)]
    pub only: bool,

    /// Cache directory, relative to the repo root.
    #[arg(long)]
    pub cache_dir: Option<String>,

    /// Ignore existing cache artifacts (always execute).
    #[arg(long)]
    pub force: bool,

    /// Do not write new cache artifacts.
    #[arg(long)]
    pub no_cache: bool,

    /// Skip the local filesystem cache.
    #[arg(long)]
    pub remote_only: bool,

    /// Override every task's output mode.
    #[arg(long, value_parser = clap::builder::ValueParser::new(parse_output_logs))]
    pub output_logs: Option<OutputLogsMode>,

    /// Task output prefix: auto (pkg:task) or none.
    #[arg(long, default_value = "auto")]
    pub log_prefix: String,

    /// Log order: auto (interleaved) or grouped.
    #[arg(long, default_value = "auto")]
    pub log_order: String,

    /// Emit the task graph as Graphviz dot: --graph[=file].
    #[arg(long, value_name = "FILE", num_args = 0..=1, require_equals = true, default_missing_value = "")]
    pub graph: Option<String>,

    /// Plan the run without executing: --dry[=text|json].
    #[arg(long, value_name = "FORMAT", num_args = 0..=1, require_equals = true, default_missing_value = "text", value_parser = clap::builder::ValueParser::new(parse_dry_format))]
    pub dry: Option<DryRunFormat>,

    /// Environment variable policy for hashing and child processes.
    #[arg(long, default_value = "infer", value_parser = clap::builder::ValueParser::new(parse_env_mode))]
    pub env_mode: EnvMode,

    /// Infer framework env vars into task hashes.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub framework_inference: bool,

    /// Write a run summary file under .turbo/runs/.
    #[arg(long)]
    pub summarize: bool,

    /// Arguments after `--` are forwarded to every task.
    #[arg(last = true)]
    pub pass_through_args: Vec<String>,
}

fn parse_output_logs(s: &str) -> Result<OutputLogsMode, String> {
    s.parse()
}

fn parse_dry_format(s: &str) -> Result<DryRunFormat, String> {
    s.parse()
}

fn parse_env_mode(s: &str) -> Result<EnvMode, String> {
    s.parse()
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false)
}

impl RunArgs {
    /// Resolve CLI flags plus ambient environment into run options.
    pub fn into_options(self) -> RunOptions {
        use std::io::IsTerminal;

        let github_actions = env_flag("GITHUB_ACTIONS");
        RunOptions {
            tasks: self.tasks,
            filter: self.filter,
            concurrency: self.concurrency,
            parallel: self.parallel,
            continue_on_error: self.continue_on_error,
            only: self.only,
            cache_dir: self.cache_dir,
            force: self.force || env_flag("TURBO_FORCE"),
            no_cache: self.no_cache,
            remote_only: self.remote_only || env_flag("TURBO_REMOTE_ONLY"),
            output_logs: self.output_logs,
            log_prefix: if self.log_prefix == "none" {
                PrefixStyle::None
            } else {
                PrefixStyle::Task
            },
            grouped_logs: self.log_order == "grouped" || github_actions,
            github_actions,
            env_mode: self.env_mode,
            framework_inference: self.framework_inference,
            graph: self.graph.map(|file| {
                if file.is_empty() {
                    None
                } else {
                    Some(file)
                }
            }),
            dry_run: self.dry,
            summarize: self.summarize,
            pass_through_args: self.pass_through_args,
            remote: None,
            use_color: std::io::stdout().is_terminal() && !env_flag("NO_COLOR"),
        }
    }
}

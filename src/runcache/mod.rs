// src/runcache/mod.rs

//! Per-task cache orchestration.
//!
//! [`RunCache`] binds the artifact cache to one run's options; a
//! [`TaskCache`] is its view of a single `(task, hash)` pair:
//!
//! - `restore_outputs` answers "can this task be replayed?", restoring
//!   files and replaying the captured log on a hit;
//! - `log_writer` captures the task's combined output to the log file that
//!   ships inside the artifact;
//! - `save_outputs` expands the declared output globs and stores the
//!   artifact (log included) through the async cache.
//!
//! Every user-visible cache line follows the stable grammar
//! `<pkg>:<task>: cache {hit|miss|bypass}, … <hash>` that integration
//! tests match against.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::cache::{AsyncCache, CacheSource};
use crate::config::{OutputLogsMode, TaskOutputs};
use crate::engine::TaskNode;
use crate::errors::CacheError;
use crate::globwalk::{self, GlobFilter};
use crate::paths::{AbsPath, AnchoredPath};
use crate::taskhash::{CacheStatus, TaskHashTracker};
use crate::ui::OutputSink;

/// Directory inside a package where captured logs live.
const LOG_DIR: &str = ".turbo";

#[derive(Debug, Clone, Default)]
pub struct RunCacheOpts {
    /// `--force` / `TURBO_FORCE`: never read, always execute.
    pub skip_reads: bool,
    /// `--no-cache`: never write.
    pub skip_writes: bool,
    /// `--output-logs`: override every task's configured output mode.
    pub output_mode_override: Option<OutputLogsMode>,
}

/// Run-scoped cache front end shared by all workers.
pub struct RunCache {
    cache: Arc<AsyncCache>,
    repo_root: AbsPath,
    opts: RunCacheOpts,
    tracker: TaskHashTracker,
}

impl RunCache {
    pub fn new(
        cache: Arc<AsyncCache>,
        repo_root: AbsPath,
        opts: RunCacheOpts,
        tracker: TaskHashTracker,
    ) -> Self {
        Self {
            cache,
            repo_root,
            opts,
            tracker,
        }
    }

    pub fn cache(&self) -> &Arc<AsyncCache> {
        &self.cache
    }

    /// Bind a task node and its computed hash.
    pub fn task_cache(&self, node: &TaskNode, hash: &str) -> TaskCache {
        let output_mode = self
            .opts
            .output_mode_override
            .unwrap_or(node.definition.output_mode);
        let log_file = node
            .dir
            .join(&format!("{LOG_DIR}/turbo-{}.log", node.id.task()))
            .expect("log file path stays anchored");

        TaskCache {
            cache: Arc::clone(&self.cache),
            repo_root: self.repo_root.clone(),
            tracker: self.tracker.clone(),
            task_id_label: format!("{}:{}", node.id.package(), node.id.task()),
            task_id: node.id.clone(),
            outputs: node.definition.outputs.clone(),
            package_dir: node.dir.clone(),
            caching_disabled: !node.definition.should_cache,
            skip_reads: self.opts.skip_reads,
            skip_writes: self.opts.skip_writes,
            output_mode,
            log_file,
            hash: hash.to_string(),
            expanded_outputs: Vec::new(),
        }
    }
}

/// One task's cache session.
pub struct TaskCache {
    cache: Arc<AsyncCache>,
    repo_root: AbsPath,
    tracker: TaskHashTracker,
    task_id: crate::engine::TaskId,
    task_id_label: String,
    outputs: TaskOutputs,
    package_dir: AnchoredPath,
    caching_disabled: bool,
    skip_reads: bool,
    skip_writes: bool,
    output_mode: OutputLogsMode,
    log_file: AnchoredPath,
    hash: String,
    pub expanded_outputs: Vec<AnchoredPath>,
}

impl TaskCache {
    pub fn output_mode(&self) -> OutputLogsMode {
        self.output_mode
    }

    pub fn log_file(&self) -> &AnchoredPath {
        &self.log_file
    }

    fn announces(&self) -> bool {
        !matches!(self.output_mode, OutputLogsMode::None | OutputLogsMode::ErrorsOnly)
    }

    /// Try to satisfy the task from cache. On a hit, outputs are restored
    /// and the captured log replayed according to the output mode.
    pub fn restore_outputs(&mut self, sink: &OutputSink) -> Result<CacheStatus, CacheError> {
        if self.caching_disabled || self.skip_reads {
            if self.announces() {
                sink.task_line(
                    &self.task_id_label,
                    &format!("cache bypass, force executing {}", self.hash),
                );
            }
            let status = CacheStatus::default();
            self.tracker.set_cache_status(&self.task_id, status);
            return Ok(status);
        }

        let hit = self.cache.fetch(&self.hash)?;
        let Some((source, response)) = hit else {
            if self.announces() {
                sink.task_line(
                    &self.task_id_label,
                    &format!("cache miss, executing {}", self.hash),
                );
            }
            let status = CacheStatus::default();
            self.tracker.set_cache_status(&self.task_id, status);
            return Ok(status);
        };

        self.expanded_outputs = response.files.clone();
        self.tracker
            .set_expanded_outputs(&self.task_id, response.files);

        let status = CacheStatus {
            local: source == CacheSource::Local,
            remote: source == CacheSource::Remote,
            time_saved: Some(response.duration_ms),
        };
        self.tracker.set_cache_status(&self.task_id, status);

        if self.announces() {
            sink.task_line(
                &self.task_id_label,
                &format!("cache hit, replaying output {}", self.hash),
            );
        }
        if self.output_mode == OutputLogsMode::Full {
            self.replay_log(sink)?;
        }

        Ok(status)
    }

    /// Replay the captured log file through the sink, one prefixed line at
    /// a time.
    pub fn replay_log(&self, sink: &OutputSink) -> Result<(), CacheError> {
        let path = self.repo_root.resolve(&self.log_file);
        let file = match File::open(path.as_std_path()) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(task = %self.task_id_label, "no log file to replay");
                return Ok(());
            }
            Err(e) => return Err(CacheError::Io(e)),
        };
        for line in BufReader::new(file).lines() {
            sink.task_line(&self.task_id_label, &line?);
        }
        Ok(())
    }

    /// Invoked when the task failed: `errors-only` mode withheld the live
    /// stream, so surface the captured log now.
    pub fn on_error(&self, sink: &OutputSink) -> Result<(), CacheError> {
        if self.output_mode == OutputLogsMode::ErrorsOnly {
            sink.task_line(
                &self.task_id_label,
                &format!("cache miss, executing {}", self.hash),
            );
            self.replay_log(sink)?;
        }
        Ok(())
    }

    /// Open the log capture file, truncating any previous run's capture.
    pub fn log_writer(&self) -> Result<LogCapture, CacheError> {
        let path = self.repo_root.resolve(&self.log_file);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent.as_std_path())?;
        }
        let file = File::create(path.as_std_path())?;
        Ok(LogCapture {
            writer: BufWriter::new(file),
        })
    }

    /// Whether this task's live output should stream as it runs.
    pub fn streams_live(&self) -> bool {
        matches!(
            self.output_mode,
            OutputLogsMode::Full | OutputLogsMode::NewOnly
        )
    }

    /// Expand the declared outputs and store the artifact, log included.
    pub fn save_outputs(&mut self, duration_ms: u64) -> Result<(), CacheError> {
        if self.caching_disabled || self.skip_writes {
            return Ok(());
        }

        let mut files = self.expand_outputs()?;
        let log_abs = self.repo_root.resolve(&self.log_file);
        if log_abs.exists() {
            files.push(self.log_file.clone());
        }
        files.sort();
        files.dedup();

        self.cache.put(&self.hash, duration_ms, &files)?;
        self.expanded_outputs = files.clone();
        self.tracker.set_expanded_outputs(&self.task_id, files);
        Ok(())
    }

    /// Files matching `outputs.inclusions − outputs.exclusions`, restricted
    /// to the package directory.
    fn expand_outputs(&self) -> Result<Vec<AnchoredPath>, CacheError> {
        if self.outputs.inclusions.is_empty() {
            return Ok(Vec::new());
        }

        let scope = |patterns: &[String]| -> Vec<String> {
            patterns
                .iter()
                .map(|p| {
                    if self.package_dir.as_str().is_empty() {
                        p.clone()
                    } else {
                        format!("{}/{}", self.package_dir, p)
                    }
                })
                .collect()
        };

        let filter = GlobFilter::new(
            &scope(&self.outputs.inclusions),
            &scope(&self.outputs.exclusions),
        )
        .map_err(|e| CacheError::Integrity {
            hash: self.hash.clone(),
            detail: format!("invalid output glob: {e}"),
        })?;

        let package_root = self.repo_root.resolve(&self.package_dir);
        globwalk::glob_files(&self.repo_root, &package_root, &filter).map_err(|e| {
            CacheError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                e.to_string(),
            ))
        })
    }
}

/// Captures a task's combined stdout/stderr for the artifact.
pub struct LogCapture {
    writer: BufWriter<File>,
}

impl LogCapture {
    pub fn write_line(&mut self, line: &str) {
        // Output capture is best-effort: a full disk should not kill the
        // task, only its cacheability.
        if writeln!(self.writer, "{line}").is_err() {
            warn!("failed to write task log line");
        }
    }

    pub fn finish(mut self) -> Result<(), CacheError> {
        self.writer.flush()?;
        Ok(())
    }
}

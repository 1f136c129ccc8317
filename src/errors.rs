// src/errors.rs

//! Crate-wide error taxonomy.
//!
//! Errors are grouped by the phase that produces them:
//!
//! - [`ConfigError`]: anything wrong with `turbo.json`, the workspace, or the
//!   requested task set. Fatal before any task runs.
//! - [`HashError`]: fingerprint computation failures. Fatal for the task.
//! - [`CacheError`]: cache backends and artifact integrity.
//! - [`ExecError`]: child process failures, including non-zero exits.

use thiserror::Error;

use crate::engine::TaskId;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not find task {0} in project")]
    UnknownTask(String),

    #[error("could not find workspace {package} from task {task_id}")]
    UnknownPackage { package: String, task_id: String },

    #[error("{0} depends on itself")]
    SelfDependency(String),

    #[error("cyclic dependency detected: {0}")]
    Cycle(String),

    #[error("\"{persistent}\" is a persistent task, \"{dependent}\" cannot depend on it")]
    PersistentDependency {
        persistent: TaskId,
        dependent: TaskId,
    },

    #[error("you specified \"{0}\" in the \"env\" key; you should not prefix your environment variables with \"$\"")]
    EnvVarPrefix(String),

    #[error("package tasks (<package>#<task>) are not allowed in single-package repositories: found {0}")]
    SinglePackageTask(String),

    #[error("cannot override \"{key}\" in workspace configuration for {package}")]
    InvalidOverride { package: String, key: String },

    #[error("no package found matching filter {0}")]
    UnknownFilter(String),

    #[error("root task {task} ({command}) looks like it invokes monorun and might cause a loop")]
    RecursiveRootTask { task: String, command: String },

    #[error("could not read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum HashError {
    #[error("missing input file {0}")]
    MissingInput(String),

    #[error("could not read {path}: {source}")]
    UnreadableInput {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("scm unavailable: {0}")]
    Scm(#[from] git2::Error),

    #[error(transparent)]
    Path(#[from] crate::paths::PathError),

    #[error("invalid glob: {0}")]
    Glob(String),
}

#[derive(Debug, Error)]
pub enum CacheError {
    // Recoverable: the client downgrades to local-only for the rest of the
    // run and warns once.
    #[error("remote caching is disabled for this team")]
    RemoteDisabled,

    #[error("remote cache rejected credentials (HTTP {0})")]
    Unauthorized(u16),

    #[error("artifact entry {0} escapes the repository root")]
    PathEscape(String),

    #[error("artifact for {hash} is corrupt: {detail}")]
    Integrity { hash: String, detail: String },

    #[error("cache shutdown timed out with {0} pending writes")]
    ShutdownTimeout(usize),

    #[error("remote cache request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("command exited with code {0}")]
    Exit(i32),

    #[error("failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to capture outputs for \"{task_id}\": {detail}")]
    OutputCapture { task_id: TaskId, detail: String },
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("error preparing engine: {0}")]
    Config(#[from] ConfigError),

    #[error("hashing error: {0}")]
    Hash(#[from] HashError),

    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

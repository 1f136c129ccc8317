// src/config/mod.rs

//! Pipeline configuration.
//!
//! - [`raw`] reads `turbo.json` (JSON with comments) into raw serde structs.
//! - [`pipeline`] normalizes raw entries into [`pipeline::TaskDefinition`]s:
//!   `dependsOn` markers become typed variants, output globs are split into
//!   inclusions/exclusions, workspace overrides are merged key-by-key.
//!
//! Nothing downstream of this module ever inspects a `^` or `$` prefix; the
//! lexical markers die at parse time.

pub mod pipeline;
pub mod raw;

pub use pipeline::{
    OutputLogsMode, Pipeline, RootConfig, TaskDefinition, TaskDependency, TaskOutputs,
};
pub use raw::{load_root_config, load_workspace_overrides, RemoteCacheOptions};

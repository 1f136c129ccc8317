// src/run/dry.rs

//! Dry-run projection.
//!
//! Walks the same graph the real run would, at concurrency 1, computing
//! every hash and probing the cache (`exists` only — nothing is downloaded
//! and nothing spawns). The result is the structured plan: task summaries
//! with cache state, dependencies/dependents cross-referenced by task id,
//! and the global hash inputs, rendered as text tables or a JSON document.

use crate::cache::AsyncCache;
use crate::engine::TaskGraph;
use crate::errors::Result;
use crate::ui::OutputSink;
use crate::workspace::WorkspaceGraph;

use super::summary::RunSummary;
use super::RunContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DryRunFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for DryRunFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "" | "text" => Ok(DryRunFormat::Text),
            "json" => Ok(DryRunFormat::Json),
            other => Err(format!("invalid dry-run format: {other}")),
        }
    }
}

/// Populate the run summary without executing anything, then render it.
pub fn execute_dry_run(
    ctx: &RunContext<'_>,
    graph: &TaskGraph,
    workspace: &WorkspaceGraph,
    cache: &AsyncCache,
    summary: &mut RunSummary,
    format: DryRunFormat,
    sink: &OutputSink,
) -> Result<()> {
    for id in graph.topological_order() {
        let node = graph.node(&id).expect("topological order lists graph nodes");
        let hash = ctx
            .tracker
            .task_hash(&id)
            .expect("graph hashed before dry run");

        let status = cache.exists(&hash);
        summary.add_task(ctx.build_task_summary(graph, node, &hash, status.into(), None));
    }

    match format {
        DryRunFormat::Json => {
            let rendered = serde_json::to_string_pretty(&summary.to_json())
                .expect("summary serializes");
            sink.line(&rendered);
        }
        DryRunFormat::Text => {
            sink.line(&summary.render_text(workspace));
        }
    }
    Ok(())
}

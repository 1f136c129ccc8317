// tests/dry_run.rs

//! Dry-run projection: JSON shape and cache probing without execution.

use std::sync::Arc;

use monorun::cache::{AsyncCache, CacheConfig};
use monorun::engine::EngineBuilder;
use monorun::run::dry::{execute_dry_run, DryRunFormat};
use monorun::run::summary::RunSummary;
use monorun::run::RunContext;
use monorun::scm::Scm;
use monorun::taskhash::env::EnvMode;
use monorun::taskhash::{GlobalHashInputs, TaskHasher};
use monorun::ui::OutputSink;
use monorun_test_utils::{PipelineBuilder, TaskDefinitionBuilder, TestRepo, WorkspaceBuilder};

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn dry_run_json(format: DryRunFormat) -> (String, TestRepo) {
    let repo = TestRepo::new();
    repo.write_file("packages/web/src/index.ts", "code");

    let workspace = WorkspaceBuilder::new()
        .package("web", &[], &[("build", "tsc"), ("test", "vitest run")])
        .build();
    let config = PipelineBuilder::new()
        .task(
            "build",
            TaskDefinitionBuilder::new().outputs(&["dist/**"]).build(),
        )
        .task(
            "test",
            TaskDefinitionBuilder::new().depends_on(&["build"]).build(),
        )
        .build_root_config();

    let scm = Scm::discover(repo.root());
    let graph = EngineBuilder::new(&workspace, &config.pipeline)
        .build(&strings(&["test"]), &strings(&["web"]))
        .unwrap();

    let global = GlobalHashInputs::compute(
        repo.root(),
        &scm,
        &workspace,
        &config,
        EnvMode::Infer,
        false,
    )
    .unwrap();
    let hasher = TaskHasher::new(repo.root(), &scm, &workspace, &global, Vec::new());
    hasher.hash_graph(&graph).unwrap();

    let cache = Arc::new(
        AsyncCache::new(&CacheConfig::local_only(repo.root()), repo.root()).unwrap(),
    );
    let ctx = RunContext {
        workspace: &workspace,
        tracker: hasher.tracker(),
        global_env_mode: global.env_mode,
        pass_through_args: Vec::new(),
        single_package: false,
    };
    let mut summary = RunSummary::new(
        false,
        vec!["web".to_string()],
        global.clone(),
        scm.state(),
    );

    let sink = OutputSink::buffered();
    execute_dry_run(
        &ctx,
        &graph,
        &workspace,
        &cache,
        &mut summary,
        format,
        &sink,
    )
    .unwrap();

    (sink.buffered_contents(), repo)
}

#[test]
fn json_document_has_the_contract_key_set() {
    let (output, _repo) = dry_run_json(DryRunFormat::Json);
    let value: serde_json::Value = serde_json::from_str(output.trim()).unwrap();

    let object = value.as_object().unwrap();
    for key in [
        "id",
        "version",
        "turboVersion",
        "globalCacheInputs",
        "envMode",
        "frameworkInference",
        "tasks",
        "user",
        "scm",
        "monorepo",
        "packages",
    ] {
        assert!(object.contains_key(key), "missing top-level key {key}");
    }

    assert_eq!(value["version"], "0");
    assert_eq!(value["packages"][0], "web");
    assert_eq!(value["scm"]["type"], "manual");

    let global = value["globalCacheInputs"].as_object().unwrap();
    for key in [
        "rootKey",
        "files",
        "hashOfExternalDependencies",
        "environmentVariables",
    ] {
        assert!(global.contains_key(key), "missing globalCacheInputs key {key}");
    }
}

#[test]
fn tasks_cross_reference_by_task_id() {
    let (output, _repo) = dry_run_json(DryRunFormat::Json);
    let value: serde_json::Value = serde_json::from_str(output.trim()).unwrap();

    let tasks = value["tasks"].as_array().unwrap();
    assert_eq!(tasks.len(), 2);

    let build = tasks
        .iter()
        .find(|t| t["taskId"] == "web#build")
        .expect("build task present");
    let test = tasks
        .iter()
        .find(|t| t["taskId"] == "web#test")
        .expect("test task present");

    assert_eq!(build["dependents"][0], "web#test");
    assert_eq!(test["dependencies"][0], "web#build");
    assert_eq!(build["command"], "tsc");
    assert_eq!(test["command"], "vitest run");

    // Hashes are 16 hex chars.
    for task in tasks {
        let hash = task["hash"].as_str().unwrap();
        assert_eq!(hash.len(), 16);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    // Nothing executed: both tasks are cold cache misses.
    assert_eq!(build["cache"]["status"], "MISS");
    assert_eq!(build["cache"]["local"], false);
    assert_eq!(build["cache"]["remote"], false);

    // The resolved definition reflects normalization.
    assert_eq!(build["resolvedTaskDefinition"]["outputs"][0], "dist/**");
    assert_eq!(build["resolvedTaskDefinition"]["cache"], true);
    assert_eq!(test["resolvedTaskDefinition"]["dependsOn"][0], "build");
}

#[test]
fn text_rendering_lists_scope_and_tasks() {
    let (output, _repo) = dry_run_json(DryRunFormat::Text);
    assert!(output.contains("Packages in Scope"));
    assert!(output.contains("Global Hash Inputs"));
    assert!(output.contains("Tasks to Run"));
    assert!(output.contains("web#build"));
    assert!(output.contains("web#test"));
    assert!(output.contains("Inputs Files Considered"));
}

#[test]
fn dry_run_does_not_create_outputs_or_execute() {
    let (_output, repo) = dry_run_json(DryRunFormat::Json);
    assert!(!repo.exists("packages/web/dist"));
    assert!(!repo.exists("packages/web/.turbo"));
}

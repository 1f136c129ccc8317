// tests/cache_roundtrip.rs

//! Artifact storage round trips and integrity guarantees.

use std::sync::Arc;

use monorun::cache::{AsyncCache, CacheConfig};
use monorun::config::{TaskDefinition, TaskOutputs};
use monorun::engine::{TaskId, TaskNode};
use monorun::paths::{AbsPath, AnchoredPath};
use monorun::runcache::{RunCache, RunCacheOpts};
use monorun::taskhash::TaskHashTracker;
use monorun::ui::OutputSink;
use monorun_test_utils::TestRepo;

fn cache_for(repo: &TestRepo) -> Arc<AsyncCache> {
    let config = CacheConfig::local_only(repo.root());
    Arc::new(AsyncCache::new(&config, repo.root()).unwrap())
}

fn build_node(outputs: &[&str], exclusions: &[&str]) -> TaskNode {
    let mut definition = TaskDefinition::default();
    definition.outputs = TaskOutputs {
        inclusions: outputs.iter().map(|s| s.to_string()).collect(),
        exclusions: exclusions.iter().map(|s| s.to_string()).collect(),
    };
    TaskNode {
        id: TaskId::new("web", "build"),
        definition,
        command: Some("build".to_string()),
        dir: AnchoredPath::new("packages/web").unwrap(),
    }
}

#[test]
fn outputs_and_log_round_trip_exactly() {
    let repo = TestRepo::new();
    let run_cache = RunCache::new(
        cache_for(&repo),
        repo.root().clone(),
        RunCacheOpts::default(),
        TaskHashTracker::new(),
    );
    let node = build_node(&["dist/**"], &["dist/**/*.map"]);
    let sink = OutputSink::buffered();

    repo.write_file("packages/web/dist/main.js", "bundle");
    repo.write_file("packages/web/dist/main.js.map", "sourcemap");
    repo.write_file("packages/web/dist/css/app.css", "styles");

    let mut task_cache = run_cache.task_cache(&node, "abc123");
    assert!(!task_cache.restore_outputs(&sink).unwrap().hit());
    let mut log = task_cache.log_writer().unwrap();
    log.write_line("built 3 assets");
    log.finish().unwrap();
    task_cache.save_outputs(420).unwrap();

    // The excluded sourcemap must not be part of the artifact.
    let stored: Vec<String> = task_cache
        .expanded_outputs
        .iter()
        .map(|p| p.to_string())
        .collect();
    assert!(stored.contains(&"packages/web/dist/main.js".to_string()));
    assert!(stored.contains(&"packages/web/dist/css/app.css".to_string()));
    assert!(!stored.iter().any(|p| p.ends_with(".map")));

    // Wipe and restore.
    std::fs::remove_dir_all(repo.root().join("packages/web").as_std_path()).unwrap();
    let replay_sink = OutputSink::buffered();
    let mut second = run_cache.task_cache(&node, "abc123");
    let status = second.restore_outputs(&replay_sink).unwrap();
    assert!(status.hit());
    assert!(status.local);
    assert_eq!(status.time_saved, Some(420));

    assert_eq!(repo.read_file("packages/web/dist/main.js"), "bundle");
    assert_eq!(repo.read_file("packages/web/dist/css/app.css"), "styles");
    assert!(!repo.exists("packages/web/dist/main.js.map"));

    let output = replay_sink.buffered_contents();
    assert!(output.contains("cache hit, replaying output abc123"));
    assert!(output.contains("web:build: built 3 assets"));
}

#[test]
fn poisoned_artifact_does_not_fall_back_to_files() {
    let repo = TestRepo::new();
    let cache = cache_for(&repo);

    // Store a hand-built artifact whose tar escapes the root.
    use flate2::write::GzEncoder;
    use flate2::Compression;
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    let mut header = tar::Header::new_gnu();
    header.set_size(4);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append_data(&mut header, "../evil.txt", "evil".as_bytes())
        .unwrap();
    let body = builder.into_inner().unwrap().finish().unwrap();

    let cache_dir = repo.root().join("node_modules/.cache/turbo");
    std::fs::create_dir_all(cache_dir.as_std_path()).unwrap();
    std::fs::write(
        cache_dir.join("bad999.tar.gz").as_std_path(),
        &body,
    )
    .unwrap();
    std::fs::write(
        cache_dir.join("bad999-meta.json").as_std_path(),
        r#"{"hash": "bad999", "duration": 1}"#,
    )
    .unwrap();

    let err = cache.fetch("bad999").unwrap_err();
    assert!(err.to_string().contains("escapes the repository root"));
    assert!(!repo
        .root()
        .parent()
        .unwrap()
        .join("evil.txt")
        .exists());
}

#[test]
fn missing_metadata_is_a_miss_not_an_error() {
    let repo = TestRepo::new();
    let cache = cache_for(&repo);

    let cache_dir = repo.root().join("node_modules/.cache/turbo");
    std::fs::create_dir_all(cache_dir.as_std_path()).unwrap();
    std::fs::write(cache_dir.join("lonely.tar.gz").as_std_path(), b"junk").unwrap();

    assert!(!cache.exists("lonely").hit());
    assert!(cache.fetch("lonely").unwrap().is_none());
}

#[test]
fn empty_outputs_cache_only_the_log() {
    let repo = TestRepo::new();
    let run_cache = RunCache::new(
        cache_for(&repo),
        repo.root().clone(),
        RunCacheOpts::default(),
        TaskHashTracker::new(),
    );
    // A lint-style task: no outputs, but its log replays on hit.
    let node = TaskNode {
        id: TaskId::new("web", "lint"),
        definition: TaskDefinition::default(),
        command: Some("lint".to_string()),
        dir: AnchoredPath::new("packages/web").unwrap(),
    };
    let sink = OutputSink::buffered();

    let mut task_cache = run_cache.task_cache(&node, "00ff00");
    task_cache.restore_outputs(&sink).unwrap();
    let mut log = task_cache.log_writer().unwrap();
    log.write_line("no lint errors");
    log.finish().unwrap();
    task_cache.save_outputs(99).unwrap();

    std::fs::remove_dir_all(repo.root().join("packages/web").as_std_path()).unwrap();
    let replay_sink = OutputSink::buffered();
    let mut second = run_cache.task_cache(&node, "00ff00");
    assert!(second.restore_outputs(&replay_sink).unwrap().hit());
    assert!(replay_sink
        .buffered_contents()
        .contains("web:lint: no lint errors"));
}

// tests/scheduler_exec.rs

//! End-to-end runs against on-disk fixtures with a stub package manager.

use monorun::run::{self, RunOptions};
use monorun_test_utils::TestRepo;
use serde_json::json;

const GITIGNORE: &str = "foo\ncount.txt\norder.txt\n.turbo/\nnode_modules/\n";

fn single_package_repo() -> TestRepo {
    let repo = TestRepo::new();
    repo.single_package_manifest(&[(
        "build",
        "echo building > foo; echo ran >> count.txt",
    )]);
    repo.write_turbo_json(&json!({
        "pipeline": {
            "build": { "outputs": ["foo"] }
        }
    }));
    repo.write_file(".gitignore", GITIGNORE);
    repo.write_file("src/input.txt", "v1");
    repo.git_commit_all();
    repo
}

fn options(tasks: &[&str]) -> RunOptions {
    RunOptions {
        tasks: tasks.iter().map(|s| s.to_string()).collect(),
        ..Default::default()
    }
}

#[tokio::test]
async fn first_run_executes_second_run_replays() {
    let repo = single_package_repo();

    let exit = run::run(repo.root(), options(&["build"])).await.unwrap();
    assert_eq!(exit, 0);
    assert_eq!(repo.read_file("foo"), "building\n");
    assert_eq!(repo.read_file("count.txt"), "ran\n");

    // Remove the output; the second run must restore it from cache without
    // executing the script again.
    std::fs::remove_file(repo.root().join("foo").as_std_path()).unwrap();
    let exit = run::run(repo.root(), options(&["build"])).await.unwrap();
    assert_eq!(exit, 0);
    assert_eq!(repo.read_file("foo"), "building\n");
    assert_eq!(repo.read_file("count.txt"), "ran\n", "script ran twice");
}

#[tokio::test]
async fn editing_a_tracked_file_invalidates_the_cache() {
    let repo = single_package_repo();

    run::run(repo.root(), options(&["build"])).await.unwrap();
    assert_eq!(repo.read_file("count.txt"), "ran\n");

    repo.write_file("src/input.txt", "v2");
    run::run(repo.root(), options(&["build"])).await.unwrap();
    assert_eq!(repo.read_file("count.txt"), "ran\nran\n", "expected a re-run");
}

#[tokio::test]
async fn force_bypasses_the_cache() {
    let repo = single_package_repo();

    run::run(repo.root(), options(&["build"])).await.unwrap();
    let mut opts = options(&["build"]);
    opts.force = true;
    run::run(repo.root(), opts).await.unwrap();
    assert_eq!(repo.read_file("count.txt"), "ran\nran\n");
}

#[tokio::test]
async fn failing_task_sets_the_aggregate_exit_code() {
    let repo = TestRepo::new();
    repo.single_package_manifest(&[("build", "exit 3")]);
    repo.write_turbo_json(&json!({
        "pipeline": { "build": { "cache": false } }
    }));

    let exit = run::run(repo.root(), options(&["build"])).await.unwrap();
    assert_eq!(exit, 3);
}

fn multi_package_repo() -> TestRepo {
    let repo = TestRepo::new();
    repo.root_manifest(&["packages/*"]);
    repo.add_package("lib", &[], &[("build", "echo lib >> ../../order.txt")]);
    repo.add_package(
        "app",
        &["lib"],
        &[("build", "echo app >> ../../order.txt")],
    );
    repo.write_turbo_json(&json!({
        "pipeline": {
            "build": { "dependsOn": ["^build"], "cache": false }
        }
    }));
    repo.write_file(".gitignore", GITIGNORE);
    repo.git_commit_all();
    repo
}

#[tokio::test]
async fn dependencies_complete_before_dependents_start() {
    let repo = multi_package_repo();
    let exit = run::run(repo.root(), options(&["build"])).await.unwrap();
    assert_eq!(exit, 0);
    assert_eq!(repo.read_file("order.txt"), "lib\napp\n");
}

#[tokio::test]
async fn failed_dependency_skips_dependents() {
    let repo = TestRepo::new();
    repo.root_manifest(&["packages/*"]);
    repo.add_package("lib", &[], &[("build", "exit 7")]);
    repo.add_package(
        "app",
        &["lib"],
        &[("build", "echo app >> ../../order.txt")],
    );
    repo.write_turbo_json(&json!({
        "pipeline": {
            "build": { "dependsOn": ["^build"], "cache": false }
        }
    }));

    let exit = run::run(repo.root(), options(&["build"])).await.unwrap();
    assert_eq!(exit, 7);
    assert!(!repo.exists("order.txt"), "dependent ran despite failed dep");
}

#[tokio::test]
async fn continue_on_error_runs_unaffected_siblings() {
    let repo = TestRepo::new();
    repo.root_manifest(&["packages/*"]);
    repo.add_package("bad", &[], &[("build", "exit 5")]);
    repo.add_package(
        "good",
        &[],
        &[("build", "echo good >> ../../order.txt")],
    );
    repo.write_turbo_json(&json!({
        "pipeline": { "build": { "cache": false } }
    }));

    let mut opts = options(&["build"]);
    opts.continue_on_error = true;
    // Serial so the failure lands before the sibling is dispatched; the
    // sibling must still run.
    opts.concurrency = 1;
    let exit = run::run(repo.root(), opts).await.unwrap();
    assert_eq!(exit, 5);
    assert_eq!(repo.read_file("order.txt"), "good\n");
}

#[tokio::test]
async fn missing_script_nodes_are_visited_but_not_run() {
    let repo = TestRepo::new();
    repo.root_manifest(&["packages/*"]);
    repo.add_package("lib", &[], &[]);
    repo.add_package(
        "app",
        &["lib"],
        &[("build", "echo app >> ../../order.txt")],
    );
    repo.write_turbo_json(&json!({
        "pipeline": {
            "build": { "dependsOn": ["^build"], "cache": false }
        }
    }));

    let exit = run::run(repo.root(), options(&["build"])).await.unwrap();
    assert_eq!(exit, 0);
    assert_eq!(repo.read_file("order.txt"), "app\n");
}

#[tokio::test]
async fn unknown_task_fails_before_anything_runs() {
    let repo = single_package_repo();
    let err = run::run(repo.root(), options(&["deploy"])).await.unwrap_err();
    let message = err.to_string();
    assert!(message.contains("error preparing engine"), "{message}");
    assert!(message.contains("could not find task deploy"), "{message}");
}

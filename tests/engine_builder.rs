// tests/engine_builder.rs

//! Task graph expansion shapes over in-memory workspaces.

use monorun::engine::{EngineBuilder, TaskId};
use monorun_test_utils::{PipelineBuilder, TaskDefinitionBuilder, WorkspaceBuilder};

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[test]
fn scope_pulls_in_transitive_topological_dependencies() {
    // app-a → lib-a → lib-b → lib-d
    // app-b → lib-b, lib-c
    let workspace = WorkspaceBuilder::new()
        .package("app-a", &["lib-a"], &[("build", "build app-a")])
        .package("app-b", &["lib-b", "lib-c"], &[("build", "build app-b")])
        .package("lib-a", &["lib-b"], &[("build", "build lib-a")])
        .package("lib-b", &["lib-d"], &[("build", "build lib-b")])
        .package("lib-c", &[], &[("build", "build lib-c")])
        .package("lib-d", &[], &[("build", "build lib-d")])
        .build();
    let pipeline = PipelineBuilder::new()
        .task("build", TaskDefinitionBuilder::new().depends_on(&["^build"]).build())
        .build();

    let graph = EngineBuilder::new(&workspace, &pipeline)
        .build(&strings(&["build"]), &strings(&["app-b"]))
        .unwrap();

    let ids: Vec<String> = graph.task_ids().iter().map(|id| id.to_string()).collect();
    assert_eq!(
        ids,
        vec!["app-b#build", "lib-b#build", "lib-c#build", "lib-d#build"]
    );

    assert_eq!(
        graph.dependencies(&TaskId::new("app-b", "build")),
        vec![TaskId::new("lib-b", "build"), TaskId::new("lib-c", "build")]
    );
    assert_eq!(
        graph.dependencies(&TaskId::new("lib-b", "build")),
        vec![TaskId::new("lib-d", "build")]
    );
    assert!(graph.dependencies(&TaskId::new("lib-c", "build")).is_empty());
    assert!(graph.dependencies(&TaskId::new("lib-d", "build")).is_empty());
}

#[test]
fn same_package_dependencies_chain() {
    let workspace = WorkspaceBuilder::new()
        .package(
            "web",
            &[],
            &[("prepare", "prep"), ("build", "build"), ("test", "test")],
        )
        .build();
    let pipeline = PipelineBuilder::new()
        .task("prepare", TaskDefinitionBuilder::new().build())
        .task(
            "build",
            TaskDefinitionBuilder::new().depends_on(&["prepare"]).build(),
        )
        .task(
            "test",
            TaskDefinitionBuilder::new().depends_on(&["build"]).build(),
        )
        .build();

    let graph = EngineBuilder::new(&workspace, &pipeline)
        .build(&strings(&["test"]), &strings(&["web"]))
        .unwrap();

    assert_eq!(graph.len(), 3);
    let order = graph.topological_order();
    let position = |task: &str| {
        order
            .iter()
            .position(|id| id.task() == task)
            .expect("task in order")
    };
    assert!(position("prepare") < position("build"));
    assert!(position("build") < position("test"));
}

#[test]
fn explicit_package_task_seeds_one_node() {
    let workspace = WorkspaceBuilder::new()
        .package("web", &[], &[("build", "build web")])
        .package("docs", &[], &[("build", "build docs")])
        .build();
    let pipeline = PipelineBuilder::new()
        .task("build", TaskDefinitionBuilder::new().build())
        .build();

    let graph = EngineBuilder::new(&workspace, &pipeline)
        .build(&strings(&["web#build"]), &strings(&["web", "docs"]))
        .unwrap();
    let ids: Vec<String> = graph.task_ids().iter().map(|id| id.to_string()).collect();
    assert_eq!(ids, vec!["web#build"]);
}

#[test]
fn transitive_dependents_cross_packages() {
    let workspace = WorkspaceBuilder::new()
        .package("app", &["lib"], &[("build", "b"), ("test", "t")])
        .package("lib", &[], &[("build", "b")])
        .build();
    let pipeline = PipelineBuilder::new()
        .task("build", TaskDefinitionBuilder::new().depends_on(&["^build"]).build())
        .task("test", TaskDefinitionBuilder::new().depends_on(&["build"]).build())
        .build();

    let graph = EngineBuilder::new(&workspace, &pipeline)
        .build(&strings(&["test"]), &strings(&["app", "lib"]))
        .unwrap();

    let dependents = graph.transitive_dependents(&TaskId::new("lib", "build"));
    assert!(dependents.contains(&TaskId::new("app", "build")));
    assert!(dependents.contains(&TaskId::new("app", "test")));
}

#[test]
fn persistent_dependency_fails_with_both_endpoints() {
    let workspace = WorkspaceBuilder::new()
        .package("app-a", &["pkg-b"], &[("build", "b")])
        .package("pkg-b", &["pkg-z"], &[("build", "b")])
        .package("pkg-z", &[], &[("build", "b"), ("dev", "watch")])
        .build();
    let pipeline = PipelineBuilder::new()
        .task("build", TaskDefinitionBuilder::new().depends_on(&["^build"]).build())
        .task("pkg-z#dev", TaskDefinitionBuilder::new().persistent(true).build())
        .task(
            "pkg-b#build",
            TaskDefinitionBuilder::new().depends_on(&["pkg-z#dev"]).build(),
        )
        .build();

    let err = EngineBuilder::new(&workspace, &pipeline)
        .build(&strings(&["build"]), &strings(&["app-a", "pkg-b", "pkg-z"]))
        .unwrap_err();
    let message = err.to_string();
    assert!(
        message.contains("\"pkg-z#dev\" is a persistent task"),
        "unexpected message: {message}"
    );
    assert!(
        message.contains("\"pkg-b#build\" cannot depend on it"),
        "unexpected message: {message}"
    );
}

#[test]
fn persistent_leaf_tasks_are_allowed() {
    let workspace = WorkspaceBuilder::new()
        .package("web", &[], &[("dev", "watch")])
        .build();
    let pipeline = PipelineBuilder::new()
        .task("dev", TaskDefinitionBuilder::new().persistent(true).cache(false).build())
        .build();

    let graph = EngineBuilder::new(&workspace, &pipeline)
        .build(&strings(&["dev"]), &strings(&["web"]))
        .unwrap();
    assert_eq!(graph.len(), 1);
}

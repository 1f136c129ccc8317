// crates/test-utils/src/repo.rs

#![allow(dead_code)]

use std::path::Path;

use monorun::paths::AbsPath;
use serde_json::json;
use tempfile::TempDir;

/// Shell shim standing in for a real package manager. It resolves
/// `<pm> run <task>` by grepping the script out of the package.json in the
/// working directory, so fixtures must keep one script per line and avoid
/// escaped quotes.
const PACKAGE_MANAGER_SHIM: &str = r#"#!/bin/sh
# test stub: <pm> run <task> [-- args]
task="$2"
cmd=$(grep -o "\"$task\": \"[^\"]*\"" package.json | head -1 | sed "s/\"$task\": \"//; s/\"$//")
if [ -z "$cmd" ]; then
  echo "missing script: $task" >&2
  exit 1
fi
shift 2
[ "$1" = "--" ] && shift
eval "$cmd \"\$@\""
"#;

/// An on-disk workspace fixture.
pub struct TestRepo {
    dir: TempDir,
    root: AbsPath,
}

impl TestRepo {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("create tempdir");
        let canonical = dir.path().canonicalize().expect("canonicalize tempdir");
        let root = AbsPath::from_std(&canonical).expect("tempdir is absolute utf-8");
        Self { dir, root }
    }

    pub fn root(&self) -> &AbsPath {
        &self.root
    }

    pub fn write_file(&self, rel: &str, contents: &str) {
        let path = self.dir.path().join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parent dirs");
        }
        std::fs::write(path, contents).expect("write fixture file");
    }

    pub fn write_json(&self, rel: &str, value: &serde_json::Value) {
        self.write_file(rel, &serde_json::to_string_pretty(value).expect("serialize"));
    }

    pub fn read_file(&self, rel: &str) -> String {
        std::fs::read_to_string(self.dir.path().join(rel)).expect("read fixture file")
    }

    pub fn exists(&self, rel: &str) -> bool {
        self.dir.path().join(rel).exists()
    }

    /// Install the package-manager shim and point the root manifest at it.
    /// Returns the manifest fragment to merge into `package.json`.
    pub fn install_package_manager(&self) -> String {
        let shim_path = self.dir.path().join(".bin/pm");
        std::fs::create_dir_all(shim_path.parent().unwrap()).expect("create .bin");
        std::fs::write(&shim_path, PACKAGE_MANAGER_SHIM).expect("write shim");
        make_executable(&shim_path);
        shim_path.to_str().expect("utf-8 shim path").to_string()
    }

    /// Write a root package.json for a multi-package workspace.
    pub fn root_manifest(&self, workspaces: &[&str]) {
        let pm = self.install_package_manager();
        self.write_json(
            "package.json",
            &json!({
                "name": "fixture-root",
                "packageManager": pm,
                "workspaces": workspaces,
            }),
        );
    }

    /// Write a root package.json for a single-package repo with scripts.
    pub fn single_package_manifest(&self, scripts: &[(&str, &str)]) {
        let pm = self.install_package_manager();
        let scripts: serde_json::Map<String, serde_json::Value> = scripts
            .iter()
            .map(|(k, v)| (k.to_string(), json!(v)))
            .collect();
        self.write_json(
            "package.json",
            &json!({
                "name": "fixture-single",
                "packageManager": pm,
                "scripts": scripts,
            }),
        );
    }

    /// Add a workspace package with scripts and dependencies.
    pub fn add_package(
        &self,
        name: &str,
        dependencies: &[&str],
        scripts: &[(&str, &str)],
    ) {
        let scripts: serde_json::Map<String, serde_json::Value> = scripts
            .iter()
            .map(|(k, v)| (k.to_string(), json!(v)))
            .collect();
        let dependencies: serde_json::Map<String, serde_json::Value> = dependencies
            .iter()
            .map(|d| (d.to_string(), json!("*")))
            .collect();
        self.write_json(
            &format!("packages/{name}/package.json"),
            &json!({
                "name": name,
                "scripts": scripts,
                "dependencies": dependencies,
            }),
        );
    }

    pub fn write_turbo_json(&self, value: &serde_json::Value) {
        self.write_json("turbo.json", value);
    }

    /// Initialise git and commit everything present.
    pub fn git_commit_all(&self) {
        let repo = match git2::Repository::open(self.dir.path()) {
            Ok(repo) => repo,
            Err(_) => git2::Repository::init(self.dir.path()).expect("git init"),
        };
        let mut index = repo.index().expect("open index");
        index
            .add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)
            .expect("git add");
        index.write().expect("write index");
        let tree_id = index.write_tree().expect("write tree");
        let tree = repo.find_tree(tree_id).expect("find tree");
        let signature =
            git2::Signature::now("fixture", "fixture@example.com").expect("signature");
        let parent = repo
            .head()
            .ok()
            .and_then(|head| head.peel_to_commit().ok());
        let parents: Vec<&git2::Commit> = parent.iter().collect();
        repo.commit(
            Some("HEAD"),
            &signature,
            &signature,
            "fixture commit",
            &tree,
            &parents,
        )
        .expect("git commit");
    }
}

impl Default for TestRepo {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
fn make_executable(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = std::fs::metadata(path).expect("stat shim").permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(path, perms).expect("chmod shim");
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) {}

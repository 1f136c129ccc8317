// src/workspace/mod.rs

//! Workspace packages and their dependency graph.
//!
//! - [`Package`] is the immutable per-workspace record: manifest scripts,
//!   directory, internal dependency names, and a hash over its external
//!   dependency declarations.
//! - [`graph::WorkspaceGraph`] is the package DAG with a synthetic root.
//!
//! Lockfile-accurate dependency closures are a collaborator's job; the
//! external-deps hash here is computed from manifest declarations, which is
//! the input this crate receives.

pub mod graph;

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::config::pipeline::ROOT_PKG_NAME;
use crate::errors::ConfigError;
use crate::globwalk::{self, GlobFilter};
use crate::hashing::CanonicalHasher;
use crate::paths::{AbsPath, AnchoredPath};

pub use graph::WorkspaceGraph;

/// One workspace member. Constructed during discovery, immutable afterwards.
#[derive(Debug, Clone)]
pub struct Package {
    pub name: String,
    /// Directory relative to the repo root. Empty for the root package.
    pub dir: AnchoredPath,
    /// Script name → shell command, straight from the manifest.
    pub scripts: BTreeMap<String, String>,
    /// Names of workspace-internal dependencies.
    pub dependencies: Vec<String>,
    /// Every dependency name the manifest declares, internal or external.
    /// Framework inference reads this.
    pub manifest_dependencies: Vec<String>,
    /// Fingerprint of the package's external dependency declarations.
    pub external_deps_hash: String,
}

impl Package {
    pub fn is_root(&self) -> bool {
        self.name == ROOT_PKG_NAME
    }

    pub fn command_for(&self, task: &str) -> Option<&str> {
        self.scripts.get(task).map(|s| s.as_str())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawManifest {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    package_manager: Option<String>,
    #[serde(default)]
    workspaces: Vec<String>,
    #[serde(default)]
    scripts: BTreeMap<String, String>,
    #[serde(default)]
    dependencies: BTreeMap<String, String>,
    #[serde(default)]
    dev_dependencies: BTreeMap<String, String>,
}

fn read_manifest(path: &AbsPath) -> Result<RawManifest, ConfigError> {
    let contents = std::fs::read_to_string(path.as_std_path()).map_err(|e| ConfigError::Io {
        path: path.to_string(),
        source: e,
    })?;
    serde_json::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.to_string(),
        source: e,
    })
}

fn external_deps_hash(external: &BTreeMap<String, String>) -> String {
    let mut hasher = CanonicalHasher::new();
    hasher.text_map(external);
    hasher.finish()
}

/// The package manager binary to run scripts with, from the root manifest's
/// `packageManager` field (`"pnpm@8.6.0"` → `pnpm`). Defaults to npm.
pub fn detect_package_manager(repo_root: &AbsPath) -> String {
    read_manifest(&repo_root.join("package.json"))
        .ok()
        .and_then(|m| m.package_manager)
        .and_then(|pm| pm.split('@').next().map(|s| s.to_string()))
        .filter(|pm| !pm.is_empty())
        .unwrap_or_else(|| "npm".to_string())
}

/// Whether the root manifest declares any workspaces; a repo without them
/// runs in single-package mode.
pub fn is_multi_package(repo_root: &AbsPath) -> bool {
    read_manifest(&repo_root.join("package.json"))
        .map(|m| !m.workspaces.is_empty())
        .unwrap_or(false)
}

/// Discover the workspace rooted at `repo_root` from `package.json`
/// workspace globs plus per-member manifests. Returns every member plus the
/// synthetic root package.
pub fn discover_packages(repo_root: &AbsPath) -> Result<Vec<Package>, ConfigError> {
    let root_manifest = read_manifest(&repo_root.join("package.json"))?;

    let mut manifests: Vec<(AnchoredPath, RawManifest)> = Vec::new();
    if !root_manifest.workspaces.is_empty() {
        // `workspaces` entries are directory globs; each member is the
        // directory holding a package.json.
        let patterns: Vec<String> = root_manifest
            .workspaces
            .iter()
            .map(|glob| format!("{}/package.json", glob.trim_end_matches('/')))
            .collect();
        let filter = GlobFilter::new(&patterns, &[])
            .map_err(|e| ConfigError::Parse {
                path: "package.json#workspaces".to_string(),
                source: serde_json::Error::io(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    e.to_string(),
                )),
            })?;
        for manifest_path in globwalk::glob_files(repo_root, repo_root, &filter)
            .map_err(|e| ConfigError::Io {
                path: repo_root.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
            })?
        {
            let abs = repo_root.resolve(&manifest_path);
            let manifest = read_manifest(&abs)?;
            let dir = AnchoredPath::new(
                manifest_path
                    .as_str()
                    .trim_end_matches("package.json")
                    .trim_end_matches('/'),
            )
            .map_err(|e| ConfigError::Io {
                path: manifest_path.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()),
            })?;
            manifests.push((dir, manifest));
        }
    }

    let member_names: Vec<String> = manifests
        .iter()
        .filter_map(|(_, m)| m.name.clone())
        .collect();

    let mut packages = Vec::new();

    let root_external: BTreeMap<String, String> = root_manifest
        .dependencies
        .iter()
        .chain(root_manifest.dev_dependencies.iter())
        .filter(|(name, _)| !member_names.contains(name))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    let root_manifest_deps: Vec<String> = root_manifest
        .dependencies
        .keys()
        .chain(root_manifest.dev_dependencies.keys())
        .cloned()
        .collect();
    packages.push(Package {
        name: ROOT_PKG_NAME.to_string(),
        dir: AnchoredPath::new("").expect("empty path is anchored"),
        scripts: root_manifest.scripts,
        dependencies: Vec::new(),
        manifest_dependencies: root_manifest_deps,
        external_deps_hash: external_deps_hash(&root_external),
    });

    for (dir, manifest) in manifests {
        let Some(name) = manifest.name else {
            continue;
        };
        let all_deps: Vec<(&String, &String)> = manifest
            .dependencies
            .iter()
            .chain(manifest.dev_dependencies.iter())
            .collect();
        let internal: Vec<String> = all_deps
            .iter()
            .filter(|(dep, _)| member_names.contains(dep))
            .map(|(dep, _)| (*dep).clone())
            .collect();
        let external: BTreeMap<String, String> = all_deps
            .iter()
            .filter(|(dep, _)| !member_names.contains(dep))
            .map(|(dep, version)| ((*dep).clone(), (*version).clone()))
            .collect();

        let manifest_dependencies: Vec<String> =
            all_deps.iter().map(|(dep, _)| (*dep).clone()).collect();

        packages.push(Package {
            name,
            dir,
            scripts: manifest.scripts,
            dependencies: internal,
            manifest_dependencies,
            external_deps_hash: external_deps_hash(&external),
        });
    }

    Ok(packages)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(root: &std::path::Path, rel: &str, contents: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    #[test]
    fn discovers_members_and_classifies_deps() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "package.json",
            r#"{"name": "root", "workspaces": ["packages/*"]}"#,
        );
        write(
            dir.path(),
            "packages/app/package.json",
            r#"{"name": "app", "scripts": {"build": "tsc"}, "dependencies": {"lib": "*", "react": "^18"}}"#,
        );
        write(
            dir.path(),
            "packages/lib/package.json",
            r#"{"name": "lib", "scripts": {"build": "tsc"}}"#,
        );

        let root = AbsPath::from_std(&dir.path().canonicalize().unwrap()).unwrap();
        let packages = discover_packages(&root).unwrap();

        let app = packages.iter().find(|p| p.name == "app").unwrap();
        assert_eq!(app.dir.as_str(), "packages/app");
        assert_eq!(app.dependencies, vec!["lib"]);
        assert_eq!(app.command_for("build"), Some("tsc"));

        let root_pkg = packages.iter().find(|p| p.is_root()).unwrap();
        assert_eq!(root_pkg.dir.as_str(), "");
    }

    #[test]
    fn external_deps_change_the_hash() {
        let mut a = BTreeMap::new();
        a.insert("react".to_string(), "18.0.0".to_string());
        let mut b = a.clone();
        b.insert("react".to_string(), "18.2.0".to_string());
        assert_ne!(external_deps_hash(&a), external_deps_hash(&b));
    }
}

// src/hashing/file_hasher.rs

//! Content hashes for the files a task depends on.
//!
//! The result is always a sorted map of anchored unix path → blob hash.
//! With no `inputs` configured, a package contributes every tracked file
//! under its directory (index hashes, corrected by working-tree status) plus
//! untracked-but-not-ignored files. With `inputs` configured, the patterns
//! are expanded inside the package directory and the matching files are
//! hashed directly; the package manifest is always included so that script
//! changes invalidate the task even under narrow inputs.

use std::collections::BTreeMap;

use tracing::debug;

use crate::errors::HashError;
use crate::globwalk::{self, GlobFilter};
use crate::paths::{AbsPath, AnchoredPath};
use crate::scm::Scm;

const PACKAGE_MANIFEST: &str = "package.json";

/// Hash all relevant files for a package, honoring the task's `inputs`.
pub fn package_file_hashes(
    scm: &Scm,
    repo_root: &AbsPath,
    package_dir: &AnchoredPath,
    inputs: &[String],
) -> Result<BTreeMap<AnchoredPath, String>, HashError> {
    if inputs.is_empty() {
        all_package_files(scm, repo_root, package_dir)
    } else {
        input_selected_files(scm, repo_root, package_dir, inputs)
    }
}

fn all_package_files(
    scm: &Scm,
    repo_root: &AbsPath,
    package_dir: &AnchoredPath,
) -> Result<BTreeMap<AnchoredPath, String>, HashError> {
    if !scm.is_git() {
        // No index to consult; hash the working tree wholesale.
        return hash_walked_files(scm, repo_root, package_dir, &["**".to_string()], &[]);
    }

    let mut result = scm.tracked_hashes(package_dir)?;
    let changed = scm.changed_files(package_dir)?;

    for deleted in &changed.deleted {
        result.remove(deleted);
    }
    for path in &changed.to_hash {
        let abs = repo_root.resolve(path);
        if !abs.exists() {
            // Raced with an unlink after status; treat as deleted.
            result.remove(path);
            continue;
        }
        result.insert(path.clone(), scm.hash_file(&abs)?);
    }

    debug!(
        package = %package_dir,
        files = result.len(),
        "hashed package files"
    );
    Ok(result)
}

fn input_selected_files(
    scm: &Scm,
    repo_root: &AbsPath,
    package_dir: &AnchoredPath,
    inputs: &[String],
) -> Result<BTreeMap<AnchoredPath, String>, HashError> {
    let (inclusions, exclusions) = globwalk::split_negations(inputs);
    let mut result = hash_walked_files(scm, repo_root, package_dir, &inclusions, &exclusions)?;

    // The manifest defines the script being run; it always participates.
    let manifest = package_dir.join(PACKAGE_MANIFEST)?;
    let manifest_abs = repo_root.resolve(&manifest);
    if manifest_abs.exists() {
        result.insert(manifest, scm.hash_file(&manifest_abs)?);
    }

    Ok(result)
}

/// Expand patterns relative to the package directory and hash each match.
fn hash_walked_files(
    scm: &Scm,
    repo_root: &AbsPath,
    package_dir: &AnchoredPath,
    inclusions: &[String],
    exclusions: &[String],
) -> Result<BTreeMap<AnchoredPath, String>, HashError> {
    let scoped = |patterns: &[String]| -> Vec<String> {
        patterns
            .iter()
            .map(|p| {
                if package_dir.as_str().is_empty() {
                    p.clone()
                } else {
                    format!("{}/{}", package_dir, p)
                }
            })
            .collect()
    };

    let filter = GlobFilter::new(&scoped(inclusions), &scoped(exclusions))
        .map_err(|e| HashError::Glob(e.to_string()))?;

    let package_root = repo_root.resolve(package_dir);
    let files = globwalk::glob_files(repo_root, &package_root, &filter)
        .map_err(|e| HashError::UnreadableInput {
            path: package_root.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
        })?;

    let mut result = BTreeMap::new();
    for file in files {
        let abs = repo_root.resolve(&file);
        result.insert(file, scm.hash_file(&abs)?);
    }
    Ok(result)
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
    fn inputs_restrict_the_file_set() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "pkg/package.json", "{\"name\":\"pkg\"}");
        write(dir.path(), "pkg/src/main.ts", "code");
        write(dir.path(), "pkg/README.md", "docs");

        let root = AbsPath::from_std(&dir.path().canonicalize().unwrap()).unwrap();
        let scm = Scm::discover(&root);
        let pkg = AnchoredPath::new("pkg").unwrap();

        let hashes =
            package_file_hashes(&scm, &root, &pkg, &["src/**".to_string()]).unwrap();
        let paths: Vec<&str> = hashes.keys().map(|k| k.as_str()).collect();
        assert_eq!(paths, vec!["pkg/package.json", "pkg/src/main.ts"]);
    }

    #[test]
    fn no_inputs_hashes_everything_outside_git() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "pkg/package.json", "{}");
        write(dir.path(), "pkg/src/a.ts", "a");

        let root = AbsPath::from_std(&dir.path().canonicalize().unwrap()).unwrap();
        let scm = Scm::discover(&root);
        let pkg = AnchoredPath::new("pkg").unwrap();

        let hashes = package_file_hashes(&scm, &root, &pkg, &[]).unwrap();
        assert_eq!(hashes.len(), 2);
    }

    #[test]
    fn content_change_changes_hash() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "pkg/src/a.ts", "before");
        let root = AbsPath::from_std(&dir.path().canonicalize().unwrap()).unwrap();
        let scm = Scm::discover(&root);
        let pkg = AnchoredPath::new("pkg").unwrap();

        let first = package_file_hashes(&scm, &root, &pkg, &[]).unwrap();
        write(dir.path(), "pkg/src/a.ts", "after");
        let second = package_file_hashes(&scm, &root, &pkg, &[]).unwrap();
        let key = AnchoredPath::new("pkg/src/a.ts").unwrap();
        assert_ne!(first.get(&key), second.get(&key));
    }
}

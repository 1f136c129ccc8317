// src/globwalk.rs

//! Doublestar glob matching and file-set expansion.
//!
//! Output declarations, task inputs, and `globalDependencies` all use the
//! same pattern language: `**` doublestar, character classes, and `!`-prefixed
//! negations. Patterns are matched against repo-relative unix paths, so a
//! compiled [`GlobFilter`] behaves identically on every platform.

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::paths::{AbsPath, AnchoredPath};

/// Directories never considered by the walker. The package manager's install
/// tree is covered by the external dependency hash instead.
const WALK_IGNORES: &[&str] = &[".git", "node_modules", ".turbo"];

/// Split a raw pattern list into inclusions and exclusions. Exclusions are
/// the patterns that start with `!`, with the marker stripped.
pub fn split_negations(patterns: &[String]) -> (Vec<String>, Vec<String>) {
    let mut inclusions = Vec::new();
    let mut exclusions = Vec::new();
    for pattern in patterns {
        match pattern.strip_prefix('!') {
            Some(negated) => exclusions.push(negated.to_string()),
            None => inclusions.push(pattern.to_string()),
        }
    }
    (inclusions, exclusions)
}

/// Compiled inclusion/exclusion sets for one task dimension.
#[derive(Debug)]
pub struct GlobFilter {
    include: GlobSet,
    exclude: Option<GlobSet>,
}

impl GlobFilter {
    pub fn new(inclusions: &[String], exclusions: &[String]) -> Result<Self> {
        let include = build_globset(inclusions)
            .with_context(|| format!("building inclusion globs {inclusions:?}"))?;
        let exclude = if exclusions.is_empty() {
            None
        } else {
            Some(
                build_globset(exclusions)
                    .with_context(|| format!("building exclusion globs {exclusions:?}"))?,
            )
        };
        Ok(Self { include, exclude })
    }

    pub fn matches(&self, rel_path: &str) -> bool {
        if !self.include.is_match(rel_path) {
            return false;
        }
        if let Some(exclude) = &self.exclude {
            if exclude.is_match(rel_path) {
                return false;
            }
        }
        true
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob =
            Glob::new(pattern).with_context(|| format!("invalid glob pattern: {pattern}"))?;
        builder.add(glob);
    }
    Ok(builder.build()?)
}

/// Collect all files under `root` matching `filter`, as anchored paths
/// relative to `anchor`. `root` must be `anchor` or nested inside it; the
/// patterns themselves are interpreted relative to `anchor`.
pub fn glob_files(
    anchor: &AbsPath,
    root: &AbsPath,
    filter: &GlobFilter,
) -> Result<Vec<AnchoredPath>> {
    let mut files = Vec::new();
    let mut stack = vec![root.clone()];

    while let Some(dir) = stack.pop() {
        let entries = match std::fs::read_dir(dir.as_std_path()) {
            Ok(entries) => entries,
            // A pattern may name a directory that the task never created.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e).with_context(|| format!("reading directory {dir}")),
        };

        for entry in entries {
            let entry = entry.with_context(|| format!("reading directory {dir}"))?;
            let path = AbsPath::from_std(&entry.path())?;
            let file_type = entry.file_type()?;

            if file_type.is_dir() {
                let name = entry.file_name();
                if WALK_IGNORES.iter().any(|skip| name.to_str() == Some(*skip)) {
                    continue;
                }
                stack.push(path);
            } else {
                let anchored = anchor.anchor(&path)?;
                if filter.matches(anchored.as_str()) {
                    files.push(anchored);
                }
            }
        }
    }

    files.sort();
    Ok(files)
}

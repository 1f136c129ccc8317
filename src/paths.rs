// src/paths.rs

//! Typed path model.
//!
//! Two path flavours flow through the runner and must never be confused:
//!
//! - [`AbsPath`]: an absolute, UTF-8 system path (the repo root, a package
//!   directory, the cache directory).
//! - [`AnchoredPath`]: a path relative to the repo root, always rendered with
//!   unix separators. Anchored paths are what we hash and what we write into
//!   cache artifacts, so they must be identical across operating systems.
//!
//! Joining an anchored path back onto an absolute anchor is the only way to
//! turn one into the other, and relativization refuses to produce a path that
//! escapes its anchor.

use std::fmt;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PathError {
    #[error("path is not absolute: {0}")]
    NotAbsolute(String),

    #[error("path is not valid UTF-8: {0}")]
    NotUtf8(String),

    #[error("path {path} is not inside {anchor}")]
    NotAnchored { path: String, anchor: String },

    #[error("anchored path escapes its anchor: {0}")]
    EscapesAnchor(String),
}

/// An absolute, UTF-8 system path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct AbsPath(Utf8PathBuf);

impl AbsPath {
    pub fn new(path: impl Into<Utf8PathBuf>) -> Result<Self, PathError> {
        let path = path.into();
        if !path.is_absolute() {
            return Err(PathError::NotAbsolute(path.into_string()));
        }
        Ok(Self(path))
    }

    /// Convert from a `std::path::Path`, failing on non-UTF-8 components.
    pub fn from_std(path: &std::path::Path) -> Result<Self, PathError> {
        let utf8 = Utf8Path::from_path(path)
            .ok_or_else(|| PathError::NotUtf8(path.display().to_string()))?;
        Self::new(utf8.to_path_buf())
    }

    /// The current working directory as an `AbsPath`.
    pub fn cwd() -> Result<Self, PathError> {
        let cwd = std::env::current_dir()
            .map_err(|e| PathError::NotAbsolute(e.to_string()))?;
        Self::from_std(&cwd)
    }

    pub fn as_path(&self) -> &Utf8Path {
        &self.0
    }

    pub fn as_std_path(&self) -> &std::path::Path {
        self.0.as_std_path()
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Join a relative fragment. Absolute fragments replace the base, which
    /// is never what we want, so they are rejected by debug assertion.
    pub fn join(&self, fragment: impl AsRef<Utf8Path>) -> AbsPath {
        let fragment = fragment.as_ref();
        debug_assert!(!fragment.is_absolute(), "joining absolute fragment {fragment}");
        AbsPath(self.0.join(fragment))
    }

    /// Join an anchored path, restoring it to a system path under `self`.
    pub fn resolve(&self, anchored: &AnchoredPath) -> AbsPath {
        let mut out = self.0.clone();
        for component in anchored.components() {
            out.push(component);
        }
        AbsPath(out)
    }

    /// Relativize `path` against `self`, producing an anchored path.
    pub fn anchor(&self, path: &AbsPath) -> Result<AnchoredPath, PathError> {
        let rel = path
            .0
            .strip_prefix(&self.0)
            .map_err(|_| PathError::NotAnchored {
                path: path.0.to_string(),
                anchor: self.0.to_string(),
            })?;
        AnchoredPath::new(rel.as_str().replace('\\', "/"))
    }

    pub fn exists(&self) -> bool {
        self.0.as_std_path().exists()
    }

    pub fn parent(&self) -> Option<AbsPath> {
        self.0.parent().map(|p| AbsPath(p.to_path_buf()))
    }
}

impl fmt::Display for AbsPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A repo-relative path with unix separators.
///
/// The empty anchored path refers to the anchor itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct AnchoredPath(String);

impl AnchoredPath {
    /// Validate a repo-relative unix path. `..` components are rejected:
    /// anchored paths are used as archive entry names and hash keys, and an
    /// escaping entry is a cache-integrity violation, not a path.
    pub fn new(path: impl Into<String>) -> Result<Self, PathError> {
        let path = path.into();
        let normalized = path.strip_prefix("./").unwrap_or(&path).to_string();
        if normalized.starts_with('/') {
            return Err(PathError::EscapesAnchor(normalized));
        }
        for component in normalized.split('/') {
            if component == ".." {
                return Err(PathError::EscapesAnchor(normalized));
            }
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|c| !c.is_empty() && *c != ".")
    }

    pub fn join(&self, fragment: &str) -> Result<AnchoredPath, PathError> {
        if self.0.is_empty() {
            AnchoredPath::new(fragment)
        } else {
            AnchoredPath::new(format!("{}/{}", self.0, fragment))
        }
    }

    /// Whether `self` is equal to or nested under `prefix`.
    pub fn starts_with(&self, prefix: &AnchoredPath) -> bool {
        if prefix.0.is_empty() {
            return true;
        }
        self.0 == prefix.0 || self.0.starts_with(&format!("{}/", prefix.0))
    }
}

impl fmt::Display for AnchoredPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

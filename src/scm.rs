// src/scm.rs

//! Git cooperation.
//!
//! File fingerprints are git blob hashes so that cache artifacts are portable
//! across checkouts: a clean clone and a long-lived working copy produce the
//! same hashes for the same contents. For tracked, unmodified files we read
//! the object id straight out of the index; everything else (modified,
//! untracked) is hashed as a blob on demand. Outside a repository every file
//! is hashed directly, which keeps the same hash space.

use std::collections::BTreeMap;

use git2::{ObjectType, Oid, Repository, Status, StatusOptions};
use serde::Serialize;
use tracing::debug;

use crate::errors::HashError;
use crate::paths::{AbsPath, AnchoredPath};

/// Repository state recorded into run summaries.
#[derive(Debug, Clone, Serialize)]
pub struct ScmState {
    #[serde(rename = "type")]
    pub kind: String,
    pub sha: Option<String>,
    pub branch: Option<String>,
}

/// Working-tree changes relative to the index, scoped to a directory.
#[derive(Debug, Default)]
pub struct ChangedFiles {
    /// Files whose current contents differ from the index (or are new).
    pub to_hash: Vec<AnchoredPath>,
    /// Files present in the index but deleted from the working tree.
    pub deleted: Vec<AnchoredPath>,
}

pub struct Scm {
    repo: Option<Repository>,
    root: AbsPath,
}

impl Scm {
    /// Open the repository containing `root`, if any. A missing repository is
    /// not an error; the hasher falls back to direct hashing.
    pub fn discover(root: &AbsPath) -> Self {
        let repo = match Repository::discover(root.as_std_path()) {
            Ok(repo) => Some(repo),
            Err(e) => {
                debug!(root = %root, error = %e, "no git repository; hashing files directly");
                None
            }
        };
        Self {
            repo,
            root: root.clone(),
        }
    }

    pub fn is_git(&self) -> bool {
        self.repo.is_some()
    }

    /// HEAD sha and branch for the run summary.
    pub fn state(&self) -> ScmState {
        let Some(repo) = &self.repo else {
            return ScmState {
                kind: "manual".to_string(),
                sha: None,
                branch: None,
            };
        };

        let (sha, branch) = match repo.head() {
            Ok(head) => {
                let sha = head.peel_to_commit().ok().map(|c| c.id().to_string());
                let branch = head.shorthand().map(|s| s.to_string());
                (sha, branch)
            }
            Err(_) => (None, None),
        };

        ScmState {
            kind: "git".to_string(),
            sha,
            branch,
        }
    }

    /// Blob object ids for every tracked file under `prefix`, keyed by
    /// anchored path. Paths in the index are already repo-relative with unix
    /// separators.
    pub fn tracked_hashes(
        &self,
        prefix: &AnchoredPath,
    ) -> Result<BTreeMap<AnchoredPath, String>, HashError> {
        let mut result = BTreeMap::new();
        let Some(repo) = &self.repo else {
            return Ok(result);
        };

        let index = repo.index()?;
        for entry in index.iter() {
            let path = String::from_utf8_lossy(&entry.path).to_string();
            let anchored = AnchoredPath::new(path)?;
            if anchored.starts_with(prefix) {
                result.insert(anchored, entry.id.to_string());
            }
        }
        Ok(result)
    }

    /// Working-tree status scoped to `prefix`: modified and untracked files
    /// to re-hash, deleted files to drop. Ignored files are excluded.
    pub fn changed_files(&self, prefix: &AnchoredPath) -> Result<ChangedFiles, HashError> {
        let mut changed = ChangedFiles::default();
        let Some(repo) = &self.repo else {
            return Ok(changed);
        };

        let mut opts = StatusOptions::new();
        opts.include_untracked(true)
            .recurse_untracked_dirs(true)
            .include_ignored(false);
        if !prefix.as_str().is_empty() {
            opts.pathspec(prefix.as_str());
        }

        let statuses = repo.statuses(Some(&mut opts))?;
        for entry in statuses.iter() {
            let Some(path) = entry.path() else { continue };
            let anchored = AnchoredPath::new(path)?;
            if !anchored.starts_with(prefix) {
                continue;
            }

            let status = entry.status();
            if status.intersects(Status::WT_DELETED | Status::INDEX_DELETED) {
                changed.deleted.push(anchored);
            } else if status.intersects(
                Status::WT_NEW
                    | Status::WT_MODIFIED
                    | Status::WT_RENAMED
                    | Status::WT_TYPECHANGE
                    | Status::INDEX_NEW
                    | Status::INDEX_MODIFIED
                    | Status::INDEX_RENAMED
                    | Status::INDEX_TYPECHANGE,
            ) {
                changed.to_hash.push(anchored);
            }
        }
        Ok(changed)
    }

    /// Git blob hash of a file's current contents. Works with or without a
    /// repository; the hash depends only on the bytes.
    pub fn hash_file(&self, path: &AbsPath) -> Result<String, HashError> {
        let oid = Oid::hash_file(ObjectType::Blob, path.as_std_path())?;
        Ok(oid.to_string())
    }

    pub fn root(&self) -> &AbsPath {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_repo_state_is_manual() {
        let dir = tempfile::tempdir().unwrap();
        let root = AbsPath::from_std(&dir.path().canonicalize().unwrap()).unwrap();
        let scm = Scm::discover(&root);
        assert!(!scm.is_git());
        assert_eq!(scm.state().kind, "manual");
    }

    #[test]
    fn blob_hash_matches_git() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("hello.txt");
        std::fs::write(&file, "hello\n").unwrap();
        let root = AbsPath::from_std(&dir.path().canonicalize().unwrap()).unwrap();
        let scm = Scm::discover(&root);
        let hash = scm.hash_file(&root.join("hello.txt")).unwrap();
        // `echo hello | git hash-object --stdin`
        assert_eq!(hash, "ce013625030ba8dba906f756967f9e9ca394464a");
    }
}

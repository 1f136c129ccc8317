// src/cache/fs.rs

//! Local filesystem cache backend.
//!
//! Layout under the cache directory:
//!
//! - `<hash>.tar.gz` — the artifact body
//! - `<hash>-meta.json` — `{ "hash": …, "duration": … }`
//!
//! Writes go through a temp file in the same directory followed by a rename,
//! so concurrent readers only ever observe complete artifacts. Corrupt or
//! missing metadata downgrades an entry to a miss instead of failing the
//! task.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::CacheError;
use crate::paths::{AbsPath, AnchoredPath};

use super::artifact;
use super::CacheResponse;

#[derive(Debug, Serialize, Deserialize)]
pub struct CacheMetadata {
    pub hash: String,
    pub duration: u64,
}

pub struct FsCache {
    cache_dir: AbsPath,
    repo_root: AbsPath,
}

impl FsCache {
    pub fn new(cache_dir: AbsPath, repo_root: AbsPath) -> Result<Self, CacheError> {
        std::fs::create_dir_all(cache_dir.as_std_path())?;
        Ok(Self {
            cache_dir,
            repo_root,
        })
    }

    fn body_path(&self, hash: &str) -> AbsPath {
        self.cache_dir.join(format!("{hash}.tar.gz"))
    }

    fn meta_path(&self, hash: &str) -> AbsPath {
        self.cache_dir.join(format!("{hash}-meta.json"))
    }

    fn read_metadata(&self, hash: &str) -> Option<CacheMetadata> {
        let path = self.meta_path(hash);
        let contents = std::fs::read_to_string(path.as_std_path()).ok()?;
        match serde_json::from_str::<CacheMetadata>(&contents) {
            Ok(meta) => Some(meta),
            Err(e) => {
                warn!(hash = %hash, error = %e, "corrupt cache metadata; treating as miss");
                None
            }
        }
    }

    pub fn exists(&self, hash: &str) -> Option<u64> {
        if !self.body_path(hash).exists() {
            return None;
        }
        self.read_metadata(hash).map(|meta| meta.duration)
    }

    pub fn fetch(&self, hash: &str) -> Result<Option<CacheResponse>, CacheError> {
        let body_path = self.body_path(hash);
        if !body_path.exists() {
            return Ok(None);
        }
        let Some(meta) = self.read_metadata(hash) else {
            return Ok(None);
        };

        let body = std::fs::read(body_path.as_std_path())?;
        let files = artifact::restore(&self.repo_root, &body)?;

        debug!(hash = %hash, files = files.len(), "local cache hit");
        Ok(Some(CacheResponse {
            files,
            duration_ms: meta.duration,
        }))
    }

    pub fn put(
        &self,
        hash: &str,
        duration_ms: u64,
        files: &[AnchoredPath],
    ) -> Result<(), CacheError> {
        let body = artifact::create(&self.repo_root, files)?;
        self.put_body(hash, duration_ms, &body)
    }

    /// Store a pre-built artifact body. Used both by `put` and by the remote
    /// write-through path, which already holds the downloaded bytes.
    pub fn put_body(&self, hash: &str, duration_ms: u64, body: &[u8]) -> Result<(), CacheError> {
        write_atomically(&self.body_path(hash), body)?;

        let meta = CacheMetadata {
            hash: hash.to_string(),
            duration: duration_ms,
        };
        let meta_bytes =
            serde_json::to_vec(&meta).expect("cache metadata serializes");
        write_atomically(&self.meta_path(hash), &meta_bytes)?;

        debug!(hash = %hash, bytes = body.len(), "stored artifact locally");
        Ok(())
    }

    /// Raw artifact bytes, for remote write-through.
    pub fn read_body(&self, hash: &str) -> Result<Vec<u8>, CacheError> {
        Ok(std::fs::read(self.body_path(hash).as_std_path())?)
    }
}

fn write_atomically(path: &AbsPath, contents: &[u8]) -> Result<(), CacheError> {
    let tmp = path
        .parent()
        .expect("cache paths have a parent")
        .join(format!(
            ".tmp-{}-{}",
            std::process::id(),
            path.as_path().file_name().unwrap_or("artifact")
        ));
    std::fs::write(tmp.as_std_path(), contents)?;
    std::fs::rename(tmp.as_std_path(), path.as_std_path())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn harness() -> (tempfile::TempDir, FsCache, AbsPath) {
        let dir = tempfile::tempdir().unwrap();
        let root = AbsPath::from_std(&dir.path().canonicalize().unwrap()).unwrap();
        let cache = FsCache::new(root.join(".cache"), root.clone()).unwrap();
        (dir, cache, root)
    }

    #[test]
    fn miss_on_unknown_hash() {
        let (_dir, cache, _root) = harness();
        assert!(cache.exists("deadbeef").is_none());
        assert!(cache.fetch("deadbeef").unwrap().is_none());
    }

    #[test]
    fn put_then_fetch_round_trips() {
        let (dir, cache, root) = harness();
        std::fs::create_dir_all(dir.path().join("dist")).unwrap();
        std::fs::write(dir.path().join("dist/out.js"), "out").unwrap();

        let file = AnchoredPath::new("dist/out.js").unwrap();
        cache.put("cafe01", 1234, &[file.clone()]).unwrap();

        // Remove the original so a fetch demonstrably restores it.
        std::fs::remove_file(root.resolve(&file).as_std_path()).unwrap();

        let response = cache.fetch("cafe01").unwrap().unwrap();
        assert_eq!(response.duration_ms, 1234);
        assert_eq!(response.files, vec![file.clone()]);
        assert_eq!(
            std::fs::read_to_string(root.resolve(&file).as_std_path()).unwrap(),
            "out"
        );
        assert_eq!(cache.exists("cafe01"), Some(1234));
    }

    #[test]
    fn corrupt_metadata_is_a_miss() {
        let (dir, cache, _root) = harness();
        std::fs::create_dir_all(dir.path().join("dist")).unwrap();
        std::fs::write(dir.path().join("dist/out.js"), "out").unwrap();
        cache
            .put("cafe02", 1, &[AnchoredPath::new("dist/out.js").unwrap()])
            .unwrap();

        std::fs::write(
            cache.meta_path("cafe02").as_std_path(),
            "not json at all",
        )
        .unwrap();
        assert!(cache.exists("cafe02").is_none());
        assert!(cache.fetch("cafe02").unwrap().is_none());
    }
}

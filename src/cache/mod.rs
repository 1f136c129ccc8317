// src/cache/mod.rs

//! Content-addressed artifact cache.
//!
//! Two backends compose behind one surface:
//!
//! - [`fs::FsCache`] — artifacts on the local disk;
//! - [`http::HttpCache`] — the remote artifact service.
//!
//! [`CacheMux`] layers them: reads prefer local, remote hits are written
//! through to the local cache, and writes land locally before the remote
//! copy is even queued. [`async_cache::AsyncCache`] owns that queue and is
//! what the rest of the runner talks to.

pub mod artifact;
pub mod async_cache;
pub mod fs;
pub mod http;

use serde::Serialize;
use tracing::debug;

use crate::errors::CacheError;
use crate::paths::{AbsPath, AnchoredPath};

pub use async_cache::AsyncCache;
pub use fs::FsCache;
pub use http::{HttpCache, RemoteConfig};

/// Default cache location relative to the repo root.
pub const DEFAULT_CACHE_DIR: &str = "node_modules/.cache/turbo";

/// Result of a successful fetch.
#[derive(Debug, Clone)]
pub struct CacheResponse {
    pub files: Vec<AnchoredPath>,
    pub duration_ms: u64,
}

/// Where a hit came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
    Local,
    Remote,
}

/// Existence probe result; used by dry runs without downloading anything.
#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemStatus {
    pub local: bool,
    pub remote: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_saved: Option<u64>,
}

impl ItemStatus {
    pub fn hit(&self) -> bool {
        self.local || self.remote
    }
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub dir: AbsPath,
    /// Skip the remote backend entirely.
    pub skip_remote: bool,
    /// Skip the local backend (remote-only mode).
    pub skip_filesystem: bool,
    /// Write-through worker count.
    pub workers: usize,
    pub remote: Option<RemoteConfig>,
    /// How long `shutdown` waits for pending remote writes.
    pub shutdown_deadline: std::time::Duration,
}

impl CacheConfig {
    pub fn local_only(repo_root: &AbsPath) -> Self {
        Self {
            dir: repo_root.join(DEFAULT_CACHE_DIR),
            skip_remote: true,
            skip_filesystem: false,
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            remote: None,
            shutdown_deadline: std::time::Duration::from_secs(30),
        }
    }
}

/// The layered local + remote cache.
pub struct CacheMux {
    repo_root: AbsPath,
    fs: Option<FsCache>,
    http: Option<HttpCache>,
}

impl CacheMux {
    pub fn new(config: &CacheConfig, repo_root: &AbsPath) -> Result<Self, CacheError> {
        let fs = if config.skip_filesystem {
            None
        } else {
            Some(FsCache::new(config.dir.clone(), repo_root.clone())?)
        };
        let http = match (&config.remote, config.skip_remote) {
            (Some(remote), false) => Some(HttpCache::new(remote.clone())?),
            _ => None,
        };
        Ok(Self {
            repo_root: repo_root.clone(),
            fs,
            http,
        })
    }

    pub fn has_remote(&self) -> bool {
        self.http.is_some()
    }

    /// Probe both backends without touching the working tree.
    pub fn exists(&self, hash: &str) -> ItemStatus {
        let local = self.fs.as_ref().and_then(|fs| fs.exists(hash));
        let remote = self
            .http
            .as_ref()
            .and_then(|http| http.exists(hash).ok().flatten());
        ItemStatus {
            local: local.is_some(),
            remote: remote.is_some(),
            time_saved: local.or(remote),
        }
    }

    /// Restore an artifact into the working tree. Local wins; a remote hit
    /// is stored locally on the way through so the next fetch is local.
    pub fn fetch(
        &self,
        hash: &str,
    ) -> Result<Option<(CacheSource, CacheResponse)>, CacheError> {
        if let Some(fs) = &self.fs {
            if let Some(response) = fs.fetch(hash)? {
                return Ok(Some((CacheSource::Local, response)));
            }
        }

        if let Some(http) = &self.http {
            if let Some((body, duration_ms)) = http.fetch_body(hash)? {
                let files = artifact::restore(&self.repo_root, &body)?;
                if let Some(fs) = &self.fs {
                    fs.put_body(hash, duration_ms, &body)?;
                }
                debug!(hash = %hash, "remote hit written through to local cache");
                return Ok(Some((
                    CacheSource::Remote,
                    CacheResponse { files, duration_ms },
                )));
            }
        }

        Ok(None)
    }

    /// Store locally and return the artifact body for the remote queue.
    pub(crate) fn put_local(
        &self,
        hash: &str,
        duration_ms: u64,
        files: &[AnchoredPath],
    ) -> Result<Vec<u8>, CacheError> {
        match &self.fs {
            Some(fs) => {
                fs.put(hash, duration_ms, files)?;
                fs.read_body(hash)
            }
            // Remote-only mode: build the artifact without storing it.
            None => artifact::create(&self.repo_root, files),
        }
    }

    pub(crate) fn put_remote(
        &self,
        hash: &str,
        duration_ms: u64,
        body: Vec<u8>,
    ) -> Result<(), CacheError> {
        match &self.http {
            Some(http) => http.put_body(hash, duration_ms, body),
            None => Ok(()),
        }
    }
}

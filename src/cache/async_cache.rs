// src/cache/async_cache.rs

//! Asynchronous write-through queue.
//!
//! `put` returns as soon as the artifact is in the local cache; the remote
//! copy is handed to a small pool of writer threads and is best-effort.
//! Failures are logged, never propagated into task results. `shutdown`
//! drains the queue up to a deadline so a run never blocks forever on a
//! slow upload.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::errors::CacheError;
use crate::paths::{AbsPath, AnchoredPath};

use super::{CacheConfig, CacheMux, CacheResponse, CacheSource, ItemStatus};

struct PutRequest {
    hash: String,
    duration_ms: u64,
    body: Vec<u8>,
}

/// The cache handle shared across workers.
pub struct AsyncCache {
    mux: Arc<CacheMux>,
    tx: Mutex<Option<Sender<PutRequest>>>,
    pending: Arc<AtomicUsize>,
    /// Hashes already stored this process; a given artifact is put once.
    stored: Mutex<HashSet<String>>,
    shutdown_deadline: Duration,
}

impl AsyncCache {
    pub fn new(config: &CacheConfig, repo_root: &AbsPath) -> Result<Self, CacheError> {
        let mux = Arc::new(CacheMux::new(config, repo_root)?);
        let pending = Arc::new(AtomicUsize::new(0));

        let tx = if mux.has_remote() {
            let (tx, rx) = channel::<PutRequest>();
            let rx = Arc::new(Mutex::new(rx));
            for _ in 0..config.workers.max(1) {
                spawn_writer(Arc::clone(&mux), Arc::clone(&rx), Arc::clone(&pending));
            }
            Some(tx)
        } else {
            None
        };

        Ok(Self {
            mux,
            tx: Mutex::new(tx),
            pending,
            stored: Mutex::new(HashSet::new()),
            shutdown_deadline: config.shutdown_deadline,
        })
    }

    pub fn exists(&self, hash: &str) -> ItemStatus {
        self.mux.exists(hash)
    }

    pub fn fetch(
        &self,
        hash: &str,
    ) -> Result<Option<(CacheSource, CacheResponse)>, CacheError> {
        self.mux.fetch(hash)
    }

    /// Store an artifact. Local availability is synchronous with return;
    /// the remote write is queued.
    pub fn put(
        &self,
        hash: &str,
        duration_ms: u64,
        files: &[AnchoredPath],
    ) -> Result<(), CacheError> {
        {
            let mut stored = self.stored.lock().unwrap();
            if !stored.insert(hash.to_string()) {
                debug!(hash = %hash, "artifact already stored this run; skipping put");
                return Ok(());
            }
        }

        let result = self.mux.put_local(hash, duration_ms, files);
        let body = match result {
            Ok(body) => body,
            Err(e) => {
                // Failed puts may be retried by a later task with the same
                // hash.
                self.stored.lock().unwrap().remove(hash);
                return Err(e);
            }
        };

        if let Some(tx) = self.tx.lock().unwrap().as_ref() {
            self.pending.fetch_add(1, Ordering::SeqCst);
            if tx
                .send(PutRequest {
                    hash: hash.to_string(),
                    duration_ms,
                    body,
                })
                .is_err()
            {
                self.pending.fetch_sub(1, Ordering::SeqCst);
            }
        }

        Ok(())
    }

    /// Wait for pending remote writes, up to the configured deadline.
    pub fn shutdown(&self) -> Result<(), CacheError> {
        // Closing the channel lets idle writers exit.
        *self.tx.lock().unwrap() = None;

        let deadline = Instant::now() + self.shutdown_deadline;
        while self.pending.load(Ordering::SeqCst) > 0 {
            if Instant::now() >= deadline {
                let left = self.pending.load(Ordering::SeqCst);
                warn!(pending = left, "cache shutdown deadline reached; abandoning pending writes");
                return Err(CacheError::ShutdownTimeout(left));
            }
            std::thread::sleep(Duration::from_millis(25));
        }
        Ok(())
    }
}

fn spawn_writer(
    mux: Arc<CacheMux>,
    rx: Arc<Mutex<Receiver<PutRequest>>>,
    pending: Arc<AtomicUsize>,
) {
    std::thread::spawn(move || loop {
        let request = {
            let rx = rx.lock().unwrap();
            rx.recv()
        };
        let Ok(request) = request else {
            break;
        };
        if let Err(e) = mux.put_remote(&request.hash, request.duration_ms, request.body) {
            warn!(hash = %request.hash, error = %e, "remote cache write failed");
        }
        pending.fetch_sub(1, Ordering::SeqCst);
    });
}

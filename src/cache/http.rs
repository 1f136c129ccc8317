// src/cache/http.rs

//! Remote HTTP cache backend.
//!
//! Speaks the artifact API: `PUT`/`GET`/`HEAD /v8/artifacts/<hash>?slug=…`
//! with a bearer token. When the server demands artifact signatures, request
//! bodies carry an `x-artifact-tag` HMAC-SHA256 computed over the body with
//! the team secret, and downloaded bodies are verified against the tag
//! before anything touches disk.
//!
//! A 403 with code `remote_caching_disabled` flips the client into a
//! disabled state for the remainder of the run: every later call becomes a
//! no-op and the downgrade is surfaced as a warning exactly once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use hmac::{Hmac, Mac};
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::Deserialize;
use sha2::Sha256;
use tracing::{debug, warn};

use crate::errors::CacheError;

type HmacSha256 = Hmac<Sha256>;

const ARTIFACT_TAG_HEADER: &str = "x-artifact-tag";
const ARTIFACT_DURATION_HEADER: &str = "x-artifact-duration";
const CLIENT_CI_HEADER: &str = "x-artifact-client-ci";

#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// Base endpoint, e.g. `https://vercel.com/api`.
    pub endpoint: String,
    pub token: String,
    /// Team slug appended as `?slug=`.
    pub team: Option<String>,
    /// HMAC secret; `Some` turns on artifact signing.
    pub signature_key: Option<Vec<u8>>,
    /// CI system name forwarded to the server, if running in CI.
    pub ci_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: Option<String>,
}

pub struct HttpCache {
    client: Client,
    config: RemoteConfig,
    disabled: AtomicBool,
}

/// Run a blocking HTTP call on its own scoped thread. The blocking client
/// refuses to run on an async runtime thread, and cache callers may be on
/// one; a throwaway thread per call keeps the cache API synchronous without
/// tripping that guard.
fn off_runtime<T: Send>(f: impl FnOnce() -> T + Send) -> T {
    std::thread::scope(|scope| {
        scope
            .spawn(f)
            .join()
            .expect("cache http thread panicked")
    })
}

impl HttpCache {
    pub fn new(config: RemoteConfig) -> Result<Self, CacheError> {
        let client = off_runtime(|| {
            Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
        })?;
        Ok(Self {
            client,
            config,
            disabled: AtomicBool::new(false),
        })
    }

    fn artifact_url(&self, hash: &str) -> String {
        let base = format!("{}/v8/artifacts/{hash}", self.config.endpoint);
        match &self.config.team {
            Some(team) => format!("{base}?slug={team}"),
            None => base,
        }
    }

    fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::Relaxed)
    }

    /// Inspect a 403 for the caching-disabled code; disable ourselves if it
    /// matches.
    fn check_disabled(&self, status: StatusCode, body: &[u8]) -> Result<(), CacheError> {
        if status != StatusCode::FORBIDDEN {
            return Ok(());
        }
        let code = serde_json::from_slice::<ApiError>(body)
            .ok()
            .and_then(|e| e.code);
        if code.as_deref() == Some("remote_caching_disabled") {
            if !self.disabled.swap(true, Ordering::Relaxed) {
                warn!("remote caching is disabled for this team; continuing with the local cache only");
            }
            return Err(CacheError::RemoteDisabled);
        }
        Err(CacheError::Unauthorized(status.as_u16()))
    }

    fn sign(&self, hash: &str, body: &[u8]) -> Option<String> {
        let key = self.config.signature_key.as_ref()?;
        let mut mac =
            HmacSha256::new_from_slice(key).expect("hmac accepts any key length");
        mac.update(hash.as_bytes());
        mac.update(body);
        Some(hex::encode(mac.finalize().into_bytes()))
    }

    fn verify(&self, hash: &str, body: &[u8], tag: Option<&str>) -> Result<(), CacheError> {
        let Some(expected) = self.sign(hash, body) else {
            return Ok(());
        };
        match tag {
            Some(tag) if tag == expected => Ok(()),
            _ => Err(CacheError::Integrity {
                hash: hash.to_string(),
                detail: "artifact signature mismatch".to_string(),
            }),
        }
    }

    pub fn exists(&self, hash: &str) -> Result<Option<u64>, CacheError> {
        if self.is_disabled() {
            return Ok(None);
        }
        let response = off_runtime(|| {
            self.client
                .head(self.artifact_url(hash))
                .bearer_auth(&self.config.token)
                .send()
        })?;

        match response.status() {
            StatusCode::OK => {
                let duration = response
                    .headers()
                    .get(ARTIFACT_DURATION_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0);
                Ok(Some(duration))
            }
            StatusCode::NOT_FOUND => Ok(None),
            status => {
                match self.check_disabled(status, &[]) {
                    Err(CacheError::RemoteDisabled) => Ok(None),
                    Err(e) => Err(e),
                    Ok(()) => Ok(None),
                }
            }
        }
    }

    /// Download an artifact body. The caller restores it and writes it
    /// through to the local cache.
    pub fn fetch_body(&self, hash: &str) -> Result<Option<(Vec<u8>, u64)>, CacheError> {
        if self.is_disabled() {
            return Ok(None);
        }

        enum Fetched {
            Hit {
                body: Vec<u8>,
                duration: u64,
                tag: Option<String>,
            },
            Miss,
            Rejected { status: StatusCode, body: Vec<u8> },
        }

        let fetched = off_runtime(|| -> Result<Fetched, reqwest::Error> {
            let response = self
                .client
                .get(self.artifact_url(hash))
                .bearer_auth(&self.config.token)
                .send()?;
            let status = response.status();
            match status {
                StatusCode::OK => {
                    let duration = response
                        .headers()
                        .get(ARTIFACT_DURATION_HEADER)
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.parse().ok())
                        .unwrap_or(0);
                    let tag = response
                        .headers()
                        .get(ARTIFACT_TAG_HEADER)
                        .and_then(|v| v.to_str().ok())
                        .map(|s| s.to_string());
                    let body = response.bytes()?.to_vec();
                    Ok(Fetched::Hit {
                        body,
                        duration,
                        tag,
                    })
                }
                StatusCode::NOT_FOUND => Ok(Fetched::Miss),
                status => Ok(Fetched::Rejected {
                    status,
                    body: response.bytes().unwrap_or_default().to_vec(),
                }),
            }
        })?;

        match fetched {
            Fetched::Hit {
                body,
                duration,
                tag,
            } => {
                self.verify(hash, &body, tag.as_deref())?;
                debug!(hash = %hash, bytes = body.len(), "remote cache hit");
                Ok(Some((body, duration)))
            }
            Fetched::Miss => Ok(None),
            Fetched::Rejected { status, body } => match self.check_disabled(status, &body) {
                Err(CacheError::RemoteDisabled) => Ok(None),
                Err(e) => Err(e),
                Ok(()) => Ok(None),
            },
        }
    }

    pub fn put_body(&self, hash: &str, duration_ms: u64, body: Vec<u8>) -> Result<(), CacheError> {
        if self.is_disabled() {
            return Ok(());
        }
        let tag = self.sign(hash, &body);
        let (status, response_body) =
            off_runtime(|| -> Result<(StatusCode, Vec<u8>), reqwest::Error> {
                let mut request = self
                    .client
                    .put(self.artifact_url(hash))
                    .bearer_auth(&self.config.token)
                    .header("Content-Type", "application/octet-stream")
                    .header(ARTIFACT_DURATION_HEADER, duration_ms.to_string());
                if let Some(tag) = &tag {
                    request = request.header(ARTIFACT_TAG_HEADER, tag.clone());
                }
                if let Some(ci) = &self.config.ci_name {
                    request = request.header(CLIENT_CI_HEADER, ci.clone());
                }
                let response = request.body(body).send()?;
                let status = response.status();
                let response_body = response.bytes().unwrap_or_default().to_vec();
                Ok((status, response_body))
            })?;

        if status.is_success() {
            debug!(hash = %hash, "stored artifact remotely");
            return Ok(());
        }
        match self.check_disabled(status, &response_body) {
            Err(CacheError::RemoteDisabled) => Ok(()),
            Err(e) => Err(e),
            Ok(()) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(signature_key: Option<&[u8]>) -> HttpCache {
        HttpCache::new(RemoteConfig {
            endpoint: "https://cache.example.com".to_string(),
            token: "token".to_string(),
            team: Some("team_abc".to_string()),
            signature_key: signature_key.map(|k| k.to_vec()),
            ci_name: None,
        })
        .unwrap()
    }

    #[test]
    fn artifact_url_includes_team_slug() {
        let cache = client(None);
        assert_eq!(
            cache.artifact_url("beef"),
            "https://cache.example.com/v8/artifacts/beef?slug=team_abc"
        );
    }

    #[test]
    fn signature_is_stable_and_keyed() {
        let cache = client(Some(b"secret"));
        let a = cache.sign("beef", b"body").unwrap();
        let b = cache.sign("beef", b"body").unwrap();
        assert_eq!(a, b);

        let other_key = client(Some(b"other"));
        assert_ne!(a, other_key.sign("beef", b"body").unwrap());
    }

    #[test]
    fn verify_rejects_bad_tags() {
        let cache = client(Some(b"secret"));
        let good = cache.sign("beef", b"body").unwrap();
        assert!(cache.verify("beef", b"body", Some(&good)).is_ok());
        assert!(cache.verify("beef", b"body", Some("bogus")).is_err());
        assert!(cache.verify("beef", b"body", None).is_err());
    }

    #[test]
    fn unsigned_client_skips_verification() {
        let cache = client(None);
        assert!(cache.verify("beef", b"body", None).is_ok());
    }

    #[test]
    fn disabled_code_flips_the_switch_once() {
        let cache = client(None);
        let body = br#"{"code": "remote_caching_disabled"}"#;
        let err = cache
            .check_disabled(StatusCode::FORBIDDEN, body)
            .unwrap_err();
        assert!(matches!(err, CacheError::RemoteDisabled));
        assert!(cache.is_disabled());
    }
}

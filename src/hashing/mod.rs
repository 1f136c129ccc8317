// src/hashing/mod.rs

//! Fingerprinting primitives.
//!
//! Every fingerprint in the runner — the global hash, per-package file
//! hashes, task hashes — is SHA-256 over a canonical byte encoding produced
//! by [`CanonicalHasher`]. The encoding is deliberately tiny and stable:
//!
//! - strings are length-prefixed (u64 little-endian) then raw bytes;
//! - lists are length-prefixed, then each element;
//! - maps are encoded as sorted `(key, value)` lists;
//! - enums contribute a short ASCII tag;
//! - booleans and integers have fixed-width encodings.
//!
//! The encoding is part of the cache contract: changing it silently would
//! make every stored artifact unreachable-yet-present. Any change must bump
//! [`GLOBAL_CACHE_KEY`], which is hashed into every fingerprint and thereby
//! invalidates the whole corpus at once.

pub mod file_hasher;

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

/// Version anchor for the canonical encoding. Bump on any encoding change.
pub const GLOBAL_CACHE_KEY: &str = "I cannot fix on the hour, or the spot, or the look or the words, which laid the foundation. It is too long ago. I was in the middle before I knew that I had begun.";

/// Number of hex characters exposed for run fingerprints.
const FINGERPRINT_LEN: usize = 16;

/// Incremental canonical encoder feeding SHA-256.
pub struct CanonicalHasher {
    hasher: Sha256,
}

impl CanonicalHasher {
    pub fn new() -> Self {
        Self {
            hasher: Sha256::new(),
        }
    }

    fn raw(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    pub fn uint(&mut self, value: u64) {
        self.raw(&value.to_le_bytes());
    }

    pub fn flag(&mut self, value: bool) {
        self.raw(&[u8::from(value)]);
    }

    pub fn text(&mut self, value: &str) {
        self.uint(value.len() as u64);
        self.raw(value.as_bytes());
    }

    /// Enum discriminants. Tags share the string encoding so that a tag can
    /// never collide with adjacent text fields.
    pub fn tag(&mut self, tag: &str) {
        self.text(tag);
    }

    pub fn text_list<I, S>(&mut self, values: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let values: Vec<S> = values.into_iter().collect();
        self.uint(values.len() as u64);
        for value in values {
            self.text(value.as_ref());
        }
    }

    /// Encode a string map as a sorted pair list.
    pub fn text_map(&mut self, map: &BTreeMap<String, String>) {
        self.uint(map.len() as u64);
        for (key, value) in map {
            self.text(key);
            self.text(value);
        }
    }

    /// Full 64-character hex digest.
    pub fn finish_hex(self) -> String {
        hex::encode(self.hasher.finalize())
    }

    /// The truncated digest used for user-visible fingerprints and cache
    /// keys.
    pub fn finish(self) -> String {
        let mut full = self.finish_hex();
        full.truncate(FINGERPRINT_LEN);
        full
    }
}

impl Default for CanonicalHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Hash a single string value. Used for env var values, which participate in
/// fingerprints only by digest so that secrets never end up in summaries.
pub fn hash_value(value: &str) -> String {
    hex::encode(Sha256::digest(value.as_bytes()))
}

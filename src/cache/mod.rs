// SPDX-License-Identifier: Apache-2.0/MIT
//! The shared cache contract: an abstract `CacheKey -> Artifact` map, with
//! an in-memory LRU tier ([`memory`]) and a persistent, compressed,
//! integrity-checked filesystem tier ([`fs`]) behind it.
//!
//! Modeled on the object-safe, synchronous `BlobStore` trait shape used
//! elsewhere in this codebase's lineage for content-addressed storage:
//! absence is never an error (`get` on a missing key just returns `None`),
//! only integrity violations are.

pub mod fs;
pub mod memory;

use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// Opaque, non-empty, path-safe cache key.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Build a key, rejecting empty strings and anything that would let a
    /// filesystem cache escape its root directory.
    pub fn new(key: impl Into<String>) -> Result<Self> {
        let key = key.into();
        if key.is_empty() {
            return Err(Error::InvalidArgument("cache key must not be empty".into()));
        }
        if key.contains('/') || key.contains('\\') || key.split('/').any(|seg| seg == "..") {
            return Err(Error::InvalidArgument(format!(
                "cache key {key:?} is not path-safe"
            )));
        }
        Ok(CacheKey(key))
    }

    /// Borrow the key as a plain string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The named-byte-stream output of a build action, plus optional string
/// metadata. Logical names are producer-chosen labels, not filesystem
/// paths.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Artifact {
    /// Logical name -> raw bytes.
    pub files: BTreeMap<String, Vec<u8>>,
    /// Free-form string metadata.
    pub metadata: BTreeMap<String, String>,
}

impl Artifact {
    /// An artifact with no files and no metadata.
    pub fn new() -> Self {
        Artifact::default()
    }

    /// Total size in bytes of all files (metadata is not counted).
    pub fn size(&self) -> u64 {
        self.files.values().map(|bytes| bytes.len() as u64).sum()
    }
}

/// A point-in-time snapshot of a cache's counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Successful `get` lookups.
    pub hits: u64,
    /// Unsuccessful `get` lookups.
    pub misses: u64,
    /// Live entry count.
    pub entries: u64,
    /// Live byte count (sum of stored artifact sizes).
    pub bytes: u64,
    /// Total evictions performed so far.
    pub evictions: u64,
}

/// A `CacheKey -> Artifact` map, safe to call concurrently from multiple
/// threads.
pub trait Cache: Send + Sync {
    /// Look up `key`. Increments `hits` or `misses` accordingly. Absence is
    /// not an error.
    fn get(&self, key: &CacheKey) -> Result<Option<Artifact>>;

    /// Insert or overwrite `key`. After this call, `exists(key)` is `true`
    /// and a subsequent `get(key)` returns an artifact whose `files` are
    /// byte-for-byte equal to the one inserted.
    fn put(&self, key: &CacheKey, artifact: Artifact) -> Result<()>;

    /// Fast membership test; does not affect hit/miss counters.
    fn exists(&self, key: &CacheKey) -> Result<bool>;

    /// Remove `key` if present. Idempotent — invalidating an absent key is
    /// not an error.
    fn invalidate(&self, key: &CacheKey) -> Result<()>;

    /// A snapshot of this cache's counters.
    fn stats(&self) -> CacheStats;
}

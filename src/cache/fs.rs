// SPDX-License-Identifier: Apache-2.0/MIT
//! Durable, content-verified artifact store.
//!
//! Layout per key `K`:
//!
//! ```text
//! <root>/<K>/manifest.json
//! <root>/<K>/blobs/<logical-name>.gz
//! ```
//!
//! `Put` publishes every blob (gzip-compressed, written to a `.tmp` file and
//! atomically renamed) before atomically renaming the manifest into place —
//! the manifest rename is the linearization point for the key. A reader
//! that observes `manifest.json` is guaranteed to see every blob it
//! references.

use std::collections::BTreeMap;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::{trace, warn};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;

use crate::cache::{Artifact, Cache, CacheKey, CacheStats};
use crate::error::{Error, Result};

#[derive(Serialize, Deserialize)]
struct Manifest {
    key: String,
    #[serde(with = "time::serde::rfc3339")]
    created_at: OffsetDateTime,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    metadata: BTreeMap<String, String>,
    files: Vec<ManifestFile>,
}

#[derive(Serialize, Deserialize)]
struct ManifestFile {
    name: String,
    blob: String,
    size: u64,
    compressed: bool,
    sha256: String,
}

/// Persistent, gzip-compressed, integrity-checked filesystem cache tier.
pub struct FsCache {
    root: PathBuf,
    stats: Mutex<CacheStats>,
}

impl FsCache {
    /// Use `root` as the cache directory. Not created until the first
    /// `put`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FsCache { root: root.into(), stats: Mutex::new(CacheStats::default()) }
    }

    fn key_dir(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.as_str())
    }

    fn manifest_path(key_dir: &Path) -> PathBuf {
        key_dir.join("manifest.json")
    }

    fn blobs_dir(key_dir: &Path) -> PathBuf {
        key_dir.join("blobs")
    }

    fn read_manifest(key_dir: &Path) -> Result<Option<Manifest>> {
        let path = Self::manifest_path(key_dir);
        if !path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&path)?;
        let manifest: Manifest = serde_json::from_str(&contents)
            .map_err(|e| Error::Integrity { key: path.display().to_string(), reason: e.to_string() })?;
        Ok(Some(manifest))
    }

    fn existing_size(key_dir: &Path) -> Result<u64> {
        Ok(Self::read_manifest(key_dir)?
            .map(|m| m.files.iter().map(|f| f.size).sum())
            .unwrap_or(0))
    }
}

impl Cache for FsCache {
    fn get(&self, key: &CacheKey) -> Result<Option<Artifact>> {
        let key_dir = self.key_dir(key);
        let mut stats = self.stats.lock().unwrap();

        let manifest = match Self::read_manifest(&key_dir)? {
            Some(m) => m,
            None => {
                stats.misses += 1;
                return Ok(None);
            }
        };

        let blobs_dir = Self::blobs_dir(&key_dir);
        let mut files = BTreeMap::new();
        for entry in &manifest.files {
            let blob_path = blobs_dir.join(&entry.blob);
            let blob_file = fs::File::open(&blob_path)?;
            let mut decoder = GzDecoder::new(blob_file);
            let mut contents = Vec::new();
            decoder.read_to_end(&mut contents)?;

            if contents.len() as u64 != entry.size {
                warn!("cache key {key}: size mismatch for file {:?}", entry.name);
                return Err(Error::Integrity {
                    key: key.to_string(),
                    reason: format!(
                        "file {:?}: declared size {} but decompressed to {} bytes",
                        entry.name,
                        entry.size,
                        contents.len()
                    ),
                });
            }

            let mut hasher = Sha256::new();
            hasher.update(&contents);
            let computed = hex_encode(&hasher.finalize());
            if computed != entry.sha256 {
                warn!("cache key {key}: sha256 mismatch for file {:?}", entry.name);
                return Err(Error::Integrity {
                    key: key.to_string(),
                    reason: format!(
                        "file {:?}: sha256 mismatch (manifest {}, computed {})",
                        entry.name, entry.sha256, computed
                    ),
                });
            }

            files.insert(entry.name.clone(), contents);
        }

        stats.hits += 1;
        Ok(Some(Artifact { files, metadata: manifest.metadata }))
    }

    fn put(&self, key: &CacheKey, artifact: Artifact) -> Result<()> {
        let key_dir = self.key_dir(key);
        let blobs_dir = Self::blobs_dir(&key_dir);
        let mut stats = self.stats.lock().unwrap();

        let previously_existed = Self::manifest_path(&key_dir).exists();
        let previous_size = Self::existing_size(&key_dir)?;

        trace!("writing cache entry {key}");
        fs::create_dir_all(&blobs_dir)?;

        let new_size = artifact.size();

        let mut manifest_files = Vec::with_capacity(artifact.files.len());
        for (name, contents) in &artifact.files {
            let mut hasher = Sha256::new();
            hasher.update(contents);
            let sha256 = hex_encode(&hasher.finalize());

            let blob_name = format!("{name}.gz");
            let tmp_path = blobs_dir.join(format!("{blob_name}.tmp"));
            {
                let tmp_file = fs::File::create(&tmp_path)?;
                let mut encoder = GzEncoder::new(tmp_file, Compression::default());
                encoder.write_all(contents)?;
                encoder.finish()?.flush()?;
            }
            fs::rename(&tmp_path, blobs_dir.join(&blob_name))?;

            manifest_files.push(ManifestFile {
                name: name.clone(),
                blob: blob_name,
                size: contents.len() as u64,
                compressed: true,
                sha256,
            });
        }

        let manifest = Manifest {
            key: key.to_string(),
            created_at: OffsetDateTime::now_utc(),
            metadata: artifact.metadata,
            files: manifest_files,
        };
        let manifest_json = serde_json::to_string_pretty(&manifest)
            .expect("Manifest serialization is infallible");
        let manifest_tmp = key_dir.join("manifest.json.tmp");
        fs::write(&manifest_tmp, manifest_json)?;
        fs::rename(&manifest_tmp, Self::manifest_path(&key_dir))?;

        if !previously_existed {
            stats.entries += 1;
        }
        if new_size >= previous_size {
            stats.bytes += new_size - previous_size;
        } else {
            stats.bytes -= previous_size - new_size;
        }

        Ok(())
    }

    fn exists(&self, key: &CacheKey) -> Result<bool> {
        Ok(Self::manifest_path(&self.key_dir(key)).exists())
    }

    fn invalidate(&self, key: &CacheKey) -> Result<()> {
        let key_dir = self.key_dir(key);
        let mut stats = self.stats.lock().unwrap();

        if !key_dir.exists() {
            return Ok(());
        }

        let removed_size = Self::existing_size(&key_dir).unwrap_or(0);

        let alias = key_dir.with_file_name(format!("{}.invalidated", key.as_str()));
        match fs::rename(&key_dir, &alias) {
            Ok(()) => fs::remove_dir_all(&alias)?,
            Err(_) => fs::remove_dir_all(&key_dir)?,
        }

        stats.entries = stats.entries.saturating_sub(1);
        stats.bytes = stats.bytes.saturating_sub(removed_size);
        Ok(())
    }

    fn stats(&self) -> CacheStats {
        *self.stats.lock().unwrap()
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        write!(s, "{:02x}", b).expect("writing to a String never fails");
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn artifact() -> Artifact {
        let mut a = Artifact::new();
        a.files.insert("bin".into(), b"binary data".to_vec());
        a.files.insert("log".into(), b"hello".to_vec());
        a.metadata.insert("k".into(), "v".into());
        a
    }

    // ── 1. round trip from spec §8.5 ────────────────────────────────

    #[test]
    fn put_get_invalidate_round_trip() {
        let dir = tempdir().unwrap();
        let cache = FsCache::new(dir.path());
        let key = CacheKey::new("mod@v1").unwrap();

        cache.put(&key, artifact()).unwrap();
        assert!(cache.exists(&key).unwrap());

        let got = cache.get(&key).unwrap().unwrap();
        assert_eq!(got.files, artifact().files);
        assert_eq!(got.metadata, artifact().metadata);

        cache.invalidate(&key).unwrap();
        assert!(!cache.exists(&key).unwrap());
    }

    // ── 2. invalidate is idempotent ──────────────────────────────────

    #[test]
    fn invalidate_missing_key_is_not_an_error() {
        let dir = tempdir().unwrap();
        let cache = FsCache::new(dir.path());
        let key = CacheKey::new("absent").unwrap();
        cache.invalidate(&key).unwrap();
        cache.invalidate(&key).unwrap();
    }

    // ── 3. get on a never-written key is a miss, not an error ───────

    #[test]
    fn get_missing_key_is_miss() {
        let dir = tempdir().unwrap();
        let cache = FsCache::new(dir.path());
        let key = CacheKey::new("absent").unwrap();
        assert!(cache.get(&key).unwrap().is_none());
        assert_eq!(cache.stats().misses, 1);
    }

    // ── 4. corrupted blob is reported as an integrity error ──────────

    #[test]
    fn corrupted_blob_is_integrity_error() {
        let dir = tempdir().unwrap();
        let cache = FsCache::new(dir.path());
        let key = CacheKey::new("corrupt").unwrap();
        cache.put(&key, artifact()).unwrap();

        let blob_path = dir.path().join("corrupt").join("blobs").join("bin.gz");
        // Overwrite with a validly-gzipped but different payload so the
        // decompressed length/hash no longer match the manifest.
        let tmp = dir.path().join("corrupt").join("blobs").join("bin.gz.tmp2");
        {
            let f = fs::File::create(&tmp).unwrap();
            let mut enc = GzEncoder::new(f, Compression::default());
            enc.write_all(b"tampered").unwrap();
        }
        fs::rename(&tmp, &blob_path).unwrap();

        let err = cache.get(&key).unwrap_err();
        assert!(matches!(err, Error::Integrity { .. }));
    }

    // ── 5. put overwrite updates byte accounting without double counting ─

    #[test]
    fn put_overwrite_updates_entries_once() {
        let dir = tempdir().unwrap();
        let cache = FsCache::new(dir.path());
        let key = CacheKey::new("k").unwrap();
        cache.put(&key, artifact()).unwrap();
        cache.put(&key, artifact()).unwrap();
        assert_eq!(cache.stats().entries, 1);
    }
}

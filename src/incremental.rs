// SPDX-License-Identifier: Apache-2.0/MIT
//! Deterministic input snapshots and snapshot diffs that drive dirty-target
//! selection.
//!
//! [`snapshot_inputs`] walks a target's globs, fingerprints every matching
//! file and returns a [`Snapshot`]; [`diff`] compares two snapshots and
//! reports which targets changed.

use std::collections::BTreeMap;
use std::io::Read;

use log::debug;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;

use crate::error::{Error, Result};
use crate::id::TargetId;

/// The canonical fingerprint of one input file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileState {
    /// The file's path, as matched by the glob.
    pub path: std::path::PathBuf,
    /// File size in bytes.
    pub size: u64,
    /// Modification time, UTC, truncated to whole seconds (filesystems
    /// disagree on sub-second precision; seconds are what every supported
    /// platform can report consistently).
    #[serde(with = "time::serde::rfc3339")]
    pub mod_time_utc: OffsetDateTime,
    /// Lowercase hex-encoded SHA-256 of the file's contents.
    pub sha256_hex: String,
}

/// A mapping from target to its ordered, deterministic input fingerprints.
///
/// Entries are stored sorted ascending by [`TargetId`]; each target's file
/// list is sorted ascending by path. Two snapshots taken over the same
/// globs against an unchanged filesystem compare equal under `==` and
/// serialize to identical bytes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    targets: BTreeMap<TargetId, Vec<FileState>>,
}

impl Snapshot {
    /// The file states recorded for a target, if any were snapshotted.
    pub fn files(&self, target: &TargetId) -> Option<&[FileState]> {
        self.targets.get(target).map(Vec::as_slice)
    }

    /// All target ids present in this snapshot, ascending.
    pub fn target_ids(&self) -> Vec<TargetId> {
        self.targets.keys().cloned().collect()
    }
}

const CHUNK_SIZE: usize = 64 * 1024;

fn hash_file(path: &std::path::Path) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex_encode(&hasher.finalize()))
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        write!(s, "{:02x}", b).expect("writing to a String never fails");
    }
    s
}

/// Path-list separators we split a single glob string on, matching the
/// platform's `PATH`-style separator (`:` on Unix, `;` on Windows).
#[cfg(unix)]
const GLOB_LIST_SEPARATOR: char = ':';
#[cfg(windows)]
const GLOB_LIST_SEPARATOR: char = ';';

fn split_globs(pattern: &str) -> Vec<&str> {
    pattern.split(GLOB_LIST_SEPARATOR).filter(|s| !s.is_empty()).collect()
}

fn file_state(path: std::path::PathBuf) -> Result<FileState> {
    let metadata = std::fs::metadata(&path)?;
    let modified = metadata.modified()?;
    let mod_time_utc = OffsetDateTime::from(modified).to_offset(time::UtcOffset::UTC);
    let sha256_hex = hash_file(&path)?;
    Ok(FileState { path, size: metadata.len(), mod_time_utc, sha256_hex })
}

/// Expand every glob bound to every target, fingerprint the matches and
/// return a deterministic [`Snapshot`].
///
/// A single glob string containing the platform's path-list separator is
/// treated as multiple glob patterns, per the incremental engine's
/// contract.
///
/// # Errors
///
/// [`Error::InvalidGlob`] if a pattern fails to parse; [`Error::Io`] on any
/// filesystem error encountered while matching or fingerprinting.
pub fn snapshot_inputs<I, S>(inputs: I) -> Result<Snapshot>
where
    I: IntoIterator<Item = (TargetId, Vec<S>)>,
    S: AsRef<str>,
{
    let mut targets = BTreeMap::new();

    for (target, globs) in inputs {
        let mut matches: Vec<std::path::PathBuf> = Vec::new();
        for glob_str in &globs {
            for pattern in split_globs(glob_str.as_ref()) {
                for entry in glob::glob(pattern)? {
                    matches.push(entry.map_err(|e| Error::Io(e.into_error()))?);
                }
            }
        }
        matches.sort();
        matches.dedup();

        let mut files = Vec::with_capacity(matches.len());
        for path in matches {
            files.push(file_state(path)?);
        }

        targets.insert(target, files);
    }

    Ok(Snapshot { targets })
}

/// Returns the sorted, ascending list of target ids that changed between
/// `prev` and `curr`.
///
/// A target is considered changed if its file list's length differs, or if
/// any entry at the same index differs in path, size, modification time or
/// hash. A target present in only one of the two snapshots is reported as
/// changed.
pub fn diff(prev: &Snapshot, curr: &Snapshot) -> Vec<TargetId> {
    let mut ids: std::collections::BTreeSet<&TargetId> =
        prev.targets.keys().chain(curr.targets.keys()).collect();
    let mut changed = Vec::new();

    for id in ids.drain() {
        let before = prev.targets.get(id);
        let after = curr.targets.get(id);
        if before != after {
            changed.push(id.clone());
        }
    }

    changed.sort();
    debug!("diff found {} changed target(s)", changed.len());
    changed
}

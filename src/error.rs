// SPDX-License-Identifier: Apache-2.0/MIT
//! Crate-wide error types.
//!
//! One enum covers every public error surface: plan construction/validation,
//! execution, the incremental engine and the two cache tiers all report
//! through [`Error`].

use crate::id::TargetId;
use thiserror::Error;

/// Errors surfaced by the core (Plan, Executor, Incremental engine, Cache).
#[derive(Debug, Error)]
pub enum Error {
    /// A `null`/invalid argument was passed to an entrypoint (empty target
    /// id, missing action, non-positive capacity where one is required to be
    /// explicit, etc).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// `Plan::add` was called with an id already present in the plan.
    #[error("duplicate target: {0}")]
    DuplicateTarget(TargetId),

    /// A root or a selected id is not present in the plan.
    #[error("unknown target: {0}")]
    UnknownTarget(TargetId),

    /// A target lists a dependency that is not registered in the plan.
    #[error("target {target} depends on unregistered target {dependency}")]
    MissingDependency {
        /// The target whose dependency list is broken.
        target: TargetId,
        /// The missing dependency.
        dependency: TargetId,
    },

    /// `Plan::validate` found a cycle. `path` carries the gray-node path up
    /// to (and including) the revisited node.
    #[error("cycle detected: {}", render_cycle(.path))]
    CycleDetected {
        /// The offending path, in discovery order, ending with the node that
        /// closes the cycle.
        path: Vec<TargetId>,
    },

    /// An action returned an error; carried alongside its `Result`.
    #[error("action for target {target} failed: {source}")]
    ActionFailed {
        /// The target whose action failed.
        target: TargetId,
        /// The underlying error returned by the action.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A filesystem or glob-expansion failure in the snapshot or cache
    /// layers.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A glob pattern failed to parse.
    #[error("invalid glob pattern: {0}")]
    InvalidGlob(#[from] glob::PatternError),

    /// A cache `Get` detected a size or hash mismatch between the manifest
    /// and the decompressed blob contents.
    #[error("integrity error for key {key}: {reason}")]
    Integrity {
        /// The cache key whose artifact failed verification.
        key: String,
        /// Human-readable description of the mismatch.
        reason: String,
    },

    /// `Diff` received a malformed snapshot operand (reserved for future
    /// structural validation; snapshots are always well-formed value types
    /// today, so this variant is currently only reachable via
    /// `Snapshot::from_serialized` style entry points a caller might add).
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),
}

fn render_cycle(path: &[TargetId]) -> String {
    path.iter()
        .map(TargetId::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

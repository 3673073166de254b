// SPDX-License-Identifier: Apache-2.0/MIT
//! kiln: a reproducible, parallel build orchestration engine.
//!
//! Four pieces compose into one engine:
//!
//! - [`plan`] — the dependency graph of targets (`Plan`, `Target`,
//!   `TargetSpec`) plus cycle detection.
//! - [`executor`] — a fixed-width worker pool that runs a validated `Plan`
//!   in dependency order ([`executor::Executor`]).
//! - [`incremental`] — deterministic input snapshots and snapshot diffs
//!   that drive dirty-target selection.
//! - [`cache`] — a two-tier artifact cache behind one [`cache::Cache`]
//!   trait: an in-memory LRU ([`cache::memory::LruCache`]) and a
//!   persistent, compressed filesystem store ([`cache::fs::FsCache`]).
//!
//! Logging goes through the standard [`log`] facade; callers wire up
//! [`env_logger`] (or any other subscriber) themselves — this crate never
//! initializes one on its own.

pub mod cache;
pub mod context;
pub mod error;
pub mod executor;
pub mod id;
pub mod incremental;
pub mod plan;

pub use cache::{Artifact, Cache, CacheKey, CacheStats};
pub use context::{CancellationToken, Context};
pub use error::{Error, Result};
pub use executor::{Executor, Stats, TargetResult};
pub use id::TargetId;
pub use incremental::{diff, snapshot_inputs, FileState, Snapshot};
pub use plan::{Action, ActionResult, Plan, Target, TargetSpec};

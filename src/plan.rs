// SPDX-License-Identifier: Apache-2.0/MIT
//! The dependency graph: registration, normalization, subgraph extraction
//! and cycle detection.
//!
//! A [`Plan`] is immutable once targets are added, save for [`Plan::subgraph`]
//! which returns a fresh, independent `Plan`. Every iteration that can
//! influence observable ordering — [`Plan::all`], validation, cycle
//! reporting — walks targets in ascending [`TargetId`] order.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use log::warn;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::id::TargetId;

/// The result type an action returns: `Ok(())` on success, or any boxed
/// error on failure. The executor wraps a failing action's error in
/// [`Error::ActionFailed`] when recording the target's [`Result`](crate::executor::TargetResult).
pub type ActionResult = std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// A target's unit of work. Stored behind an `Arc` so that [`Target`]
/// remains cheap to clone — `Plan::get` hands back a value copy, not an
/// internal reference, so the action itself must be shareable rather than
/// owned uniquely.
pub type Action = Arc<dyn Fn(&Context, &Target) -> ActionResult + Send + Sync>;

/// One node of a [`Plan`]: an id, its direct dependencies, a scheduling
/// weight and the closure that performs the work.
#[derive(Clone)]
pub struct Target {
    id: TargetId,
    deps: BTreeSet<TargetId>,
    weight: u32,
    action: Action,
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Target")
            .field("id", &self.id)
            .field("deps", &self.deps)
            .field("weight", &self.weight)
            .finish()
    }
}

impl Target {
    /// The target's id.
    pub fn id(&self) -> &TargetId {
        &self.id
    }

    /// The target's direct dependencies, ascending, deduplicated.
    pub fn deps(&self) -> &BTreeSet<TargetId> {
        &self.deps
    }

    /// The target's scheduling weight (always >= 1).
    pub fn weight(&self) -> u32 {
        self.weight
    }

    /// Invoke the target's action.
    pub fn run(&self, ctx: &Context) -> ActionResult {
        (self.action)(ctx, self)
    }
}

/// A target before it has been normalized and inserted into a [`Plan`].
///
/// `weight` is a plain `i64` here because spec'd inputs may be non-positive
/// (they are normalized to `1` on insertion); everywhere else in the crate
/// weight is the normalized, always-positive `u32`.
pub struct TargetSpec {
    /// The target's id. Must be non-empty.
    pub id: TargetId,
    /// Direct dependencies. Deduplicated and sorted on insertion.
    pub deps: Vec<TargetId>,
    /// Cost hint. Non-positive values are normalized to `1`.
    pub weight: i64,
    /// The work closure.
    pub action: Action,
}

impl TargetSpec {
    /// Build a spec with default weight (`1`) and no dependencies.
    pub fn new(id: impl Into<TargetId>, action: Action) -> Self {
        TargetSpec { id: id.into(), deps: Vec::new(), weight: 1, action }
    }

    /// Attach dependencies.
    pub fn with_deps(mut self, deps: impl IntoIterator<Item = TargetId>) -> Self {
        self.deps = deps.into_iter().collect();
        self
    }

    /// Attach a weight.
    pub fn with_weight(mut self, weight: i64) -> Self {
        self.weight = weight;
        self
    }
}

/// The acyclic graph of targets.
///
/// Construction never checks that dependencies exist — only [`Plan::validate`]
/// does, so that targets can be added in any order before a single
/// validation pass.
#[derive(Default)]
pub struct Plan {
    targets: BTreeMap<TargetId, Target>,
}

impl Plan {
    /// An empty plan.
    pub fn new() -> Self {
        Plan { targets: BTreeMap::new() }
    }

    /// Number of targets currently registered.
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// `true` if no targets are registered.
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Register a target, normalizing its weight (`< 1` becomes `1`) and
    /// deduplicating/sorting its dependencies.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if `spec.id` is empty.
    /// - [`Error::DuplicateTarget`] if the id is already registered.
    pub fn add(&mut self, spec: TargetSpec) -> Result<()> {
        if spec.id.is_empty() {
            return Err(Error::InvalidArgument("target id must not be empty".into()));
        }
        if self.targets.contains_key(&spec.id) {
            return Err(Error::DuplicateTarget(spec.id));
        }

        let weight = if spec.weight < 1 { 1 } else { spec.weight as u32 };
        let deps: BTreeSet<TargetId> = spec.deps.into_iter().collect();

        self.targets.insert(
            spec.id.clone(),
            Target { id: spec.id, deps, weight, action: spec.action },
        );
        Ok(())
    }

    /// Fetch a value copy of a target, if registered.
    pub fn get(&self, id: &TargetId) -> Option<Target> {
        self.targets.get(id).cloned()
    }

    /// All targets, ascending by id.
    pub fn all(&self) -> Vec<Target> {
        self.targets.values().cloned().collect()
    }

    /// All registered ids, ascending.
    pub fn ids(&self) -> Vec<TargetId> {
        self.targets.keys().cloned().collect()
    }

    /// Build a fresh `Plan` containing `roots` and their transitive
    /// predecessors, visiting predecessors before successors.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownTarget`] if any root or transitive dependency is
    /// missing from this plan.
    pub fn subgraph(&self, roots: &[TargetId]) -> Result<Plan> {
        let mut included: BTreeSet<TargetId> = BTreeSet::new();
        let mut stack: Vec<TargetId> = roots.to_vec();

        while let Some(id) = stack.pop() {
            if included.contains(&id) {
                continue;
            }
            let target = self.targets.get(&id).ok_or_else(|| Error::UnknownTarget(id.clone()))?;
            included.insert(id);
            for dep in target.deps() {
                if !included.contains(dep) {
                    stack.push(dep.clone());
                }
            }
        }

        let mut plan = Plan::new();
        for id in included {
            let target = self.targets.get(&id).expect("id collected from this plan");
            plan.targets.insert(id, target.clone());
        }
        Ok(plan)
    }

    /// Validate the plan: every dependency edge must point at a registered
    /// target, and the graph must be acyclic.
    ///
    /// Cycle detection uses a three-color DFS seeded in ascending id order,
    /// so that the reported cycle (and which node is deemed "the" entry
    /// point into it) is deterministic across runs.
    ///
    /// # Errors
    ///
    /// - [`Error::MissingDependency`] if any target depends on an
    ///   unregistered id.
    /// - [`Error::CycleDetected`] if the graph contains a cycle.
    pub fn validate(&self) -> Result<()> {
        for target in self.targets.values() {
            for dep in target.deps() {
                if !self.targets.contains_key(dep) {
                    return Err(Error::MissingDependency {
                        target: target.id().clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        let mut colors: BTreeMap<&TargetId, Color> =
            self.targets.keys().map(|id| (id, Color::White)).collect();
        let mut path: Vec<TargetId> = Vec::new();

        for start in self.targets.keys() {
            if colors[start] != Color::White {
                continue;
            }
            self.visit(start, &mut colors, &mut path)?;
        }

        Ok(())
    }

    fn visit<'a>(
        &'a self,
        id: &'a TargetId,
        colors: &mut BTreeMap<&'a TargetId, Color>,
        path: &mut Vec<TargetId>,
    ) -> Result<()> {
        colors.insert(id, Color::Gray);
        path.push(id.clone());

        let target = &self.targets[id];
        for dep in target.deps() {
            match colors.get(dep).copied() {
                Some(Color::Gray) => {
                    let mut cycle_path = path.clone();
                    cycle_path.push(dep.clone());
                    let start = cycle_path.iter().position(|x| x == dep).unwrap_or(0);
                    let cycle = cycle_path[start..].to_vec();
                    warn!(
                        "cycle detected: {}",
                        cycle.iter().map(TargetId::as_str).collect::<Vec<_>>().join(" -> ")
                    );
                    return Err(Error::CycleDetected { path: cycle });
                }
                Some(Color::Black) => continue,
                Some(Color::White) | None => {
                    let dep_key = self.targets.get_key_value(dep).map(|(k, _)| k).unwrap();
                    self.visit(dep_key, colors, path)?;
                }
            }
        }

        path.pop();
        colors.insert(id, Color::Black);
        Ok(())
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

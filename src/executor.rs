// SPDX-License-Identifier: Apache-2.0/MIT
//! The dependency-respecting parallel scheduler.
//!
//! The worker pool is a fixed-width [`rayon::ThreadPool`], built with
//! `rayon::ThreadPoolBuilder::new().num_threads(n).thread_name(...)`.
//! Completed targets report back over a `crossbeam_channel`, turning "a
//! thing running on another thread" into a channel the calling thread can
//! wait on.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Sender};
use log::{debug, trace, warn};

use crate::context::Context;
use crate::error::{Error, Result};
use crate::id::TargetId;
use crate::plan::{Plan, Target};

/// The outcome of one executed target.
#[derive(Debug)]
pub struct TargetResult {
    /// The target's id.
    pub id: TargetId,
    /// `Some` if the action returned an error ([`Error::ActionFailed`]).
    pub error: Option<Error>,
    /// Wall-clock time the action took to run.
    pub elapsed: Duration,
}

/// Monotonic counters and a high-water gauge for one `execute`/
/// `execute_selected` call.
#[derive(Debug, Default, Clone, Copy)]
pub struct Stats {
    /// Number of targets that were scheduled.
    pub total: u64,
    /// Actions that returned `Ok(())`.
    pub succeeded: u64,
    /// Actions that returned an error.
    pub failed: u64,
    /// Number of times a target was placed on the ready queue.
    pub enqueued: u64,
    /// Number of times a target was taken off the ready queue to run.
    pub dequeued: u64,
    /// The observed maximum number of concurrently in-flight actions.
    pub max_parallel: u64,
}

/// Runs a validated [`Plan`] (or an induced subgraph/selection of one)
/// using a fixed-width worker pool.
pub struct Executor {
    pool: rayon::ThreadPool,
}

impl Executor {
    /// Build an executor with `width` workers. A non-positive width
    /// defaults to the host's parallelism count.
    pub fn new(width: i64) -> Self {
        let width = if width < 1 { num_cpus::get().max(1) } else { width as usize };
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(width)
            .thread_name(|n| format!("kiln-worker-{n}"))
            .build()
            .expect("building the kiln worker pool");
        Executor { pool }
    }

    /// Run every target in `plan`, or — if `roots` is given — the induced
    /// subgraph of `roots` and their transitive dependencies.
    ///
    /// # Errors
    ///
    /// Any [`Plan::subgraph`] or [`Plan::validate`] error, returned
    /// synchronously before any action runs.
    pub fn execute(
        &self,
        ctx: &Context,
        plan: &Plan,
        roots: Option<&[TargetId]>,
    ) -> Result<(Vec<TargetResult>, Stats)> {
        let scoped;
        let plan_ref: &Plan = match roots {
            Some(roots) => {
                scoped = plan.subgraph(roots)?;
                &scoped
            }
            None => plan,
        };
        plan_ref.validate()?;
        let selected = plan_ref.ids();
        self.run(ctx, plan_ref, &selected)
    }

    /// Run exactly `selected`, treating dependencies not in the selection as
    /// already satisfied.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownTarget`] if a selected id is not registered in
    /// `plan`.
    pub fn execute_selected(
        &self,
        ctx: &Context,
        plan: &Plan,
        selected: &[TargetId],
    ) -> Result<(Vec<TargetResult>, Stats)> {
        for id in selected {
            if plan.get(id).is_none() {
                return Err(Error::UnknownTarget(id.clone()));
            }
        }
        self.run(ctx, plan, selected)
    }

    fn run(&self, ctx: &Context, plan: &Plan, selected: &[TargetId]) -> Result<(Vec<TargetResult>, Stats)> {
        let total = selected.len();
        if total == 0 {
            return Ok((Vec::new(), Stats::default()));
        }

        let mut targets: HashMap<TargetId, Target> = HashMap::with_capacity(total);
        for id in selected {
            let target = plan.get(id).ok_or_else(|| Error::UnknownTarget(id.clone()))?;
            targets.insert(id.clone(), target);
        }

        let selected_set: BTreeSet<&TargetId> = selected.iter().collect();

        let mut indegree: HashMap<TargetId, usize> = HashMap::with_capacity(total);
        let mut rev_adj: HashMap<TargetId, Vec<TargetId>> = HashMap::with_capacity(total);
        for id in selected {
            rev_adj.entry(id.clone()).or_default();
        }
        for id in selected {
            let target = &targets[id];
            let deg = target.deps().iter().filter(|d| selected_set.contains(d)).count();
            indegree.insert(id.clone(), deg);
            for dep in target.deps() {
                if selected_set.contains(dep) {
                    rev_adj.get_mut(dep).expect("rev_adj seeded for every selected id").push(id.clone());
                }
            }
        }

        let mut initial_ready: Vec<TargetId> =
            indegree.iter().filter(|(_, &d)| d == 0).map(|(id, _)| id.clone()).collect();
        initial_ready.sort_by(|a, b| {
            let wa = targets[a].weight();
            let wb = targets[b].weight();
            wb.cmp(&wa).then_with(|| a.cmp(b))
        });

        debug!("scheduling {} target(s) with {} initially ready", total, initial_ready.len());

        let (sender, receiver) = bounded::<TargetResult>(total);

        let scheduler = Arc::new(Scheduler {
            targets,
            rev_adj,
            indegree: Mutex::new(indegree),
            ctx: ctx.clone(),
            sender,
            running: AtomicU64::new(0),
            max_parallel: AtomicU64::new(0),
            enqueued: AtomicU64::new(0),
            dequeued: AtomicU64::new(0),
        });

        scheduler.enqueued.fetch_add(initial_ready.len() as u64, Ordering::SeqCst);

        self.pool.scope(|scope| {
            for id in initial_ready {
                let scheduler = Arc::clone(&scheduler);
                scope.spawn(move |scope| Scheduler::run_one(scheduler, scope, id));
            }
        });

        let mut results = Vec::with_capacity(total);
        let mut succeeded = 0u64;
        let mut failed = 0u64;
        for _ in 0..total {
            let result = receiver
                .recv()
                .expect("exactly `total` results are sent before the scope returns");
            match &result.error {
                Some(_) => failed += 1,
                None => succeeded += 1,
            }
            results.push(result);
        }
        results.sort_by(|a, b| a.id.cmp(&b.id));

        let stats = Stats {
            total: total as u64,
            succeeded,
            failed,
            enqueued: scheduler.enqueued.load(Ordering::SeqCst),
            dequeued: scheduler.dequeued.load(Ordering::SeqCst),
            max_parallel: scheduler.max_parallel.load(Ordering::SeqCst),
        };

        Ok((results, stats))
    }
}

impl Default for Executor {
    fn default() -> Self {
        Executor::new(0)
    }
}

struct Scheduler {
    targets: HashMap<TargetId, Target>,
    rev_adj: HashMap<TargetId, Vec<TargetId>>,
    indegree: Mutex<HashMap<TargetId, usize>>,
    ctx: Context,
    sender: Sender<TargetResult>,
    running: AtomicU64,
    max_parallel: AtomicU64,
    enqueued: AtomicU64,
    dequeued: AtomicU64,
}

impl Scheduler {
    fn run_one<'scope>(self: Arc<Self>, scope: &rayon::Scope<'scope>, id: TargetId) {
        self.dequeued.fetch_add(1, Ordering::SeqCst);
        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_parallel.fetch_max(running, Ordering::SeqCst);

        trace!("running target {id}");
        let target = self.targets.get(&id).expect("scheduled id is always present");
        let start = Instant::now();
        let outcome = target.run(&self.ctx);
        let elapsed = start.elapsed();

        self.running.fetch_sub(1, Ordering::SeqCst);

        if let Err(e) = &outcome {
            warn!("target {id} failed after {elapsed:?}: {e}");
        }
        let error = outcome.err().map(|source| Error::ActionFailed { target: id.clone(), source });
        self.sender
            .send(TargetResult { id: id.clone(), error, elapsed })
            .expect("receiver outlives every spawned task");

        let ready_successors = {
            let mut indegree = self.indegree.lock().expect("scheduler indegree lock poisoned");
            let mut ready = Vec::new();
            for succ in self.rev_adj.get(&id).into_iter().flatten() {
                let remaining = indegree.get_mut(succ).expect("successor present in indegree map");
                *remaining -= 1;
                if *remaining == 0 {
                    ready.push(succ.clone());
                }
            }
            ready
        };

        for succ in ready_successors {
            self.enqueued.fetch_add(1, Ordering::SeqCst);
            let scheduler = Arc::clone(&self);
            scope.spawn(move |scope| Scheduler::run_one(scheduler, scope, succ));
        }
    }
}

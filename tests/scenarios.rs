// SPDX-License-Identifier: Apache-2.0/MIT
//! End-to-end scenarios over `Plan` + `Executor` and the incremental engine.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::sleep;
use std::time::Duration;

use kiln::{diff, snapshot_inputs, Context, Error, Executor, Plan, TargetId, TargetSpec};

fn noop_action() -> kiln::Action {
    Arc::new(|_ctx, _target| Ok(()))
}

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// ── 1. cycle detection ───────────────────────────────────────────────

#[test]
fn cycle_detection_rejects_plan_and_stops_before_executing() {
    init_logging();
    let invoked = Arc::new(AtomicUsize::new(0));

    let mut plan = Plan::new();
    let counter = Arc::clone(&invoked);
    plan.add(
        TargetSpec::new(
            "A",
            Arc::new(move |_ctx, _t| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        )
        .with_deps([TargetId::new("B")]),
    )
    .unwrap();
    let counter = Arc::clone(&invoked);
    plan.add(
        TargetSpec::new(
            "B",
            Arc::new(move |_ctx, _t| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        )
        .with_deps([TargetId::new("A")]),
    )
    .unwrap();

    assert!(matches!(plan.validate(), Err(Error::CycleDetected { .. })));

    let executor = Executor::new(2);
    let ctx = Context::default();
    let err = executor.execute(&ctx, &plan, None).unwrap_err();
    assert!(matches!(err, Error::CycleDetected { .. }));
    assert_eq!(invoked.load(Ordering::SeqCst), 0, "no action should run when validation fails");
}

// ── 2. diamond DAG ────────────────────────────────────────────────────

#[test]
fn diamond_dag_runs_with_overlap_and_sorted_results() {
    let mut plan = Plan::new();
    plan.add(TargetSpec::new("A", sleepy_action())).unwrap();
    plan.add(TargetSpec::new("B", sleepy_action()).with_deps([TargetId::new("A")])).unwrap();
    plan.add(TargetSpec::new("C", sleepy_action()).with_deps([TargetId::new("A")])).unwrap();
    plan.add(
        TargetSpec::new("D", sleepy_action())
            .with_deps([TargetId::new("B"), TargetId::new("C")]),
    )
    .unwrap();

    let executor = Executor::new(4);
    let ctx = Context::default();
    let (results, stats) = executor.execute(&ctx, &plan, None).unwrap();

    assert_eq!(results.len(), 4);
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.succeeded, 4);
    assert!(stats.max_parallel >= 2, "B and C should overlap, got {}", stats.max_parallel);

    let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["A", "B", "C", "D"]);
}

fn sleepy_action() -> kiln::Action {
    Arc::new(|_ctx, _target| {
        sleep(Duration::from_millis(10));
        Ok(())
    })
}

// ── 3. failure propagation ────────────────────────────────────────────

#[test]
fn failed_target_does_not_abort_the_whole_run() {
    let mut plan = Plan::new();
    plan.add(TargetSpec::new("A", noop_action())).unwrap();
    plan.add(
        TargetSpec::new(
            "B",
            Arc::new(|_ctx, _t| -> kiln::ActionResult {
                Err(Box::new(io::Error::new(io::ErrorKind::Other, "fail")))
            }),
        )
        .with_deps([TargetId::new("A")]),
    )
    .unwrap();
    plan.add(TargetSpec::new("C", noop_action()).with_deps([TargetId::new("B")])).unwrap();

    let executor = Executor::new(2);
    let ctx = Context::default();
    let (results, stats) = executor.execute(&ctx, &plan, None).unwrap();

    assert_eq!(results.len(), 3);
    assert!(stats.failed >= 1);
}

// ── 6. incremental diff sequence ──────────────────────────────────────

#[test]
fn incremental_diff_tracks_content_and_membership_changes() {
    let dir = tempfile::tempdir().unwrap();
    let a_path = dir.path().join("a.txt");
    let b_path = dir.path().join("b.txt");
    std::fs::write(&a_path, "hello").unwrap();
    std::fs::write(&b_path, "world").unwrap();

    let t1 = TargetId::new("T1");
    let glob = format!("{}/*.txt", dir.path().display());
    let inputs = || vec![(t1.clone(), vec![glob.clone()])];

    let s1 = snapshot_inputs(inputs()).unwrap();
    let s2 = snapshot_inputs(inputs()).unwrap();
    assert_eq!(diff(&s1, &s2), Vec::<TargetId>::new());

    // Ensure the mtime actually advances on coarse-grained filesystems.
    sleep(Duration::from_millis(1100));
    std::fs::write(&a_path, "HELLO").unwrap();
    let s3 = snapshot_inputs(inputs()).unwrap();
    assert_eq!(diff(&s2, &s3), vec![t1.clone()]);

    let c_path = dir.path().join("c.txt");
    std::fs::write(&c_path, "extra").unwrap();
    let s4 = snapshot_inputs(inputs()).unwrap();
    assert_eq!(diff(&s3, &s4), vec![t1.clone()]);

    std::fs::remove_file(&b_path).unwrap();
    let s5 = snapshot_inputs(inputs()).unwrap();
    assert_eq!(diff(&s4, &s5), vec![t1]);
}

//! Watchdog timeout enforcement tests.
//!
//! These run against real time. Tasks poll their token every few
//! milliseconds, so assertions allow for that polling plus scheduling.

mod common;

use std::sync::atomic::Ordering;
use std::thread;
use std::time::{Duration, Instant};

use common::runtime;
use mapreduce_runtime::{Error, KeyValue, TIMEOUT_MESSAGE};

/// Slack for thread scheduling and token polling.
const SLACK: Duration = Duration::from_millis(150);

#[test]
fn cooperative_task_is_cancelled_after_timeout() {
    let runtime = runtime(50);
    let mut ctx = runtime
        .start_map_context(&["sleep 500 check 10"], "slow-map")
        .unwrap();

    let started = Instant::now();
    let err = ctx.map_doc(br#"{"a":1}"#, b"{}").unwrap_err();
    let elapsed = started.elapsed();

    assert!(err.is_timeout());
    assert!(matches!(err, Error::Execution { ref message, .. } if message == TIMEOUT_MESSAGE));
    assert!(elapsed < Duration::from_millis(500));
    assert!(!ctx.task().is_running());
    assert_eq!(ctx.task().started_at(), None);
    assert!(runtime.engine().probe.interrupts.load(Ordering::SeqCst) >= 1);
}

#[test]
fn detection_latency_is_between_one_and_two_intervals() {
    let timeout = Duration::from_millis(100);
    let runtime = runtime(100);
    let mut ctx = runtime
        .start_reduce_context(&["sleep 5000 check 2"], "latency")
        .unwrap();

    let started = Instant::now();
    let err = ctx.rereduce(0, &[]).unwrap_err();
    let elapsed = started.elapsed();

    assert!(err.is_timeout());
    assert!(elapsed >= timeout, "cancelled too early: {elapsed:?}");
    assert!(elapsed < 2 * timeout + SLACK, "cancelled too late: {elapsed:?}");
}

#[test]
fn task_shorter_than_timeout_is_never_cancelled() {
    let runtime = runtime(300);
    let mut ctx = runtime
        .start_map_context(&["sleep 150 check 5; emit done yes"], "quick")
        .unwrap();

    for _ in 0..3 {
        let results = ctx.map_doc(b"{}", b"{}").unwrap();
        assert_eq!(results, vec![vec![KeyValue::new("done", "yes")]]);
        assert!(!ctx.task().is_cancelled());
    }
    assert_eq!(runtime.engine().probe.interrupts.load(Ordering::SeqCst), 0);
}

#[test]
fn uncooperative_task_runs_to_completion() {
    let runtime = runtime(30);
    let mut ctx = runtime
        .start_reduce_context(&["ignore 300; const finished"], "stubborn")
        .unwrap();

    let started = Instant::now();
    let result = ctx.reduce(&[], &[]).unwrap();

    assert_eq!(result, vec![b"finished".to_vec()]);
    assert!(started.elapsed() >= Duration::from_millis(300));
    // The watchdog did flag it, the engine just never looked.
    assert!(ctx.task().is_cancelled());
    assert!(!ctx.task().is_running());
}

#[test]
fn context_is_usable_after_timeout() {
    let runtime = runtime(40);
    let mut ctx = runtime
        .start_reduce_context(&["sleep 1000 check 5", "const fast"], "recovering")
        .unwrap();

    assert!(ctx.reduce(&[], &[]).unwrap_err().is_timeout());
    assert_eq!(ctx.reduce_one(1, &[], &[]).unwrap(), b"fast".to_vec());
    assert!(!ctx.task().is_cancelled());
}

#[test]
fn raised_timeout_applies_from_next_cycle() {
    let runtime = runtime(20);
    runtime.set_timeout(5000);
    assert_eq!(runtime.timeout(), Duration::from_millis(5000));

    let mut ctx = runtime
        .start_map_context(&["sleep 200 check 5; emit k v"], "relaxed")
        .unwrap();
    assert!(ctx.map_doc(b"{}", b"{}").is_ok());
}

#[test]
fn lowered_timeout_cancels_long_task() {
    let runtime = runtime(100);
    runtime.set_timeout(30);

    let mut ctx = runtime
        .start_map_context(&["sleep 3000 check 5"], "tightened")
        .unwrap();

    let started = Instant::now();
    assert!(ctx.map_doc(b"{}", b"{}").unwrap_err().is_timeout());
    assert!(started.elapsed() < Duration::from_millis(3000));
}

#[test]
fn idle_contexts_are_left_alone() {
    let runtime = runtime(5);
    let ctx = runtime.start_map_context(&["emit k v"], "idle").unwrap();

    thread::sleep(Duration::from_millis(50));
    assert!(!ctx.task().is_cancelled());
    assert_eq!(runtime.engine().probe.interrupts.load(Ordering::SeqCst), 0);
}

#[test]
fn destroy_races_watchdog_scans_safely() {
    // A 1ms timeout keeps the watchdog scanning continuously.
    let runtime = runtime(1);

    thread::scope(|scope| {
        for worker in 0..8 {
            let runtime = &runtime;
            scope.spawn(move || {
                for round in 0..50 {
                    let mut ctx = runtime
                        .start_map_context(
                            &["sleep 3 check 1; emit k v"],
                            format!("stress-{worker}-{round}"),
                        )
                        .unwrap();
                    // Either outcome is fine; only a crash or hang is not.
                    match ctx.map_doc(b"{}", b"{}") {
                        Ok(_) => {}
                        Err(err) => assert!(err.is_timeout()),
                    }
                    assert!(!ctx.task().is_running());
                    drop(ctx);
                }
            });
        }
    });

    assert!(runtime.registry().is_empty());
    assert!(runtime.watchdog_running());
    runtime.shutdown();
}

#[test]
fn shutdown_stops_watchdog() {
    let runtime = runtime(60_000);
    assert!(runtime.watchdog_running());

    let started = Instant::now();
    runtime.shutdown();
    assert!(started.elapsed() < Duration::from_secs(10));
}

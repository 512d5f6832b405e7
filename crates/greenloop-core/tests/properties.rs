use std::time::Duration;

use greenloop_core::ci::prioritize;
use greenloop_core::fakes::job;
use greenloop_core::{fingerprint, poll_delay, EscalationStrategy, FixMode, FixOutcome, RunConclusion, RunStatus};

#[test]
fn fingerprint_ignores_timestamps_paths_and_line_numbers() {
    let a = "2024-05-01T10:00:00Z /home/ci/work/app/src/main.rs:10:5 error: unused variable `x`";
    let b = "2025-01-17T23:59:59Z /Users/dev/app/src/main.rs:42:9 error: unused variable `x`";
    assert_eq!(fingerprint(a), fingerprint(b));
    assert_ne!(fingerprint(a), fingerprint("error: unused variable `y`"));
}

#[test]
fn jobs_are_fixed_build_first() {
    let failed = Some(RunConclusion::Failure);
    let jobs = vec![
        job(1, "e2e", RunStatus::Completed, failed),
        job(2, "lint", RunStatus::Completed, failed),
        job(3, "build", RunStatus::Completed, failed),
    ];
    let names: Vec<String> = prioritize(jobs).into_iter().map(|j| j.name).collect();
    assert_eq!(names, vec!["build", "lint", "e2e"]);
}

#[test]
fn in_progress_poll_delay_grows_and_caps() {
    let delays: Vec<Duration> = (0..8)
        .map(|n| poll_delay(RunStatus::InProgress, n, true))
        .collect();
    assert_eq!(delays[0], Duration::from_millis(5_000));
    assert_eq!(delays[1], Duration::from_millis(7_000));
    assert!(delays.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(delays[7], Duration::from_millis(15_000));

    assert_eq!(poll_delay(RunStatus::InProgress, 100, false), Duration::from_millis(20_000));
    assert_eq!(poll_delay(RunStatus::Queued, 0, false), Duration::from_millis(30_000));
    assert_eq!(poll_delay(RunStatus::Completed, 3, true), Duration::ZERO);
}

#[test]
fn escalation_moves_to_expensive_after_two_cheap_failures() {
    let mut strategy = EscalationStrategy::default();
    let task = "local:lint";

    for _ in 0..2 {
        let mode = strategy.select_mode(task, "error: unused import", None);
        assert_eq!(mode, FixMode::Cheap);
        strategy.record_attempt(task, mode, FixOutcome::Failure, false);
    }
    assert_eq!(strategy.select_mode(task, "error: unused import", None), FixMode::Expensive);
    assert_eq!(strategy.select_mode(task, "x", Some(FixMode::Cheap)), FixMode::Cheap);
}
